//! dictation-autosend-daemon: auto-send for dictated chat messages
//!
//! A page bridge running in the browser forwards keyboard events, clicks and
//! composer snapshots over IPC. When a dictation transcript is accepted, the
//! daemon waits for it to settle, applies the user's modifier policy and
//! submits it, asking the bridge to replay the clicks it decides on.
//!
//! Components:
//! - Modifier tracker fed by bridge key events
//! - Orchestrator state machine, one run in flight at a time
//! - Page mirror answering probe queries from bridge state
//! - Settings store (JSON file with in-memory fallback)
//! - IPC server for the bridge and the settings popup

mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod pipeline;
mod probe;
mod settings;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::PipelineEvent;
use crate::hotkey::ModifierTracker;
use crate::ipc::{Server, ServerContext};
use crate::lifecycle::ShutdownSignal;
use crate::probe::{LabelMatcher, PageMirror};
use crate::settings::{FallbackStore, FileStore, MemoryStore, SettingsStore};
use crate::state::{Orchestrator, PipelineDeps};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "dictation-autosend-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        ?config.settings_path,
        enabled = config.dictation.enabled,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Orchestrator -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<PipelineEvent>(64);

    let store: Arc<dyn SettingsStore> = Arc::new(FallbackStore::new(
        FileStore::new(&config.settings_path),
        MemoryStore::new(),
    ));
    let matcher = Arc::new(LabelMatcher);
    let mirror = Arc::new(PageMirror::new(matcher.clone()));
    let tracker = Arc::new(ModifierTracker::new());

    let orchestrator = Arc::new(Orchestrator::new(
        PipelineDeps {
            probe: mirror.clone(),
            clicker: mirror.clone(),
            matcher,
            tracker: tracker.clone(),
            store: store.clone(),
        },
        config.dictation.clone(),
        event_tx.clone(),
    ));
    orchestrator.refresh_config().await;

    let server = Server::new(
        &config.socket_path,
        ServerContext {
            orchestrator: orchestrator.clone(),
            tracker,
            mirror,
            store,
            events: event_tx,
        },
    )?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Follow settings changes
        _ = orchestrator.watch_settings() => {
            info!("settings watcher exited");
        }

        // Wait for shutdown signal
        reason = shutdown.wait() => {
            info!(%reason, "shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    if orchestrator.is_in_flight() {
        info!("waiting for in-flight run to finish");
        if tokio::time::timeout(Duration::from_secs(5), orchestrator.wait_idle())
            .await
            .is_err()
        {
            warn!("in-flight run abandoned");
        }
    }

    server.shutdown().await;

    info!("dictation-autosend-daemon stopped");

    Ok(())
}
