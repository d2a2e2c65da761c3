//! Signal handling for graceful shutdown

use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Which signal asked the daemon to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Terminate,
    Interrupt,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignal {
    /// Register the signal handlers. Must be called inside a tokio runtime.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) -> ShutdownReason {
        let reason = tokio::select! {
            _ = self.sigterm.recv() => ShutdownReason::Terminate,
            _ = self.sigint.recv() => ShutdownReason::Interrupt,
        };
        debug!(%reason, "received shutdown signal");
        reason
    }
}
