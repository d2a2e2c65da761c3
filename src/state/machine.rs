//! Dictation pipeline orchestrator
//!
//! Drives one run per dictation-submit click through
//! Idle -> Armed -> Waiting -> Deciding -> Sending -> Idle, returning to Idle
//! early whenever a step fails. At most one run is in flight; a trigger that
//! arrives meanwhile is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::DictationConfig;
use crate::events::{AbortReason, PipelineEvent};
use crate::hotkey::{ModifierState, ModifierTracker};
use crate::pipeline::{decide, wait_for_final_text, SendError, SendSequencer};
use crate::probe::{
    preview, ClickEmitter, ControlMatcher, DomProbe, ElementDescriptor, InputSnapshot,
};
use crate::settings::{Settings, SettingsStore};

/// Pipeline states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// No run active
    #[default]
    Idle,
    /// Snapshot taken, grace window open
    Armed,
    /// Waiting for the transcript to settle
    Waiting,
    /// Applying the modifier policy
    Deciding,
    /// Stopping generation and submitting
    Sending,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Armed => write!(f, "Armed"),
            State::Waiting => write!(f, "Waiting"),
            State::Deciding => write!(f, "Deciding"),
            State::Sending => write!(f, "Sending"),
        }
    }
}

/// A click observed on the page, capture phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    /// `Event.isTrusted`; synthetic clicks never start a run
    pub trusted: bool,
    /// Closest button around the click target, if any
    #[serde(default)]
    pub target: Option<ElementDescriptor>,
    /// Modifier flags carried by the click event itself
    #[serde(default)]
    pub modifiers: ModifierState,
}

/// What [`Orchestrator::handle_click`] did with a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Not a trusted dictation-submit click, or auto-send is disabled
    Ignored,
    /// A run was already in flight
    Dropped,
    /// A new run started
    Started,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Sent { attempts: u32 },
    SendFailed { attempts: u32, error: SendError },
    Aborted(AbortReason),
}

/// Collaborators the orchestrator drives
pub struct PipelineDeps {
    pub probe: Arc<dyn DomProbe>,
    pub clicker: Arc<dyn ClickEmitter>,
    pub matcher: Arc<dyn ControlMatcher>,
    pub tracker: Arc<ModifierTracker>,
    pub store: Arc<dyn SettingsStore>,
}

/// Holds the in-flight flag; clears it when dropped, on every exit path
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Per-run state captured when the run is armed
struct PipelineRun {
    snapshot: InputSnapshot,
    initial_held: bool,
    click_modifiers: ModifierState,
    started_at: Instant,
}

pub struct Orchestrator {
    probe: Arc<dyn DomProbe>,
    clicker: Arc<dyn ClickEmitter>,
    matcher: Arc<dyn ControlMatcher>,
    tracker: Arc<ModifierTracker>,
    store: Arc<dyn SettingsStore>,
    config: watch::Sender<DictationConfig>,
    state: watch::Sender<State>,
    /// Time when the current non-Idle state was entered
    state_entered_at: Mutex<Option<Instant>>,
    in_flight: Arc<AtomicBool>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl Orchestrator {
    pub fn new(
        deps: PipelineDeps,
        config: DictationConfig,
        event_tx: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            probe: deps.probe,
            clicker: deps.clicker,
            matcher: deps.matcher,
            tracker: deps.tracker,
            store: deps.store,
            config: watch::Sender::new(config),
            state: watch::Sender::new(State::Idle),
            state_entered_at: Mutex::new(None),
            in_flight: Arc::new(AtomicBool::new(false)),
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    pub fn config(&self) -> DictationConfig {
        self.config.borrow().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no run is active
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|state| *state == State::Idle).await;
    }

    /// Re-read the user policy from the settings store. On failure the
    /// previous config stays in effect.
    pub async fn refresh_config(&self) {
        match self.store.get(Settings::defaults_map()).await {
            Ok(map) => {
                let settings = Settings::normalize(&map);
                self.config
                    .send_modify(|config| *config = config.with_settings(&settings));
                debug!(
                    skip_key = %settings.skip_key,
                    hold_to_send = settings.hold_to_send,
                    hint = %settings.hint(),
                    "settings refreshed"
                );
            }
            Err(e) => warn!(error = %e, "settings refresh failed, keeping previous config"),
        }
    }

    /// Follow store change notifications for as long as the store lives
    pub async fn watch_settings(&self) {
        let mut rx = self.store.subscribe();
        loop {
            match rx.recv().await {
                Ok(change) if change.touches_pipeline() => self.refresh_config().await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "settings change receiver lagged");
                    self.refresh_config().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("settings watcher stopped");
    }

    /// Entry point for every click seen on the page
    pub fn handle_click(self: &Arc<Self>, click: &ClickEvent) -> TriggerOutcome {
        if !click.trusted {
            return TriggerOutcome::Ignored;
        }
        let Some(target) = &click.target else {
            return TriggerOutcome::Ignored;
        };
        if !self.matcher.is_dictation_submit(target) {
            return TriggerOutcome::Ignored;
        }
        if !self.config.borrow().enabled {
            debug!(button = %target, "auto-send disabled, ignoring dictation submit");
            return TriggerOutcome::Ignored;
        }

        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            info!(button = %target, "skip: run already in flight");
            self.emit(PipelineEvent::RunDropped);
            return TriggerOutcome::Dropped;
        };

        info!(button = %target, "dictation submit clicked");
        let run = self.arm(click.modifiers);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise(guard, run).await });

        TriggerOutcome::Started
    }

    /// Armed: everything that must happen at click time
    fn arm(&self, click_modifiers: ModifierState) -> PipelineRun {
        self.transition_to(State::Armed);

        let config = self.config();
        let snapshot = InputSnapshot::capture(self.probe.as_ref());
        self.tracker
            .open_grace(config.modifier, config.modifier_grace);
        let initial_held = self.tracker.is_held_now(config.modifier);

        info!(
            input_found = snapshot.found,
            input_kind = %snapshot.kind,
            snapshot_len = snapshot.text.len(),
            snapshot = %preview(&snapshot.text, 120),
            grace_ms = config.modifier_grace.as_millis() as u64,
            initial_held,
            "submit click flow start"
        );
        self.emit(PipelineEvent::DictationAccepted {
            input_found: snapshot.found,
            input_kind: snapshot.kind,
            snapshot_len: snapshot.text.len(),
        });

        PipelineRun {
            snapshot,
            initial_held,
            click_modifiers,
            started_at: Instant::now(),
        }
    }

    /// Run the async part on its own task so a panic is contained, then
    /// release the in-flight flag and return to Idle no matter what
    async fn supervise(self: Arc<Self>, guard: InFlightGuard, run: PipelineRun) {
        let started_at = run.started_at;

        let this = Arc::clone(&self);
        let task = tokio::spawn(async move { this.execute(run).await });

        match task.await {
            Ok(outcome) => info!(?outcome, "run finished"),
            Err(e) if e.is_panic() => error!("run panicked"),
            Err(e) => warn!(error = %e, "run task cancelled"),
        }

        // Idle must be published before the flag is released
        self.transition_to(State::Idle);
        drop(guard);
        info!(
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "submit click flow end"
        );
    }

    /// Waiting -> Deciding -> Sending
    async fn execute(&self, run: PipelineRun) -> RunOutcome {
        self.refresh_config().await;
        let config = self.config();

        self.transition_to(State::Waiting);
        let finalized = wait_for_final_text(
            self.probe.as_ref(),
            &run.snapshot.text,
            config.final_text_timeout,
            config.final_text_quiet,
        )
        .await;

        self.emit(PipelineEvent::DictationFinalized {
            ok: finalized.ok,
            final_len: finalized.snapshot.text.len(),
            stable_for_ms: finalized.stable_for.as_millis() as u64,
        });

        if !finalized.ok {
            return self.abort(AbortReason::FinalTextTimeout);
        }
        if finalized.snapshot.is_blank() {
            return self.abort(AbortReason::FinalTextEmpty);
        }

        self.transition_to(State::Deciding);
        let grace_captured = self.tracker.grace_captured();
        let held_now = self.tracker.is_held_now(config.modifier);
        let click_held = self
            .tracker
            .is_held_from_event(run.click_modifiers, config.modifier);
        // Armed ran under the config of click time; without a modifier now,
        // nothing it captured counts
        let held_during = config.modifier.is_some()
            && (run.initial_held || grace_captured || held_now || click_held);

        let decision = decide(config.hold_to_send, held_during);
        info!(
            held_during,
            hold_to_send = decision.hold_to_send,
            should_send = decision.should_send,
            initial_held = run.initial_held,
            grace_captured,
            held_now,
            click_held,
            "decision"
        );
        self.emit(PipelineEvent::AutoSendRequested { decision });

        if !decision.should_send {
            return self.abort(AbortReason::SkippedByModifier);
        }

        self.transition_to(State::Sending);
        let sequencer = SendSequencer::new(
            self.probe.as_ref(),
            self.clicker.as_ref(),
            config.send_ack_timeout,
        );

        if !sequencer
            .stop_generating_if_possible(config.stop_generating_timeout)
            .await
        {
            return self.abort(AbortReason::StillGenerating);
        }

        let report = sequencer.send_with_retry().await;
        info!(ok = report.success(), attempts = report.attempts, "send result");
        self.emit(PipelineEvent::AutoSendCompleted {
            success: report.success(),
            attempts: report.attempts,
        });

        match report.result {
            Ok(()) => RunOutcome::Sent {
                attempts: report.attempts,
            },
            Err(error) => RunOutcome::SendFailed {
                attempts: report.attempts,
                error,
            },
        }
    }

    fn abort(&self, reason: AbortReason) -> RunOutcome {
        info!(%reason, "abort");
        self.emit(PipelineEvent::RunAborted { reason });
        RunOutcome::Aborted(reason)
    }

    fn emit(&self, event: PipelineEvent) {
        debug!(%event, "emitting pipeline event");
        let _ = self.event_tx.send(event);
    }

    /// Perform a state transition
    fn transition_to(&self, new_state: State) {
        // Held across the read and the publish so transitions never interleave
        let mut entered_at = self
            .state_entered_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let old_state = self.state();
        if old_state == new_state {
            return;
        }
        let duration_ms = entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "state transition"
        );

        *entered_at = (new_state != State::Idle).then(Instant::now);
        self.state.send_replace(new_state);
    }
}
