//! Live modifier key tracking with a grace window
//!
//! Key events arrive from the page bridge, which listens in the capture phase
//! so host page handlers cannot swallow them. The tracker keeps the held
//! state of every modifier and, while a grace window is open, remembers
//! whether the window's modifier was pressed at all.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::keys::{Modifier, ModifierState};

/// Window after a dictation submit during which a late modifier press
/// still counts for that run
#[derive(Debug, Clone, Copy)]
struct GraceWindow {
    modifier: Modifier,
    deadline: Instant,
    /// Sticky: once set it stays set until the next window is opened
    captured: bool,
}

#[derive(Debug, Default)]
struct TrackerInner {
    held: ModifierState,
    grace: Option<GraceWindow>,
}

/// Process-wide modifier key state
#[derive(Debug, Default)]
pub struct ModifierTracker {
    inner: Mutex<TrackerInner>,
}

impl ModifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a key press. Non-modifier keys are ignored.
    pub fn key_down(&self, key: &str) {
        let Some(modifier) = Modifier::from_key_name(key) else {
            return;
        };

        let mut inner = self.lock();
        inner.held.set(modifier, true);

        if let Some(grace) = inner.grace.as_mut() {
            if grace.modifier == modifier {
                let active = Instant::now() <= grace.deadline;
                if active {
                    grace.captured = true;
                }
                debug!(%modifier, grace_active = active, "modifier down");
            }
        }
    }

    /// Record a key release. Non-modifier keys are ignored.
    pub fn key_up(&self, key: &str) {
        if let Some(modifier) = Modifier::from_key_name(key) {
            self.lock().held.set(modifier, false);
        }
    }

    /// Window lost focus: key-up events may never arrive, so forget
    /// everything that is held
    pub fn blur(&self) {
        let mut inner = self.lock();
        if !inner.held.is_empty() {
            debug!(held = ?inner.held, "window blur reset modifiers");
        }
        inner.held = ModifierState::default();
    }

    /// Snapshot of the tracked held flags
    pub fn state(&self) -> ModifierState {
        self.lock().held
    }

    /// Whether the configured modifier is held right now.
    /// Always false when no modifier is configured.
    pub fn is_held_now(&self, modifier: Option<Modifier>) -> bool {
        modifier.is_some_and(|m| self.lock().held.get(m))
    }

    /// Whether the modifier is held according to an event's own flags or
    /// the tracked state. Synthetic events can carry stale flags, trusted
    /// ones can race the key listeners; either source is accepted.
    pub fn is_held_from_event(&self, event: ModifierState, modifier: Option<Modifier>) -> bool {
        modifier.is_some_and(|m| event.get(m) || self.lock().held.get(m))
    }

    /// Open a fresh grace window, discarding any capture from a previous run
    pub fn open_grace(&self, modifier: Option<Modifier>, grace: Duration) {
        let mut inner = self.lock();
        inner.grace = modifier.map(|modifier| GraceWindow {
            modifier,
            deadline: Instant::now() + grace,
            captured: false,
        });
    }

    /// Whether the grace window's modifier was pressed before its deadline
    pub fn grace_captured(&self) -> bool {
        self.lock().grace.is_some_and(|g| g.captured)
    }

    /// Whether the grace window is still accepting presses
    pub fn grace_active(&self) -> bool {
        self.lock()
            .grace
            .is_some_and(|g| Instant::now() <= g.deadline)
    }
}
