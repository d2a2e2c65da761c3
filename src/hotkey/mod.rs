//! Hotkey module for modifier key tracking
//!
//! Key events are observed by the page bridge in the capture phase and
//! forwarded here; the tracker answers point-in-time and
//! held-during-a-window queries for the dictation pipeline.

mod keys;
mod tracker;

pub use keys::{KeyPhase, Modifier, ModifierState};
pub use tracker::ModifierTracker;
