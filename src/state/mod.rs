//! Orchestrator for dictation pipeline runs
//!
//! Explicit state machine with five states:
//! - Idle: no run active
//! - Armed: snapshot taken, modifier grace window open
//! - Waiting: polling the composer until the transcript settles
//! - Deciding: applying the skip/hold modifier policy
//! - Sending: stopping generation, then clicking send with acknowledgement

mod machine;

pub use machine::{ClickEvent, Orchestrator, PipelineDeps, State, TriggerOutcome};
