//! Events module for dictation pipeline runs
//!
//! Provides structured event types for run acceptance, transcript
//! finalization, the auto-send decision and the send outcome.

use serde::{Deserialize, Serialize};

use crate::pipeline::AutoSendDecision;
use crate::probe::InputKind;

/// Why a run ended without sending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Transcript never settled into new text
    FinalTextTimeout,
    /// Transcript settled but is blank
    FinalTextEmpty,
    /// The modifier policy said not to send
    SkippedByModifier,
    /// A response kept streaming after the stop click
    StillGenerating,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::FinalTextTimeout => write!(f, "no stable final text"),
            AbortReason::FinalTextEmpty => write!(f, "final text empty"),
            AbortReason::SkippedByModifier => write!(f, "send skipped by modifier"),
            AbortReason::StillGenerating => write!(f, "still generating"),
        }
    }
}

/// Events emitted by the orchestrator during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A dictation-submit click started a run
    DictationAccepted {
        input_found: bool,
        input_kind: InputKind,
        snapshot_len: usize,
    },

    /// The transcript wait finished
    DictationFinalized {
        ok: bool,
        final_len: usize,
        stable_for_ms: u64,
    },

    /// The policy was applied
    AutoSendRequested { decision: AutoSendDecision },

    /// The send sequence finished
    AutoSendCompleted { success: bool, attempts: u32 },

    /// A trigger arrived while a run was in flight
    RunDropped,

    /// The run ended before sending
    RunAborted { reason: AbortReason },
}

impl std::fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineEvent::DictationAccepted { snapshot_len, .. } => {
                write!(f, "DICTATION_ACCEPTED (snapshot {} bytes)", snapshot_len)
            }
            PipelineEvent::DictationFinalized { ok, stable_for_ms, .. } => {
                write!(f, "DICTATION_FINALIZED (ok={}, stable {}ms)", ok, stable_for_ms)
            }
            PipelineEvent::AutoSendRequested { decision } => {
                write!(f, "AUTO_SEND_REQUESTED (send={})", decision.should_send)
            }
            PipelineEvent::AutoSendCompleted { success, attempts } => {
                write!(f, "AUTO_SEND_COMPLETED (success={}, attempts={})", success, attempts)
            }
            PipelineEvent::RunDropped => write!(f, "RUN_DROPPED"),
            PipelineEvent::RunAborted { reason } => write!(f, "RUN_ABORTED ({})", reason),
        }
    }
}
