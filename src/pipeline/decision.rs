//! The auto-send policy

use serde::{Deserialize, Serialize};

/// Outcome of applying the policy to one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSendDecision {
    pub hold_to_send: bool,
    pub held_during: bool,
    pub should_send: bool,
}

/// With `hold_to_send` the modifier means "send"; without it, "skip".
pub fn decide(hold_to_send: bool, held_during: bool) -> AutoSendDecision {
    AutoSendDecision {
        hold_to_send,
        held_during,
        should_send: if hold_to_send { held_during } else { !held_during },
    }
}
