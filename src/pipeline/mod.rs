//! Building blocks of the dictation-to-send pipeline
//!
//! - `decision`: the pure auto-send policy
//! - `finalize`: waiting for the transcript to settle
//! - `sender`: stopping generation and submitting with acknowledgement

mod decision;
mod finalize;
mod sender;

pub use decision::{decide, AutoSendDecision};
pub use finalize::wait_for_final_text;
pub use sender::{SendError, SendSequencer};
