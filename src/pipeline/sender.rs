//! Submitting the composer safely
//!
//! The page's primary action button doubles as "stop" while a response is
//! streaming, so a send has to wait for generation to end first. A click is
//! only trusted once the page acknowledges it.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::probe::{preview, visible_stop_control, ClickEmitter, DomProbe, InputSnapshot};

/// Poll cadence for stop-control and acknowledgement checks
pub const SEND_POLL: Duration = Duration::from_millis(120);

/// Total click attempts per run: the first one plus a single retry
pub const SEND_ATTEMPTS: u32 = 2;

/// Why a send attempt did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send button not found")]
    SubmitMissing,

    #[error("send button disabled")]
    SubmitDisabled,

    #[error("click could not be dispatched")]
    ClickFailed,

    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),
}

/// Outcome of [`SendSequencer::send_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub attempts: u32,
    pub result: Result<(), SendError>,
}

impl SendReport {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct SendSequencer<'a> {
    probe: &'a dyn DomProbe,
    clicker: &'a dyn ClickEmitter,
    ack_timeout: Duration,
}

impl<'a> SendSequencer<'a> {
    pub fn new(
        probe: &'a dyn DomProbe,
        clicker: &'a dyn ClickEmitter,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            probe,
            clicker,
            ack_timeout,
        }
    }

    /// Wait until no stop-generation control is visible.
    /// Returns false if it is still there after `timeout`.
    pub async fn ensure_not_generating(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if visible_stop_control(self.probe).is_none() {
                return true;
            }
            if started.elapsed() > timeout {
                return false;
            }
            sleep(SEND_POLL).await;
        }
    }

    /// Stop an in-progress response, if any, and wait for it to end
    pub async fn stop_generating_if_possible(&self, timeout: Duration) -> bool {
        let Some(stop) = visible_stop_control(self.probe) else {
            return true;
        };

        info!("stopping generation before send");
        if !self.clicker.click(&stop, "stop generating") {
            warn!("stop generating click could not be dispatched");
            return false;
        }

        let stopped = self.ensure_not_generating(timeout).await;
        if !stopped {
            warn!(timeout_ms = timeout.as_millis() as u64, "stop generating timeout");
        }
        stopped
    }

    /// Click send once and wait for the page to take the message
    pub async fn click_send_with_ack(&self) -> Result<(), SendError> {
        let before = InputSnapshot::capture(self.probe).text;

        let button = self.probe.find_submit_control().ok_or(SendError::SubmitMissing)?;
        if self.probe.is_disabled(&button) {
            return Err(SendError::SubmitDisabled);
        }
        if !self.clicker.click(&button, "send") {
            return Err(SendError::ClickFailed);
        }

        let started = Instant::now();
        while started.elapsed() <= self.ack_timeout {
            if let Some(reason) = self.acknowledged() {
                debug!(reason, "send acknowledged");
                return Ok(());
            }
            sleep(SEND_POLL).await;
        }

        let current = InputSnapshot::capture(self.probe).text;
        debug!(
            changed = current != before,
            len = current.len(),
            preview = %preview(&current, 120),
            "send ack timeout"
        );
        Err(SendError::AckTimeout(self.ack_timeout))
    }

    /// A cleared composer or a freshly shown stop control both mean the
    /// submission was accepted
    fn acknowledged(&self) -> Option<&'static str> {
        if InputSnapshot::capture(self.probe).is_blank() {
            Some("input cleared")
        } else if visible_stop_control(self.probe).is_some() {
            Some("generation started")
        } else {
            None
        }
    }

    /// [`Self::click_send_with_ack`] with exactly one retry
    pub async fn send_with_retry(&self) -> SendReport {
        let mut attempts = 0;
        let mut result = Err(SendError::SubmitMissing);

        while attempts < SEND_ATTEMPTS {
            attempts += 1;
            result = self.click_send_with_ack().await;
            match &result {
                Ok(()) => break,
                Err(e) => warn!(attempt = attempts, error = %e, "send attempt failed"),
            }
        }

        SendReport { attempts, result }
    }
}
