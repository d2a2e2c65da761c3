//! Waiting for a dictated transcript to stop changing
//!
//! Transcripts land in the composer incrementally, so the first change is
//! not the end of it. The text counts as final once it differs from the
//! pre-submit snapshot and has then been quiet for a while.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::probe::{preview, DomProbe, InputSnapshot};

/// Poll cadence while waiting for the transcript
pub const FINAL_TEXT_POLL: Duration = Duration::from_millis(60);

/// Result of [`wait_for_final_text`]. Always carries the last read, so a
/// timeout with content can be told apart from a timeout with nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizationResult {
    pub ok: bool,
    pub snapshot: InputSnapshot,
    pub stable_for: Duration,
}

/// Whether `current` counts as new text relative to `snapshot`
fn has_changed(snapshot: &str, current: &str) -> bool {
    if snapshot.is_empty() {
        !current.trim().is_empty()
    } else {
        current != snapshot
    }
}

/// Poll the composer until its text has changed from `snapshot` and stayed
/// put for `quiet`, or until `timeout` passes
pub async fn wait_for_final_text(
    probe: &dyn DomProbe,
    snapshot: &str,
    timeout: Duration,
    quiet: Duration,
) -> FinalizationResult {
    let started = Instant::now();

    let first = InputSnapshot::capture(probe);
    let mut last_text = first.text.clone();
    let mut last_change_at = Instant::now();

    debug!(
        timeout_ms = timeout.as_millis() as u64,
        quiet_ms = quiet.as_millis() as u64,
        input_found = first.found,
        input_kind = %first.kind,
        snapshot_len = snapshot.len(),
        len = last_text.len(),
        "waiting for final text"
    );

    loop {
        let current = InputSnapshot::capture(probe);

        if current.text != last_text {
            last_text.clone_from(&current.text);
            last_change_at = Instant::now();
            debug!(
                len = current.text.len(),
                preview = %preview(&current.text, 120),
                "input changed"
            );
        }

        let stable_for = last_change_at.elapsed();
        let changed = has_changed(snapshot, &current.text);

        if changed && stable_for >= quiet {
            debug!(
                stable_for_ms = stable_for.as_millis() as u64,
                final_len = current.text.len(),
                "final text stable"
            );
            return FinalizationResult {
                ok: true,
                snapshot: current,
                stable_for,
            };
        }

        if started.elapsed() > timeout {
            debug!(
                changed,
                final_len = current.text.len(),
                preview = %preview(&current.text, 120),
                "final text timeout"
            );
            return FinalizationResult {
                ok: false,
                snapshot: current,
                stable_for,
            };
        }

        sleep(FINAL_TEXT_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::ScriptedPage;
    use tokio_test::{assert_pending, assert_ready, task};

    const TIMEOUT: Duration = Duration::from_millis(25_000);
    const QUIET: Duration = Duration::from_millis(320);

    #[test]
    fn test_has_changed() {
        assert!(has_changed("", "Hello"));
        assert!(!has_changed("", "   "));
        assert!(has_changed("Hi", "Hi there"));
        assert!(has_changed("Hi", ""));
        assert!(!has_changed("Hi", "Hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_snapshot_resolves_after_quiet_period() {
        let page = ScriptedPage::new("").text_at(500, "Hello");
        let started = Instant::now();

        let res = wait_for_final_text(&page, "", TIMEOUT, QUIET).await;

        assert!(res.ok);
        assert_eq!(res.snapshot.text, "Hello");
        assert!(res.snapshot.found);
        assert!(res.stable_for >= QUIET);
        // Change is first seen on the 540ms poll, stability on the 900ms poll
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(860), "resolved early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(960), "resolved late: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_snapshot_times_out() {
        let page = ScriptedPage::new("Hi");
        let started = Instant::now();

        let res = wait_for_final_text(&page, "Hi", TIMEOUT, QUIET).await;

        assert!(!res.ok);
        assert_eq!(res.snapshot.text, "Hi");
        assert!(started.elapsed() > TIMEOUT);
        assert!(started.elapsed() <= TIMEOUT + FINAL_TEXT_POLL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_text_is_not_truncated() {
        let page = ScriptedPage::new("")
            .text_at(200, "Hello")
            .text_at(400, "Hello wor")
            .text_at(650, "Hello world");

        let res = wait_for_final_text(&page, "", TIMEOUT, QUIET).await;

        assert!(res.ok);
        assert_eq!(res.snapshot.text, "Hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_resolves_before_quiet_period() {
        let page = ScriptedPage::new("").text_at(0, "Hello");
        let mut wait = task::spawn(wait_for_final_text(&page, "", TIMEOUT, QUIET));

        // t=0: change not yet observed relative to the first read's clock
        assert_pending!(wait.poll());

        for _ in 0..5 {
            tokio::time::advance(FINAL_TEXT_POLL).await;
            assert_pending!(wait.poll());
        }

        // 360ms since the text was first read
        tokio::time::advance(FINAL_TEXT_POLL).await;
        let res = assert_ready!(wait.poll());
        assert!(res.ok);
        assert_eq!(res.snapshot.text, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_snapshot_counts_as_changed() {
        let page = ScriptedPage::new("draft").text_at(100, "dictated text");

        let res = wait_for_final_text(&page, "draft", TIMEOUT, QUIET).await;

        assert!(res.ok);
        assert_eq!(res.snapshot.text, "dictated text");
    }

    #[tokio::test(start_paused = true)]
    async fn test_whitespace_only_times_out_with_content() {
        let page = ScriptedPage::new("").text_at(100, "  ");
        let timeout = Duration::from_millis(2000);

        let res = wait_for_final_text(&page, "", timeout, QUIET).await;

        assert!(!res.ok);
        assert_eq!(res.snapshot.text, "  ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_input_times_out() {
        let page = ScriptedPage::new("").without_input();
        let timeout = Duration::from_millis(1000);

        let res = wait_for_final_text(&page, "", timeout, QUIET).await;

        assert!(!res.ok);
        assert!(!res.snapshot.found);
    }
}
