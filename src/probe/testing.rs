//! Scripted page for pipeline tests
//!
//! Input text follows a timeline measured from page creation on the tokio
//! clock, so tests run with a paused clock and stay deterministic. Clicks on
//! the send and stop controls mutate the page the way the real one would.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::{ClickEmitter, DomProbe, ElementHandle, InputKind};

pub const INPUT_ID: &str = "prompt-textarea";
pub const SEND_ID: &str = "send-button";
pub const STOP_ID: &str = "stop-button";

#[derive(Debug)]
struct Script {
    timeline: Vec<(Duration, String)>,
    input_present: bool,
    send_present: bool,
    send_disabled: bool,
    generating: bool,
    /// How long generation takes to stop after a stop click; `None` never stops
    stop_lag: Option<Duration>,
    stop_clicked_at: Option<Instant>,
    /// Send clicks to swallow before one is accepted
    ignored_sends: usize,
    /// Clicks cannot be dispatched, as with no bridge attached
    detached: bool,
    clicks: Vec<String>,
}

pub struct ScriptedPage {
    start: Instant,
    script: Mutex<Script>,
}

impl ScriptedPage {
    /// Page whose input starts with `initial` text
    pub fn new(initial: &str) -> Self {
        Self {
            start: Instant::now(),
            script: Mutex::new(Script {
                timeline: vec![(Duration::ZERO, initial.to_string())],
                input_present: true,
                send_present: true,
                send_disabled: false,
                generating: false,
                stop_lag: Some(Duration::from_millis(300)),
                stop_clicked_at: None,
                ignored_sends: 0,
                detached: false,
                clicks: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Input shows `text` from `at_ms` after page creation
    pub fn text_at(self, at_ms: u64, text: &str) -> Self {
        {
            let mut script = self.lock();
            script
                .timeline
                .push((Duration::from_millis(at_ms), text.to_string()));
            script.timeline.sort_by_key(|(at, _)| *at);
        }
        self
    }

    pub fn without_input(self) -> Self {
        self.lock().input_present = false;
        self
    }

    pub fn without_send(self) -> Self {
        self.lock().send_present = false;
        self
    }

    pub fn send_disabled(self) -> Self {
        self.lock().send_disabled = true;
        self
    }

    /// A response is streaming; a stop click ends it after `lag`
    pub fn generating(self, lag: Option<Duration>) -> Self {
        {
            let mut script = self.lock();
            script.generating = true;
            script.stop_lag = lag;
        }
        self
    }

    pub fn ignore_sends(self, count: usize) -> Self {
        self.lock().ignored_sends = count;
        self
    }

    pub fn detached(self) -> Self {
        self.lock().detached = true;
        self
    }

    /// Ids of every clicked element, in order
    pub fn clicks(&self) -> Vec<String> {
        self.lock().clicks.clone()
    }

    pub fn send_clicks(&self) -> usize {
        self.lock().clicks.iter().filter(|id| *id == SEND_ID).count()
    }

    pub fn current_text(&self) -> String {
        let elapsed = self.start.elapsed();
        Self::text_from(&self.lock(), elapsed)
    }

    fn text_from(script: &Script, elapsed: Duration) -> String {
        script
            .timeline
            .iter()
            .rev()
            .find(|(at, _)| *at <= elapsed)
            .map(|(_, text)| text.clone())
            .unwrap_or_default()
    }

    fn stop_visible(script: &Script) -> bool {
        if !script.generating {
            return false;
        }
        match (script.stop_clicked_at, script.stop_lag) {
            (Some(clicked), Some(lag)) => Instant::now() < clicked + lag,
            _ => true,
        }
    }
}

impl DomProbe for ScriptedPage {
    fn find_text_input(&self) -> Option<ElementHandle> {
        self.lock().input_present.then(|| ElementHandle {
            id: INPUT_ID.into(),
            input_kind: InputKind::TextArea,
            rect: None,
        })
    }

    fn read_input_text(&self, _input: &ElementHandle) -> String {
        self.current_text()
    }

    fn find_submit_control(&self) -> Option<ElementHandle> {
        self.lock()
            .send_present
            .then(|| ElementHandle::new(SEND_ID))
    }

    fn find_stop_generating_control(&self) -> Option<ElementHandle> {
        Self::stop_visible(&self.lock()).then(|| ElementHandle::new(STOP_ID))
    }

    fn is_disabled(&self, element: &ElementHandle) -> bool {
        element.id == SEND_ID && self.lock().send_disabled
    }

    fn is_visible(&self, element: &ElementHandle) -> bool {
        match element.id.as_str() {
            STOP_ID => Self::stop_visible(&self.lock()),
            SEND_ID => self.lock().send_present,
            _ => false,
        }
    }
}

impl ClickEmitter for ScriptedPage {
    fn click(&self, element: &ElementHandle, _reason: &str) -> bool {
        let elapsed = self.start.elapsed();
        let mut script = self.lock();
        if script.detached {
            return false;
        }
        script.clicks.push(element.id.clone());

        match element.id.as_str() {
            STOP_ID => {
                script.stop_clicked_at.get_or_insert_with(Instant::now);
            }
            SEND_ID => {
                if script.ignored_sends > 0 {
                    script.ignored_sends -= 1;
                } else {
                    script.timeline.retain(|(at, _)| *at <= elapsed);
                    script.timeline.push((elapsed, String::new()));
                }
            }
            _ => {}
        }
        true
    }
}
