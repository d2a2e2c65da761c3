//! Page observation and interaction seams
//!
//! The pipeline never touches markup directly. It reads the page through a
//! [`DomProbe`], decides which buttons matter through a [`ControlMatcher`],
//! and clicks through a [`ClickEmitter`].

mod matcher;
mod mirror;
#[cfg(test)]
pub mod testing;

use serde::{Deserialize, Serialize};

pub use matcher::{ControlMatcher, ElementDescriptor, LabelMatcher};
pub use mirror::{BridgeCommand, PageMirror, PageState};

/// Kind of the composer input element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    TextArea,
    ContentEditable,
    #[default]
    None,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::TextArea => write!(f, "textarea"),
            InputKind::ContentEditable => write!(f, "contenteditable"),
            InputKind::None => write!(f, "none"),
        }
    }
}

/// Element bounding box in viewport coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Click point at the centre, clamped to at least (1, 1)
    pub fn center(&self) -> (i64, i64) {
        let x = (self.left + self.width / 2.0).floor() as i64;
        let y = (self.top + self.height / 2.0).floor() as i64;
        (x.max(1), y.max(1))
    }
}

/// Opaque reference to a page element, valid until the page re-renders it
#[derive(Debug, Clone, PartialEq)]
pub struct ElementHandle {
    pub id: String,
    pub input_kind: InputKind,
    pub rect: Option<Rect>,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input_kind: InputKind::None,
            rect: None,
        }
    }
}

/// Point-in-time reads of the host page
pub trait DomProbe: Send + Sync {
    fn find_text_input(&self) -> Option<ElementHandle>;
    fn read_input_text(&self, input: &ElementHandle) -> String;
    fn find_submit_control(&self) -> Option<ElementHandle>;
    fn find_stop_generating_control(&self) -> Option<ElementHandle>;
    fn is_disabled(&self, element: &ElementHandle) -> bool;
    fn is_visible(&self, element: &ElementHandle) -> bool;
}

/// One step of the synthetic click sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickPhase {
    PointerDown,
    MouseDown,
    PointerUp,
    MouseUp,
    Click,
}

/// The host page's delegated handlers ignore a bare `click`; they need the
/// whole pointer/mouse sequence
pub const SYNTHETIC_CLICK_SEQUENCE: [ClickPhase; 5] = [
    ClickPhase::PointerDown,
    ClickPhase::MouseDown,
    ClickPhase::PointerUp,
    ClickPhase::MouseUp,
    ClickPhase::Click,
];

/// Dispatches a realistic click on a page element
pub trait ClickEmitter: Send + Sync {
    /// Returns false when the click could not be dispatched at all
    fn click(&self, element: &ElementHandle, reason: &str) -> bool;
}

/// Point-in-time read of the composer input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub text: String,
    pub kind: InputKind,
    pub found: bool,
}

impl InputSnapshot {
    pub fn capture(probe: &dyn DomProbe) -> Self {
        match probe.find_text_input() {
            Some(input) => Self {
                text: probe.read_input_text(&input),
                kind: input.input_kind,
                found: true,
            },
            None => Self::default(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Stop control, but only when it is actually on screen
pub fn visible_stop_control(probe: &dyn DomProbe) -> Option<ElementHandle> {
    probe
        .find_stop_generating_control()
        .filter(|el| probe.is_visible(el))
}

/// Collapse whitespace and truncate for log fields
pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
