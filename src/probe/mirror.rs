//! Daemon-side mirror of the host page
//!
//! The page bridge pushes a [`PageState`] whenever the page changes. The
//! mirror answers probe queries from the latest state and turns clicks into
//! [`BridgeCommand`]s for the bridge to replay.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{
    ClickEmitter, ClickPhase, ControlMatcher, DomProbe, ElementDescriptor, ElementHandle,
    InputKind, Rect, SYNTHETIC_CLICK_SEQUENCE,
};

/// The composer input as seen by the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputElement {
    pub id: String,
    pub kind: InputKind,
    #[serde(default)]
    pub text: String,
}

/// A button as seen by the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonElement {
    pub id: String,
    #[serde(flatten)]
    pub descriptor: ElementDescriptor,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub rect: Option<Rect>,
}

/// Everything the pipeline needs to know about the page at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    #[serde(default)]
    pub input: Option<InputElement>,
    #[serde(default)]
    pub buttons: Vec<ButtonElement>,
}

/// Instructions from the daemon to the page bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Replay `sequence` on the element at client coordinates (x, y)
    DispatchClick {
        element_id: String,
        x: i64,
        y: i64,
        sequence: Vec<ClickPhase>,
        reason: String,
    },
}

/// [`DomProbe`] and [`ClickEmitter`] backed by bridge-pushed page state
pub struct PageMirror {
    state: RwLock<PageState>,
    matcher: Arc<dyn ControlMatcher>,
    command_tx: broadcast::Sender<BridgeCommand>,
}

impl PageMirror {
    pub fn new(matcher: Arc<dyn ControlMatcher>) -> Self {
        let (command_tx, _) = broadcast::channel(32);
        Self {
            state: RwLock::new(PageState::default()),
            matcher,
            command_tx,
        }
    }

    /// Replace the mirrored page state
    pub fn update(&self, state: PageState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Receive click commands destined for the bridge
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeCommand> {
        self.command_tx.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, PageState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn button_handle(button: &ButtonElement) -> ElementHandle {
        ElementHandle {
            rect: button.rect,
            ..ElementHandle::new(button.id.as_str())
        }
    }
}

impl DomProbe for PageMirror {
    fn find_text_input(&self) -> Option<ElementHandle> {
        self.read().input.as_ref().map(|input| ElementHandle {
            id: input.id.clone(),
            input_kind: input.kind,
            rect: None,
        })
    }

    fn read_input_text(&self, input: &ElementHandle) -> String {
        match &self.read().input {
            Some(current) if current.id == input.id => current.text.replace('\u{a0}', " "),
            _ => String::new(),
        }
    }

    fn find_submit_control(&self) -> Option<ElementHandle> {
        let state = self.read();
        state
            .buttons
            .iter()
            .filter_map(|b| self.matcher.send_priority(&b.descriptor).map(|p| (p, b)))
            .min_by_key(|(priority, _)| *priority)
            .map(|(_, b)| Self::button_handle(b))
    }

    fn find_stop_generating_control(&self) -> Option<ElementHandle> {
        let state = self.read();
        state
            .buttons
            .iter()
            .filter(|b| self.matcher.is_stop_generating(&b.descriptor))
            .find(|b| b.visible)
            .map(Self::button_handle)
    }

    fn is_disabled(&self, element: &ElementHandle) -> bool {
        self.read()
            .buttons
            .iter()
            .find(|b| b.id == element.id)
            .map_or(true, |b| b.disabled)
    }

    fn is_visible(&self, element: &ElementHandle) -> bool {
        self.read()
            .buttons
            .iter()
            .find(|b| b.id == element.id)
            .is_some_and(|b| b.visible)
    }
}

impl ClickEmitter for PageMirror {
    fn click(&self, element: &ElementHandle, reason: &str) -> bool {
        let (x, y) = element.rect.unwrap_or_default().center();
        let command = BridgeCommand::DispatchClick {
            element_id: element.id.clone(),
            x,
            y,
            sequence: SYNTHETIC_CLICK_SEQUENCE.to_vec(),
            reason: reason.to_string(),
        };

        match self.command_tx.send(command) {
            Ok(receivers) => {
                debug!(element = %element.id, reason, receivers, "click dispatched to bridge");
                true
            }
            Err(_) => {
                warn!(element = %element.id, reason, "no bridge connected, click dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::LabelMatcher;

    fn button(id: &str, aria: &str, visible: bool, disabled: bool) -> ButtonElement {
        ButtonElement {
            id: id.into(),
            descriptor: ElementDescriptor {
                tag: "button".into(),
                aria_label: Some(aria.into()),
                ..Default::default()
            },
            disabled,
            visible,
            rect: Some(Rect {
                left: 100.0,
                top: 200.0,
                width: 40.0,
                height: 40.0,
            }),
        }
    }

    fn mirror_with(state: PageState) -> PageMirror {
        let mirror = PageMirror::new(Arc::new(LabelMatcher));
        mirror.update(state);
        mirror
    }

    #[test]
    fn test_empty_page() {
        let mirror = mirror_with(PageState::default());
        assert!(mirror.find_text_input().is_none());
        assert!(mirror.find_submit_control().is_none());
        assert!(mirror.find_stop_generating_control().is_none());
        assert!(mirror.is_disabled(&ElementHandle::new("missing")));
        assert!(!mirror.is_visible(&ElementHandle::new("missing")));
    }

    #[test]
    fn test_input_text_is_read_by_id() {
        let mirror = mirror_with(PageState {
            input: Some(InputElement {
                id: "prompt".into(),
                kind: InputKind::ContentEditable,
                text: "hello\u{a0}there".into(),
            }),
            buttons: vec![],
        });

        let input = mirror.find_text_input().unwrap();
        assert_eq!(input.input_kind, InputKind::ContentEditable);
        assert_eq!(mirror.read_input_text(&input), "hello there");
        assert_eq!(mirror.read_input_text(&ElementHandle::new("stale")), "");
    }

    #[test]
    fn test_submit_control_prefers_test_id() {
        let mut by_test_id = button("b2", "", true, false);
        by_test_id.descriptor.test_id = Some("send-button".into());
        let mirror = mirror_with(PageState {
            input: None,
            buttons: vec![button("b1", "Send prompt", true, false), by_test_id],
        });

        assert_eq!(mirror.find_submit_control().unwrap().id, "b2");
    }

    #[test]
    fn test_stop_control_must_be_visible() {
        let mirror = mirror_with(PageState {
            input: None,
            buttons: vec![
                button("hidden", "Stop generating", false, false),
                button("shown", "Stop streaming", true, false),
            ],
        });

        let stop = mirror.find_stop_generating_control().unwrap();
        assert_eq!(stop.id, "shown");
        assert!(mirror.is_visible(&stop));
    }

    #[test]
    fn test_click_without_bridge_fails() {
        let mirror = mirror_with(PageState::default());
        assert!(!mirror.click(&ElementHandle::new("x"), "send"));
    }

    #[tokio::test]
    async fn test_click_is_broadcast_to_bridge() {
        let mirror = mirror_with(PageState {
            input: None,
            buttons: vec![button("send", "Send prompt", true, false)],
        });
        let mut rx = mirror.subscribe();

        let send = mirror.find_submit_control().unwrap();
        assert!(mirror.click(&send, "send"));

        let BridgeCommand::DispatchClick {
            element_id,
            x,
            y,
            sequence,
            reason,
        } = rx.recv().await.unwrap();
        assert_eq!(element_id, "send");
        assert_eq!((x, y), (120, 220));
        assert_eq!(sequence, SYNTHETIC_CLICK_SEQUENCE.to_vec());
        assert_eq!(reason, "send");
    }

    #[test]
    fn test_page_state_wire_format() {
        let json = r#"{
            "input": {"id": "prompt-textarea", "kind": "textarea", "text": "hi"},
            "buttons": [{"id": "b", "tag": "button", "aria_label": "Send prompt", "visible": true}]
        }"#;
        let state: PageState = serde_json::from_str(json).unwrap();
        let input = state.input.unwrap();
        assert_eq!(input.kind, InputKind::TextArea);
        assert_eq!(input.text, "hi");
        assert_eq!(state.buttons[0].descriptor.aria_label.as_deref(), Some("Send prompt"));
        assert!(!state.buttons[0].disabled);
    }
}
