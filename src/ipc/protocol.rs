//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! The page bridge and the settings popup both speak this protocol.

use serde::{Deserialize, Serialize};

use crate::events::PipelineEvent;
use crate::hotkey::{KeyPhase, ModifierState};
use crate::probe::{BridgeCommand, PageState};
use crate::settings::Settings;
use crate::state::{ClickEvent, State, TriggerOutcome};

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Transport-level failures on one connection
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Requests from clients to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to bridge commands and pipeline notifications
    Subscribe,

    /// A keyboard event seen on the page
    Key { phase: KeyPhase, key: String },

    /// The page window lost focus
    Blur,

    /// A click seen on the page, capture phase
    Click(ClickEvent),

    /// Fresh snapshot of the composer and its buttons
    PageState(PageState),

    /// Read the user settings
    GetSettings,

    /// Update user settings; omitted fields are left alone
    SetSettings {
        #[serde(default)]
        skip_key: Option<String>,
        #[serde(default)]
        hold_to_send: Option<bool>,
    },
}

/// Responses from daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// Request applied, nothing to report
    Ack,

    /// What the click did
    ClickResult { outcome: TriggerOutcome },

    /// Effective settings and the policy sentence for them
    Settings { settings: Settings, hint: String },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl std::fmt::Display) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The bridge should replay a click on the page
    DispatchClick(BridgeCommand),

    /// The orchestrator changed state
    StateChanged { state: State, previous: State },

    /// A pipeline event occurred
    PipelineEvent { event: PipelineEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current orchestrator state
    pub state: State,

    /// Whether a run is in flight
    pub in_flight: bool,

    /// Whether a late modifier press would still count for the current run
    pub grace_active: bool,

    /// Modifier keys the page currently reports as held
    pub held: ModifierState,

    /// Whether auto-send reacts to dictation at all
    pub enabled: bool,

    /// Whether a page bridge has pushed page state
    pub page_connected: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: State::Idle,
            in_flight: false,
            grace_active: false,
            held: ModifierState::default(),
            enabled: true,
            page_connected: false,
            uptime_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ClickPhase;

    #[test]
    fn test_request_serialization() {
        let req = Request::Key {
            phase: KeyPhase::Down,
            key: "Shift".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"key\""));
        assert!(json.contains("\"phase\":\"down\""));
    }

    #[test]
    fn test_click_request_deserialization() {
        let json = r#"{
            "type": "click",
            "trusted": true,
            "target": {"tag": "button", "aria_label": "Submit dictation"},
            "modifiers": {"shift": true}
        }"#;
        let req: Request = serde_json::from_str(json).unwrap();
        let Request::Click(click) = req else {
            panic!("expected click request");
        };
        assert!(click.trusted);
        assert!(click.modifiers.shift);
        assert_eq!(
            click.target.unwrap().aria_label.as_deref(),
            Some("Submit dictation")
        );
    }

    #[test]
    fn test_set_settings_fields_are_optional() {
        let req: Request =
            serde_json::from_str(r#"{"type":"set_settings","hold_to_send":true}"#).unwrap();
        assert!(matches!(
            req,
            Request::SetSettings {
                skip_key: None,
                hold_to_send: Some(true)
            }
        ));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"state\":\"idle\""));

        let resp = Response::ClickResult {
            outcome: TriggerOutcome::Dropped,
        };
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"type":"click_result","outcome":"dropped"}"#
        );
    }

    #[test]
    fn test_dispatch_click_notification() {
        let note = Notification::DispatchClick(BridgeCommand::DispatchClick {
            element_id: "send".into(),
            x: 120,
            y: 220,
            sequence: vec![ClickPhase::Click],
            reason: "send".into(),
        });
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "dispatch_click");
        assert_eq!(value["command"], "dispatch_click");
        assert_eq!(value["element_id"], "send");
    }

    #[test]
    fn test_pipeline_event_notification() {
        let note = Notification::PipelineEvent {
            event: PipelineEvent::RunDropped,
        };
        assert_eq!(
            serde_json::to_string(&note).unwrap(),
            r#"{"type":"pipeline_event","event":{"type":"run_dropped"}}"#
        );
    }
}
