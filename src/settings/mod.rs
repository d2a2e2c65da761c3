//! User settings: the auto-send policy the popup edits
//!
//! Settings live in a key/value [`SettingsStore`] as a JSON object with
//! camelCase keys. Reads merge stored values over defaults and then
//! normalise, so a value of the wrong type falls back to its default.

mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hotkey::Modifier;

pub use store::{FallbackStore, FileStore, MemoryStore, SettingsStore};

pub type SettingsMap = Map<String, Value>;

/// Settings keys that influence the dictation pipeline
pub const PIPELINE_KEYS: [&str; 2] = ["skipKey", "holdToSend"];

/// The value `skipKey` takes when no modifier is bound
pub const NO_MODIFIER: &str = "None";

/// Normalised user settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// `Shift`, `Control`, `Alt` or `None`
    pub skip_key: String,
    pub hold_to_send: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            skip_key: Modifier::Shift.to_string(),
            hold_to_send: false,
        }
    }
}

impl Settings {
    /// Default values as a store map, for `SettingsStore::get`
    pub fn defaults_map() -> SettingsMap {
        Self::default().to_map()
    }

    pub fn to_map(&self) -> SettingsMap {
        let mut map = Map::new();
        map.insert("skipKey".into(), Value::String(self.skip_key.clone()));
        map.insert("holdToSend".into(), Value::Bool(self.hold_to_send));
        map
    }

    /// Build settings from a raw store map, type-checking each key
    pub fn normalize(map: &SettingsMap) -> Self {
        let base = Self::default();

        let skip_key = match map.get("skipKey").and_then(Value::as_str) {
            Some(NO_MODIFIER) => NO_MODIFIER.to_string(),
            Some(key) => match key.parse::<Modifier>() {
                Ok(modifier) => modifier.to_string(),
                Err(_) => base.skip_key,
            },
            None => base.skip_key,
        };
        let hold_to_send = map
            .get("holdToSend")
            .and_then(Value::as_bool)
            .unwrap_or(base.hold_to_send);

        Self {
            skip_key,
            hold_to_send,
        }
    }

    /// The bound modifier, `None` when auto-send ignores the keyboard
    pub fn modifier(&self) -> Option<Modifier> {
        self.skip_key.parse().ok()
    }

    pub fn hint(&self) -> String {
        auto_send_hint(self.modifier(), self.hold_to_send)
    }
}

/// One-line description of the effective auto-send policy
pub fn auto_send_hint(modifier: Option<Modifier>, hold_to_send: bool) -> String {
    match (modifier, hold_to_send) {
        (None, true) => "Auto-send is disabled because no modifier key is selected.".to_string(),
        (None, false) => "Auto-send always happens when you accept dictation.".to_string(),
        (Some(key), true) => {
            format!("Auto-send happens only while holding {key} when you accept dictation.")
        }
        (Some(key), false) => format!("Hold {key} while accepting dictation to skip auto-send."),
    }
}

/// Before/after values of one changed key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
}

/// Keys changed by one `set`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsChange {
    pub changes: BTreeMap<String, ValueChange>,
}

impl SettingsChange {
    /// Diff `values` against what `previous` held for the same keys
    pub fn diff(previous: &SettingsMap, values: &SettingsMap) -> Self {
        let changes = values
            .iter()
            .filter(|(key, new)| previous.get(*key) != Some(*new))
            .map(|(key, new)| {
                (
                    key.clone(),
                    ValueChange {
                        old_value: previous.get(key).cloned(),
                        new_value: Some(new.clone()),
                    },
                )
            })
            .collect();
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether the change touches anything the pipeline reads
    pub fn touches_pipeline(&self) -> bool {
        PIPELINE_KEYS.iter().any(|k| self.changes.contains_key(*k))
    }
}
