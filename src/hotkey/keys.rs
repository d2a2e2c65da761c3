//! Modifier key definitions and state tracking
//!
//! Provides the modifier keys the auto-send policy can be bound to and a
//! struct for tracking which of them are currently pressed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A modifier key the auto-send policy can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modifier {
    Shift,
    Control,
    Alt,
}

impl Modifier {
    /// Map a `KeyboardEvent.key` name to a modifier
    pub fn from_key_name(key: &str) -> Option<Self> {
        match key {
            "Shift" => Some(Self::Shift),
            "Control" | "Ctrl" => Some(Self::Control),
            "Alt" => Some(Self::Alt),
            _ => None,
        }
    }

    /// Name as stored in the settings store and shown to the user
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shift => "Shift",
            Self::Control => "Control",
            Self::Alt => "Alt",
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modifier {
    type Err = UnknownModifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key_name(s).ok_or_else(|| UnknownModifier(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown modifier key: {0:?}")]
pub struct UnknownModifier(pub String);

/// Whether a key event is a press or a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Down,
    Up,
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierState {
    /// Shift key is held
    #[serde(default)]
    pub shift: bool,
    /// Control key is held
    #[serde(default)]
    pub ctrl: bool,
    /// Alt key is held
    #[serde(default)]
    pub alt: bool,
}

impl ModifierState {
    /// Check if all modifiers are released
    pub fn is_empty(&self) -> bool {
        !self.shift && !self.ctrl && !self.alt
    }

    /// Read the flag for one modifier
    pub fn get(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Shift => self.shift,
            Modifier::Control => self.ctrl,
            Modifier::Alt => self.alt,
        }
    }

    /// Set the flag for one modifier
    pub fn set(&mut self, modifier: Modifier, held: bool) {
        match modifier {
            Modifier::Shift => self.shift = held,
            Modifier::Control => self.ctrl = held,
            Modifier::Alt => self.alt = held,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state() {
        let state = ModifierState::default();
        assert!(state.is_empty());
        assert!(!state.get(Modifier::Shift));
    }

    #[test]
    fn test_key_names() {
        assert_eq!(Modifier::from_key_name("Shift"), Some(Modifier::Shift));
        assert_eq!(Modifier::from_key_name("Ctrl"), Some(Modifier::Control));
        assert_eq!(Modifier::from_key_name("Control"), Some(Modifier::Control));
        assert_eq!(Modifier::from_key_name("Alt"), Some(Modifier::Alt));
        assert_eq!(Modifier::from_key_name("Meta"), None);
        assert!("None".parse::<Modifier>().is_err());
    }

    #[test]
    fn test_set_and_get() {
        let mut state = ModifierState::default();
        state.set(Modifier::Alt, true);
        assert!(state.alt);
        assert!(state.get(Modifier::Alt));
        assert!(!state.get(Modifier::Control));
        assert!(!state.is_empty());

        state.set(Modifier::Alt, false);
        assert!(state.is_empty());
    }
}
