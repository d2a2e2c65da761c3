//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::hotkey::Modifier;
use crate::settings::Settings;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// JSON file holding user settings
    pub settings_path: PathBuf,

    /// Pipeline defaults before user settings are applied
    pub dictation: DictationConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("dictation-autosend");

        let socket_path = data_dir.join("daemon.sock");
        let settings_path = data_dir.join("settings.json");

        let mut dictation = DictationConfig::default();
        dictation.apply_env(|name| std::env::var(name).ok());

        Ok(Self {
            socket_path,
            data_dir,
            settings_path,
            dictation,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

/// Policy and timing for one dictation pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictationConfig {
    pub enabled: bool,
    /// Send only while the modifier is held (instead of skipping while held)
    pub hold_to_send: bool,
    /// `None` disables every held-query
    pub modifier: Option<Modifier>,
    pub modifier_grace: Duration,
    pub final_text_timeout: Duration,
    pub final_text_quiet: Duration,
    pub send_ack_timeout: Duration,
    pub stop_generating_timeout: Duration,
}

impl Default for DictationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hold_to_send: false,
            modifier: Some(Modifier::Shift),
            modifier_grace: Duration::from_millis(1600),
            final_text_timeout: Duration::from_millis(25_000),
            final_text_quiet: Duration::from_millis(320),
            send_ack_timeout: Duration::from_millis(4500),
            stop_generating_timeout: Duration::from_millis(20_000),
        }
    }
}

impl DictationConfig {
    /// Apply `AUTOSEND_*` overrides; unparsable values are reported and skipped
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let millis = |name: &str, target: &mut Duration| {
            let Some(raw) = lookup(name) else { return };
            match raw.trim().parse::<u64>() {
                Ok(ms) => *target = Duration::from_millis(ms),
                Err(e) => warn!(name, value = %raw, error = %e, "ignoring invalid override"),
            }
        };

        millis("AUTOSEND_MODIFIER_GRACE_MS", &mut self.modifier_grace);
        millis("AUTOSEND_FINAL_TEXT_TIMEOUT_MS", &mut self.final_text_timeout);
        millis("AUTOSEND_FINAL_TEXT_QUIET_MS", &mut self.final_text_quiet);
        millis("AUTOSEND_SEND_ACK_TIMEOUT_MS", &mut self.send_ack_timeout);
        millis("AUTOSEND_STOP_TIMEOUT_MS", &mut self.stop_generating_timeout);

        if let Some(raw) = lookup("AUTOSEND_ENABLED") {
            match raw.trim().parse::<bool>() {
                Ok(enabled) => self.enabled = enabled,
                Err(e) => warn!(value = %raw, error = %e, "ignoring invalid AUTOSEND_ENABLED"),
            }
        }
    }

    /// Copy of this config with the user-controlled policy replaced
    pub fn with_settings(&self, settings: &Settings) -> Self {
        Self {
            hold_to_send: settings.hold_to_send,
            modifier: settings.modifier(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.socket_path.to_string_lossy().contains("dictation-autosend"));
        assert!(config.settings_path.ends_with("settings.json"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AUTOSEND_MODIFIER_GRACE_MS", "0"),
            ("AUTOSEND_FINAL_TEXT_QUIET_MS", " 500 "),
            ("AUTOSEND_SEND_ACK_TIMEOUT_MS", "soon"),
            ("AUTOSEND_ENABLED", "false"),
        ]);
        let mut config = DictationConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.modifier_grace, Duration::ZERO);
        assert_eq!(config.final_text_quiet, Duration::from_millis(500));
        assert_eq!(config.send_ack_timeout, Duration::from_millis(4500));
        assert!(!config.enabled);
    }

    #[test]
    fn test_with_settings_keeps_timings() {
        let base = DictationConfig {
            final_text_quiet: Duration::from_millis(10),
            ..Default::default()
        };
        let settings = Settings {
            skip_key: "None".into(),
            hold_to_send: true,
        };
        let config = base.with_settings(&settings);
        assert!(config.hold_to_send);
        assert_eq!(config.modifier, None);
        assert_eq!(config.final_text_quiet, Duration::from_millis(10));
    }
}
