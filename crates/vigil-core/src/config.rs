use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::signal_fusion::FusionTuning;

/// Get the local data directory for vigil.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("vigil");
    Ok(path)
}

/// Path of the optional `config.toml` inside the data directory.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.toml"))
}

/// Text and sound of a single alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Spoken when no display name is stored
    pub phrase: String,
    /// Spoken when a display name is stored; `{name}` is substituted
    pub named_phrase: String,
    pub notification_title: String,
    pub notification_body: String,
    pub tone_hz: u32,
    pub tone_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            phrase: String::from("Come back! Study time is not over yet!"),
            named_phrase: String::from("{name}, come back! Study time is not over yet!"),
            notification_title: String::from("Come back!"),
            notification_body: String::from("Study time is not over. Return to the app!"),
            tone_hz: 880,
            tone_ms: 800,
        }
    }
}

/// Scheduled study-time reminder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Spoken when the reminder goes off
    pub phrase: String,
    /// Spoken on every repeat
    pub repeat_phrase: String,
    pub notification_title: String,
    pub notification_body: String,
    pub interval_ms: u64,
    /// How long it keeps ringing when `--minutes` is not given; 0 rings until
    /// acknowledged
    pub default_minutes: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            phrase: String::from("Study time! It's time to study!"),
            repeat_phrase: String::from("Study time!"),
            notification_title: String::from("Study time!"),
            notification_body: String::from("It's time to study! Open vigil to start."),
            interval_ms: 30_000,
            default_minutes: 30,
        }
    }
}

/// Tuning knobs for the presence guard.
///
/// Timing margins are heuristics rather than settled values, so all of them
/// are configurable. Unknown or missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Wait after a leave-type signal before classifying it
    pub confirm_delay_ms: u64,
    /// Lateness beyond `confirm_delay_ms` that means the runtime was frozen
    pub suspend_tolerance_ms: u64,
    /// Window in which near-simultaneous leave signals are coalesced
    pub reentrancy_lock_ms: u64,
    /// How long after a reload notice leave/return signals are ignored
    pub reload_window_ms: u64,
    /// Cadence of the nag loop while away
    pub alarm_interval_ms: u64,
    /// Minimum spacing between two incidents
    pub incident_throttle_ms: u64,
    /// Incident feed length cap
    pub max_incidents: usize,
    /// Session expiry poll period
    pub session_poll_ms: u64,
    /// Record `ScreenOff` incidents
    pub log_screen_off: bool,
    /// Record session start/completion incidents
    pub log_session_events: bool,
    /// PIN accepted when the user never set one
    pub default_pin: String,
    /// Whether the user granted notification permission
    pub notifications_granted: bool,
    pub alert: AlertConfig,
    pub reminder: ReminderConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            confirm_delay_ms: 1_100,
            suspend_tolerance_ms: 500,
            reentrancy_lock_ms: 600,
            reload_window_ms: 3_000,
            alarm_interval_ms: 10_000,
            incident_throttle_ms: 2_500,
            max_incidents: 100,
            session_poll_ms: 1_000,
            log_screen_off: true,
            log_session_events: false,
            default_pin: String::from("0000"),
            notifications_granted: true,
            alert: AlertConfig::default(),
            reminder: ReminderConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Load from the default location, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only if the data directory cannot be determined.
    pub fn load() -> Result<Self> {
        Ok(Self::load_from(&config_path()?))
    }

    /// Load from `path`. A missing or malformed file yields the defaults.
    #[must_use]
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Failed to read {}: {e}; using defaults", path.display());
                return Self::default();
            }
        };

        match toml::from_str::<Self>(&raw) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                log::warn!("Malformed config {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the config as TOML, creating the parent directory.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    #[must_use]
    pub fn fusion_tuning(&self) -> FusionTuning {
        FusionTuning {
            confirm_delay_ms: self.confirm_delay_ms,
            suspend_tolerance_ms: self.suspend_tolerance_ms,
            reentrancy_lock_ms: self.reentrancy_lock_ms,
            reload_window_ms: self.reload_window_ms,
        }
    }

    /// Clamp values that would make the guard spin or never fire
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.alarm_interval_ms < 1_000 {
            log::warn!(
                "alarm_interval_ms {} is too small, using {}",
                self.alarm_interval_ms,
                defaults.alarm_interval_ms
            );
            self.alarm_interval_ms = defaults.alarm_interval_ms;
        }
        if self.reminder.interval_ms < 1_000 {
            log::warn!(
                "reminder.interval_ms {} is too small, using {}",
                self.reminder.interval_ms,
                defaults.reminder.interval_ms
            );
            self.reminder.interval_ms = defaults.reminder.interval_ms;
        }
        if self.session_poll_ms == 0 {
            self.session_poll_ms = defaults.session_poll_ms;
        }
        if self.max_incidents == 0 {
            self.max_incidents = defaults.max_incidents;
        }
        if crate::pin::validate_pin(&self.default_pin).is_err() {
            log::warn!("default_pin must be 4 digits, using {}", defaults.default_pin);
            self.default_pin = defaults.default_pin;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GuardConfig::load_from(&dir.path().join("config.toml"));
        assert_eq!(config, GuardConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "suspend_tolerance_ms = 700\nlog_screen_off = false\n").unwrap();

        let config = GuardConfig::load_from(&path);
        assert_eq!(config.suspend_tolerance_ms, 700);
        assert!(!config.log_screen_off);
        assert_eq!(config.confirm_delay_ms, 1_100);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "confirm_delay_ms = \"soon\"").unwrap();

        assert_eq!(GuardConfig::load_from(&path), GuardConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = GuardConfig {
            alarm_interval_ms: 15_000,
            ..GuardConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(GuardConfig::load_from(&path), config);
    }

    #[test]
    fn test_sanitize_rejects_bad_values() {
        let config = GuardConfig {
            alarm_interval_ms: 5,
            default_pin: String::from("12ab"),
            ..GuardConfig::default()
        }
        .sanitized();
        assert_eq!(config.alarm_interval_ms, 10_000);
        assert_eq!(config.default_pin, "0000");
    }

    #[test]
    fn test_reminder_section_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reminder]\ndefault_minutes = 90\n").unwrap();

        let config = GuardConfig::load_from(&path);
        assert_eq!(config.reminder.default_minutes, 90);
        assert_eq!(config.reminder.interval_ms, 30_000);
        assert_eq!(config.alert, AlertConfig::default());
    }
}
