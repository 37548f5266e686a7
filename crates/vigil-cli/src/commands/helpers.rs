//! Helper utility functions for CLI commands

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use vigil_core::{
    pin::PinGate, Clock, GuardConfig, GuardParts, IncidentLog, PresenceGuard, SystemClock,
};
use vigil_storage::{Database, SessionStore};

/// Safely truncate a string to a maximum number of characters (not bytes).
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        s.to_string()
    }
}

/// `HH:MM:SS` for a number of seconds
pub fn format_hms(total_secs: i64) -> String {
    let secs = total_secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Incident feed and PIN gate without the rest of the guard.
///
/// Building a full guard would consume a pending reload marker, so commands
/// that only read history or manage the PIN go through here.
pub struct Records {
    pub incidents: IncidentLog,
    pub pins: PinGate,
}

impl Records {
    pub fn new(config: &GuardConfig, store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            incidents: IncidentLog::new(
                store.clone(),
                clock,
                config.incident_throttle_ms,
                config.max_incidents,
            ),
            pins: PinGate::new(store, config.default_pin.clone()),
        }
    }
}

pub fn open_records() -> Result<Records> {
    let config = GuardConfig::load()?;
    let store: Arc<dyn SessionStore> = Arc::new(Database::new(None)?);
    Ok(Records::new(&config, store, Arc::new(SystemClock::new())))
}

/// Headless guard over the on-disk store, for session commands
pub fn open_guard() -> Result<PresenceGuard> {
    let config = GuardConfig::load()?;
    let store = Arc::new(Database::new(None)?);
    Ok(PresenceGuard::new(
        config,
        store,
        Arc::new(SystemClock::new()),
        GuardParts::default(),
    ))
}
