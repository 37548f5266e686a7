//! The narrow persistence contract shared by every guard component.
//!
//! Components never reach into ambient storage; they receive an
//! `Arc<dyn SessionStore>` and read or write only through these methods.
//! Implementations must treat malformed persisted data as absent.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::Incident;

/// Key names for the scalar values kept by a store
pub mod keys {
    pub const SESSION_END: &str = "session_end";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const PIN: &str = "pin";
    pub const RELOAD_MARKER: &str = "reload_marker";
}

pub trait SessionStore: Send + Sync {
    /// When the current study session ends, if one was started
    fn session_end(&self) -> Result<Option<DateTime<Utc>>>;

    fn set_session_end(&self, end_at: Option<DateTime<Utc>>) -> Result<()>;

    fn display_name(&self) -> Result<Option<String>>;

    fn set_display_name(&self, name: Option<&str>) -> Result<()>;

    /// Parental PIN, `None` when the user never set one
    fn pin(&self) -> Result<Option<String>>;

    fn set_pin(&self, pin: &str) -> Result<()>;

    /// Timestamp of the last "page is about to reload" notice
    fn reload_marker(&self) -> Result<Option<DateTime<Utc>>>;

    fn set_reload_marker(&self, at: Option<DateTime<Utc>>) -> Result<()>;

    /// All incidents, newest first
    fn incidents(&self) -> Result<Vec<Incident>>;

    /// The most recently appended incident
    fn latest_incident(&self) -> Result<Option<Incident>> {
        Ok(self.incidents()?.into_iter().next())
    }

    /// Insert at the front of the feed and evict the oldest entries beyond `max_len`
    fn prepend_incident(&self, incident: &Incident, max_len: usize) -> Result<()>;

    fn clear_incidents(&self) -> Result<()>;
}
