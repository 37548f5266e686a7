//! SQLite-backed [`SessionStore`].
//!
//! Scalar values live in `guard_state` as text; the incident feed has its own
//! table (see `incidents`). Values that fail to parse are logged and read back
//! as absent.

mod helpers;
mod incidents;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::migrations;
use crate::models::Incident;
use crate::store::{keys, SessionStore};

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection
    ///
    /// # Errors
    ///
    /// Returns an error if database directory creation, connection opening, or schema initialization fails
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        migrations::init_schema(&conn)?;

        log::info!("Database initialized at: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        migrations::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get default database path
    #[must_use]
    pub fn default_db_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("vigil");
        path.push("vigil.db");
        path
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM guard_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        match value {
            Some(value) => {
                conn.execute(
                    "INSERT INTO guard_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                    params![key, value, Utc::now().to_rfc3339()],
                )?;
            }
            None => {
                conn.execute("DELETE FROM guard_state WHERE key = ?1", params![key])?;
            }
        }
        Ok(())
    }

    fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_value(key)?
            .and_then(|raw| match helpers::parse_datetime(&raw) {
                Ok(at) => Some(at),
                Err(e) => {
                    log::warn!("Ignoring malformed {key} value '{raw}': {e}");
                    None
                }
            }))
    }

    fn set_timestamp(&self, key: &str, at: Option<DateTime<Utc>>) -> Result<()> {
        let raw = at.map(|at| at.to_rfc3339());
        self.set_value(key, raw.as_deref())
    }
}

impl SessionStore for Database {
    fn session_end(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_timestamp(keys::SESSION_END)
    }

    fn set_session_end(&self, end_at: Option<DateTime<Utc>>) -> Result<()> {
        self.set_timestamp(keys::SESSION_END, end_at)
    }

    fn display_name(&self) -> Result<Option<String>> {
        Ok(self
            .get_value(keys::DISPLAY_NAME)?
            .filter(|name| !name.trim().is_empty()))
    }

    fn set_display_name(&self, name: Option<&str>) -> Result<()> {
        self.set_value(keys::DISPLAY_NAME, name)
    }

    fn pin(&self) -> Result<Option<String>> {
        self.get_value(keys::PIN)
    }

    fn set_pin(&self, pin: &str) -> Result<()> {
        self.set_value(keys::PIN, Some(pin))
    }

    fn reload_marker(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_timestamp(keys::RELOAD_MARKER)
    }

    fn set_reload_marker(&self, at: Option<DateTime<Utc>>) -> Result<()> {
        self.set_timestamp(keys::RELOAD_MARKER, at)
    }

    fn incidents(&self) -> Result<Vec<Incident>> {
        self.list_incidents(None)
    }

    fn latest_incident(&self) -> Result<Option<Incident>> {
        Ok(self.list_incidents(Some(1))?.into_iter().next())
    }

    fn prepend_incident(&self, incident: &Incident, max_len: usize) -> Result<()> {
        self.insert_incident(incident, max_len)
    }

    fn clear_incidents(&self) -> Result<()> {
        self.delete_all_incidents()
    }
}
