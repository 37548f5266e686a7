//! Session lifetime: "active" means a stored end time lies in the future.
//!
//! The end time is the only session state, so a restarted process picks the
//! session back up from the store. Edges are detected by polling `tick`.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use vigil_storage::SessionStore;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEdge {
    Started { end_at: DateTime<Utc> },
    Expired,
}

pub struct SessionClock {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    was_active: bool,
    primed: bool,
}

impl SessionClock {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            was_active: false,
            primed: false,
        }
    }

    #[must_use]
    pub fn end_at(&self) -> Option<DateTime<Utc>> {
        self.store.session_end().unwrap_or_else(|e| {
            log::warn!("Failed to read session end: {e}");
            None
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.end_at().is_some_and(|end| end > self.clock.now())
    }

    /// Time left, or `None` without an active session
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.end_at()
            .filter(|end| *end > now)
            .map(|end| end.signed_duration_since(now))
    }

    /// # Errors
    ///
    /// Returns an error if the end time cannot be persisted.
    pub fn start(&mut self, end_at: DateTime<Utc>) -> anyhow::Result<()> {
        self.store.set_session_end(Some(end_at))?;
        log::info!("Session scheduled to end at {end_at}");
        Ok(())
    }

    /// End the session without reporting an expiry edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.store.set_session_end(None)?;
        self.was_active = false;
        Ok(())
    }

    /// Detect activity edges since the previous tick.
    ///
    /// On the very first tick an end time that has already passed (left over
    /// from a process that died mid-session) is dropped without an edge.
    pub fn tick(&mut self) -> Option<SessionEdge> {
        let end_at = self.end_at();
        let now = self.clock.now();
        let active = end_at.is_some_and(|end| end > now);

        if !self.primed {
            self.primed = true;
            if end_at.is_some() && !active {
                log::info!("Discarding session that ended while we were not running");
                self.clear_store();
            }
        }

        let edge = match (self.was_active, active, end_at) {
            (false, true, Some(end_at)) => Some(SessionEdge::Started { end_at }),
            (true, false, _) => {
                log::info!("Session time is up");
                self.clear_store();
                Some(SessionEdge::Expired)
            }
            _ => None,
        };
        self.was_active = active;
        edge
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.set_session_end(None) {
            log::warn!("Failed to clear session end: {e}");
        }
    }
}
