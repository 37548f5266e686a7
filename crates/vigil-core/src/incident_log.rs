//! Bounded, throttled, newest-first feed of integrity incidents.

use chrono::Duration;
use std::sync::Arc;
use vigil_storage::{Incident, IncidentKind, SessionStore};

use crate::clock::Clock;

pub struct IncidentLog {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    throttle: Duration,
    max_len: usize,
}

impl IncidentLog {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        throttle_ms: u64,
        max_len: usize,
    ) -> Self {
        Self {
            store,
            clock,
            throttle: Duration::milliseconds(i64::try_from(throttle_ms).unwrap_or(i64::MAX)),
            max_len: max_len.max(1),
        }
    }

    /// Record an incident unless the newest one is younger than the
    /// throttle window. Returns whether it was recorded.
    ///
    /// Persistence failures are logged and never reach the caller.
    pub fn append(&self, kind: IncidentKind, meta: Option<String>) -> bool {
        let now = self.clock.now();

        match self.store.latest_incident() {
            Ok(Some(latest)) => {
                let age = now.signed_duration_since(latest.at);
                if age >= Duration::zero() && age < self.throttle {
                    log::debug!(
                        "Throttled {kind} incident ({} ms after {})",
                        age.num_milliseconds(),
                        latest.kind
                    );
                    return false;
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Failed to read latest incident: {e}"),
        }

        let incident = Incident::new(kind, now, meta);
        match self.store.prepend_incident(&incident, self.max_len) {
            Ok(()) => {
                log::info!("Incident recorded: {}", incident.kind.label());
                true
            }
            Err(e) => {
                log::warn!("Failed to record {kind} incident: {e}");
                false
            }
        }
    }

    /// Newest first. A storage failure reads as an empty feed.
    #[must_use]
    pub fn entries(&self) -> Vec<Incident> {
        self.store.incidents().unwrap_or_else(|e| {
            log::warn!("Failed to load incidents: {e}");
            Vec::new()
        })
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub fn clear(&self) -> anyhow::Result<()> {
        self.store.clear_incidents()?;
        log::info!("Incident history cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use vigil_storage::MemoryStore;

    fn setup(max_len: usize) -> (Arc<ManualClock>, IncidentLog) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ));
        let log = IncidentLog::new(Arc::new(MemoryStore::new()), clock.clone(), 2_500, max_len);
        (clock, log)
    }

    #[test]
    fn test_append_is_newest_first() {
        let (clock, log) = setup(100);
        assert!(log.append(IncidentKind::Away, None));
        clock.advance_ms(3_000);
        assert!(log.append(IncidentKind::Returned, Some("away for 3s".into())));

        let kinds: Vec<_> = log.entries().iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IncidentKind::Returned, IncidentKind::Away]);
    }

    #[test]
    fn test_throttle_drops_burst() {
        let (clock, log) = setup(100);
        assert!(log.append(IncidentKind::Away, None));
        clock.advance_ms(2_499);
        assert!(!log.append(IncidentKind::WrongPin, None));
        clock.advance_ms(1);
        assert!(log.append(IncidentKind::WrongPin, None));
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let (clock, log) = setup(3);
        for _ in 0..5 {
            log.append(IncidentKind::Away, None);
            clock.advance_ms(3_000);
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].at > entries[2].at);
    }

    #[test]
    fn test_clear_empties_feed() {
        let (_clock, log) = setup(10);
        log.append(IncidentKind::ForcedExit, None);
        log.clear().unwrap();
        assert!(log.entries().is_empty());
    }
}
