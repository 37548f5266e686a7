//! In-memory [`SessionStore`] for tests, simulations, and embedders that
//! bring their own persistence.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::models::Incident;
use crate::store::SessionStore;

#[derive(Debug, Default)]
struct MemoryState {
    session_end: Option<DateTime<Utc>>,
    display_name: Option<String>,
    pin: Option<String>,
    reload_marker: Option<DateTime<Utc>>,
    incidents: VecDeque<Incident>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl SessionStore for MemoryStore {
    fn session_end(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state()?.session_end)
    }

    fn set_session_end(&self, end_at: Option<DateTime<Utc>>) -> Result<()> {
        self.state()?.session_end = end_at;
        Ok(())
    }

    fn display_name(&self) -> Result<Option<String>> {
        Ok(self
            .state()?
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty()))
    }

    fn set_display_name(&self, name: Option<&str>) -> Result<()> {
        self.state()?.display_name = name.map(str::to_string);
        Ok(())
    }

    fn pin(&self) -> Result<Option<String>> {
        Ok(self.state()?.pin.clone())
    }

    fn set_pin(&self, pin: &str) -> Result<()> {
        self.state()?.pin = Some(pin.to_string());
        Ok(())
    }

    fn reload_marker(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state()?.reload_marker)
    }

    fn set_reload_marker(&self, at: Option<DateTime<Utc>>) -> Result<()> {
        self.state()?.reload_marker = at;
        Ok(())
    }

    fn incidents(&self) -> Result<Vec<Incident>> {
        Ok(self.state()?.incidents.iter().cloned().collect())
    }

    fn latest_incident(&self) -> Result<Option<Incident>> {
        Ok(self.state()?.incidents.front().cloned())
    }

    fn prepend_incident(&self, incident: &Incident, max_len: usize) -> Result<()> {
        let mut state = self.state()?;
        state.incidents.push_front(incident.clone());
        state.incidents.truncate(max_len);
        Ok(())
    }

    fn clear_incidents(&self) -> Result<()> {
        self.state()?.incidents.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncidentKind;

    #[test]
    fn test_prepend_keeps_newest_first() {
        let store = MemoryStore::new();
        store
            .prepend_incident(&Incident::new(IncidentKind::Away, Utc::now(), None), 10)
            .unwrap();
        store
            .prepend_incident(&Incident::new(IncidentKind::Returned, Utc::now(), None), 10)
            .unwrap();

        let kinds: Vec<_> = store.incidents().unwrap().iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IncidentKind::Returned, IncidentKind::Away]);
    }

    #[test]
    fn test_truncate_evicts_oldest() {
        let store = MemoryStore::new();
        for i in 0..4 {
            let incident = Incident::new(IncidentKind::Away, Utc::now(), Some(i.to_string()));
            store.prepend_incident(&incident, 2).unwrap();
        }
        let metas: Vec<_> = store
            .incidents()
            .unwrap()
            .into_iter()
            .filter_map(|i| i.meta)
            .collect();
        assert_eq!(metas, vec!["3", "2"]);
    }

    #[test]
    fn test_scalars_default_to_absent() {
        let store = MemoryStore::new();
        assert!(store.session_end().unwrap().is_none());
        assert!(store.pin().unwrap().is_none());
        assert!(store.reload_marker().unwrap().is_none());
        assert!(store.latest_incident().unwrap().is_none());
    }
}
