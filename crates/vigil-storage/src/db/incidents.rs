//! Incident feed operations

use anyhow::Result;
use rusqlite::params;

use super::helpers::{parse_datetime, parse_uuid};
use super::Database;
use crate::models::{Incident, IncidentKind};

type RawIncident = (String, String, String, Option<String>);

impl Database {
    /// Insert an incident and trim the feed to `max_len` entries
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or the trim fails
    pub(crate) fn insert_incident(&self, incident: &Incident, max_len: usize) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO incidents (id, kind, at, meta) VALUES (?1, ?2, ?3, ?4)",
            params![
                incident.id.to_string(),
                incident.kind.to_string(),
                incident.at.to_rfc3339(),
                incident.meta,
            ],
        )?;

        let keep = i64::try_from(max_len).unwrap_or(i64::MAX);
        let evicted = tx.execute(
            "DELETE FROM incidents WHERE seq NOT IN (
                SELECT seq FROM incidents ORDER BY seq DESC LIMIT ?1
            )",
            params![keep],
        )?;
        tx.commit()?;

        if evicted > 0 {
            log::debug!("Evicted {evicted} old incident(s)");
        }
        Ok(())
    }

    /// List incidents newest first, skipping rows that cannot be decoded
    ///
    /// # Errors
    ///
    /// Returns an error if the query itself fails
    pub(crate) fn list_incidents(&self, limit: Option<usize>) -> Result<Vec<Incident>> {
        let conn = self.conn()?;
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare(
            "SELECT id, kind, at, meta FROM incidents ORDER BY seq DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<RawIncident>, _>>()?;

        Ok(rows.into_iter().filter_map(decode_incident).collect())
    }

    pub(crate) fn delete_all_incidents(&self) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM incidents", [])?;
        log::info!("Cleared {removed} incident(s)");
        Ok(())
    }
}

fn decode_incident((id, kind, at, meta): RawIncident) -> Option<Incident> {
    let decoded = parse_uuid(&id).ok().and_then(|id| {
        let kind = kind.parse::<IncidentKind>().ok()?;
        let at = parse_datetime(&at).ok()?;
        Some(Incident { id, kind, at, meta })
    });
    if decoded.is_none() {
        log::warn!("Skipping malformed incident row {id}");
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_malformed_rows_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        db.insert_incident(&Incident::new(IncidentKind::Away, Utc::now(), None), 10)
            .unwrap();
        {
            let conn = db.conn().unwrap();
            conn.execute(
                "INSERT INTO incidents (id, kind, at, meta) VALUES ('x', 'teleported', 'yesterday', NULL)",
                [],
            )
            .unwrap();
        }

        let incidents = db.list_incidents(None).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind, IncidentKind::Away);
    }

    #[test]
    fn test_limit_returns_newest() {
        let db = Database::open_in_memory().unwrap();
        db.insert_incident(&Incident::new(IncidentKind::Away, Utc::now(), None), 10)
            .unwrap();
        db.insert_incident(&Incident::new(IncidentKind::Returned, Utc::now(), None), 10)
            .unwrap();

        let latest = db.list_incidents(Some(1)).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].kind, IncidentKind::Returned);
    }
}
