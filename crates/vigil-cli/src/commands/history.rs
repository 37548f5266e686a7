use anyhow::Result;
use tabled::{Table, Tabled};
use vigil_storage::Incident;

use super::helpers::{format_local, open_records, truncate_str};

#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Details")]
    details: String,
}

impl From<&Incident> for IncidentRow {
    fn from(incident: &Incident) -> Self {
        let label = incident.kind.label();
        Self {
            when: format_local(incident.at),
            event: if incident.kind.is_security() {
                format!("! {label}")
            } else {
                label.to_string()
            },
            details: incident
                .meta
                .as_deref()
                .map_or_else(String::new, |meta| truncate_str(meta, 40)),
        }
    }
}

pub fn show_history(limit: Option<usize>, json: bool) -> Result<()> {
    let mut incidents = open_records()?.incidents.entries();
    if let Some(limit) = limit {
        incidents.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&incidents)?);
        return Ok(());
    }

    if incidents.is_empty() {
        println!("No incidents recorded.");
        return Ok(());
    }

    let rows: Vec<IncidentRow> = incidents.iter().map(IncidentRow::from).collect();
    println!("{}", Table::new(rows));
    println!("\n{} incident(s), newest first", incidents.len());
    Ok(())
}

pub fn clear_history(pin: &str) -> Result<()> {
    let records = open_records()?;
    records.pins.verify(pin, &records.incidents)?;
    records.incidents.clear()?;
    println!("Incident history cleared.");
    Ok(())
}
