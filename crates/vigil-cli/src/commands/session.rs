//! Session lifecycle commands

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use std::path::Path;
use vigil_core::{
    ipc::{IpcClient, IpcRequest, IpcResponse},
    AlarmState, GuardStatus,
};
use vigil_storage::{Database, SessionStore};

use super::helpers::{format_hms, format_local, open_guard};

pub fn start(minutes: u32, name: Option<&str>) -> Result<()> {
    if minutes == 0 {
        bail!("Session length must be at least one minute");
    }

    let mut guard = open_guard()?;
    if let Some(name) = name {
        guard.set_display_name(Some(name))?;
    }

    let end_at = Utc::now() + Duration::minutes(i64::from(minutes));
    guard.start_session(end_at)?;

    println!("Study session started: {minutes} min, ends at {}", format_local(end_at));
    println!("Run `vigil watch` to guard it.");
    Ok(())
}

pub async fn stop(data_dir: &Path, pin: &str) -> Result<()> {
    let client = IpcClient::new(&data_dir.join("vigil.sock"));
    if client.socket_exists() {
        match client
            .send_command(IpcRequest::ClearSession(pin.to_string()))
            .await
        {
            Ok(IpcResponse::Ack) => {
                println!("Session ended.");
                return Ok(());
            }
            Ok(IpcResponse::Error(message)) => bail!(message),
            Ok(resp) => log::warn!("Unexpected response from daemon: {resp:?}"),
            Err(e) => log::warn!("Daemon not responding ({e}), ending session locally"),
        }
    }

    open_guard()?.clear_session(pin)?;
    println!("Session ended.");
    Ok(())
}

pub async fn show_status(data_dir: &Path) -> Result<()> {
    let client = IpcClient::new(&data_dir.join("vigil.sock"));
    if client.socket_exists() {
        match client.send_command(IpcRequest::Status).await {
            Ok(IpcResponse::Status(status)) => {
                print_live_status(&status);
                return Ok(());
            }
            Ok(resp) => log::warn!("Unexpected response from daemon: {resp:?}"),
            Err(e) => log::debug!("Daemon not responding: {e}"),
        }
    }

    let db = Database::new(None)?;
    let now = Utc::now();
    match db.session_end()?.filter(|end| *end > now) {
        Some(end_at) => {
            println!(
                "Session: Active, ends at {} ({} left)",
                format_local(end_at),
                format_hms(end_at.signed_duration_since(now).num_seconds())
            );
        }
        None => println!("Session: Inactive"),
    }
    if let Some(name) = db.display_name()? {
        println!("Name: {name}");
    }
    println!("Daemon: Not running");
    Ok(())
}

fn print_live_status(status: &GuardStatus) {
    match (status.active, status.end_at) {
        (true, Some(end_at)) => println!(
            "Session: Active, ends at {} ({} left)",
            format_local(end_at),
            format_hms(status.remaining_secs.unwrap_or(0))
        ),
        _ => println!("Session: Inactive"),
    }
    if let Some(name) = &status.display_name {
        println!("Name: {name}");
    }
    println!("Daemon: Running");

    match status.away_since {
        Some(since) => println!(
            "Presence: {} since {}",
            status.presence.description(),
            format_local(since)
        ),
        None => println!("Presence: {}", status.presence.description()),
    }
    match status.alarm {
        AlarmState::Sounding => println!("Alarm: Sounding ({} alerts so far)", status.alerts_fired),
        AlarmState::Idle => println!("Alarm: Idle"),
    }
    println!(
        "Wake lock: {}",
        if status.wake_lock_held { "Held" } else { "Not held" }
    );
}
