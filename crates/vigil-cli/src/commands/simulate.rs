//! Replay a timed signal script against a simulated clock.
//!
//! A script is a whitespace or comma separated list of `event@ms` entries,
//! e.g. `hidden@0 visible@5000`. `freeze@ms+duration` suspends the runtime
//! for `duration` ms, the way a locked screen does. Lines starting with `#`
//! are comments.

use anyhow::{bail, Context, Result};
use chrono::{Duration, TimeZone, Utc};
use regex::Regex;
use std::{path::Path, sync::Arc};
use vigil_core::platform::memory::{AlertRecorder, FakeWakeLock, ManualTimer, RecordingCallbacks};
use vigil_core::{
    AlarmState, Clock, GuardConfig, GuardParts, ManualClock, PresenceGuard, PresenceState,
    RawSignal,
};
use vigil_storage::{Incident, MemoryStore};

use super::helpers::truncate_str;

const STEP_MS: u64 = 100;
/// Keep running this long after the last event
const TAIL_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    Signal(RawSignal),
    Freeze(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptEvent {
    pub at_ms: u64,
    pub action: ScriptAction,
}

pub fn parse_script(script: &str) -> Result<Vec<ScriptEvent>> {
    let pattern = Regex::new(r"^(?P<event>[a-z_]+)@(?P<at>\d+)(?:\+(?P<dur>\d+))?$")?;
    let mut events = Vec::new();

    let tokens = script
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == ','))
        .filter(|token| !token.is_empty());

    for token in tokens {
        let token = token.to_lowercase();
        let caps = pattern
            .captures(&token)
            .with_context(|| format!("Invalid script entry '{token}', expected event@ms"))?;
        let at_ms: u64 = caps["at"].parse()?;
        let duration: Option<u64> = caps.name("dur").map(|d| d.as_str().parse()).transpose()?;

        let action = match (&caps["event"], duration) {
            ("freeze", Some(duration)) => ScriptAction::Freeze(duration),
            ("freeze", None) => bail!("'{token}': freeze needs a duration, e.g. freeze@0+5000"),
            (_, Some(_)) => bail!("'{token}': only freeze takes a duration"),
            (name, None) => ScriptAction::Signal(name.parse().map_err(anyhow::Error::msg)?),
        };
        events.push(ScriptEvent { at_ms, action });
    }

    events.sort_by_key(|e| e.at_ms);
    Ok(events)
}

#[derive(Debug)]
pub struct SimulationReport {
    pub timeline: Vec<String>,
    pub incidents: Vec<Incident>,
    pub alerts: usize,
    pub returns: usize,
    pub timer_ends: usize,
}

pub fn run_simulation(
    events: &[ScriptEvent],
    session_secs: u32,
    config: GuardConfig,
) -> Result<SimulationReport> {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .context("Invalid simulation origin")?,
    ));
    let alerts = AlertRecorder::new(true);
    let callbacks = RecordingCallbacks::new();
    let mut guard = PresenceGuard::new(
        config,
        Arc::new(MemoryStore::new()),
        clock.clone(),
        GuardParts {
            channels: alerts.channels(),
            timing_sources: vec![Box::new(ManualTimer::new("worker"))],
            wake_lock: Some(Box::new(FakeWakeLock::new(true))),
            callbacks: Box::new(callbacks.clone()),
        },
    );
    guard.start_session(clock.now() + Duration::seconds(i64::from(session_secs)))?;

    let end_ms = events.iter().fold(0, |end, e| match e.action {
        ScriptAction::Freeze(duration) => end.max(e.at_ms + duration),
        ScriptAction::Signal(_) => end.max(e.at_ms),
    }) + TAIL_MS;

    let mut timeline = Vec::new();
    let mut last: (PresenceState, AlarmState, usize) =
        (guard.presence(), guard.alarm_state(), alerts.spoken());
    let mut pending = events.iter().peekable();

    while clock.elapsed_ms() <= end_ms {
        while let Some(event) = pending.next_if(|e| e.at_ms <= clock.elapsed_ms()) {
            match event.action {
                ScriptAction::Signal(signal) => {
                    timeline.push(format!("{:>8} ms  <- {signal}", clock.elapsed_ms()));
                    guard.handle_signal(signal);
                }
                ScriptAction::Freeze(duration) => {
                    timeline.push(format!(
                        "{:>8} ms  runtime frozen for {duration} ms",
                        clock.elapsed_ms()
                    ));
                    clock.advance_ms(duration);
                    // overdue timers run first when the runtime thaws
                    guard.poll();
                }
            }
        }

        guard.tick();

        let now = (guard.presence(), guard.alarm_state(), alerts.spoken());
        if now != last {
            timeline.push(format!(
                "{:>8} ms  {} / alarm {:?} / {} alert(s)",
                clock.elapsed_ms(),
                now.0.description(),
                now.1,
                now.2
            ));
            last = now;
        }
        clock.advance_ms(STEP_MS);
    }

    Ok(SimulationReport {
        timeline,
        incidents: guard.incidents(),
        alerts: alerts.spoken(),
        returns: callbacks.returns().len(),
        timer_ends: callbacks.timer_ends(),
    })
}

pub fn handle_simulate(script: &str, session_secs: u32) -> Result<()> {
    let source = if Path::new(script).is_file() {
        std::fs::read_to_string(script).with_context(|| format!("Failed to read {script}"))?
    } else {
        script.to_string()
    };

    let events = parse_script(&source)?;
    if events.is_empty() {
        bail!("Script contains no events");
    }

    let report = run_simulation(&events, session_secs, GuardConfig::load()?)?;

    println!("Timeline:");
    for line in &report.timeline {
        println!("{line}");
    }

    println!("\nIncidents (oldest first):");
    if report.incidents.is_empty() {
        println!("  none");
    }
    for incident in report.incidents.iter().rev() {
        println!(
            "  {:<20} {}",
            incident.kind.label(),
            truncate_str(incident.meta.as_deref().unwrap_or(""), 40)
        );
    }

    println!(
        "\nAlerts fired: {}  Returns: {}  Timer ends: {}",
        report.alerts, report.returns, report.timer_ends
    );
    Ok(())
}
