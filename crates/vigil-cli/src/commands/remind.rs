/// Study-time reminder, run in the foreground
use anyhow::{Context, Result};
use chrono::{Duration, Local};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};
use vigil_core::platform::host_parts;
use vigil_core::reminder::{next_occurrence, parse_clock_time};
use vigil_core::{GuardConfig, GuardParts, ReminderPhase, StudyReminder, SystemClock};

use super::helpers::format_local;

pub async fn remind(at: &str, minutes: Option<u32>) -> Result<()> {
    let config = GuardConfig::load()?;
    let time = parse_clock_time(at)?;
    let due_at = next_occurrence(time, &Local::now())
        .with_context(|| format!("{at} does not exist in the local time zone today or tomorrow"))?;
    let minutes = minutes.unwrap_or(config.reminder.default_minutes);
    let ring_for = (minutes > 0).then(|| Duration::minutes(i64::from(minutes)));

    let GuardParts { channels, .. } = host_parts(&config, None);
    let mut reminder = StudyReminder::new(
        Arc::new(SystemClock::new()),
        &config,
        due_at,
        ring_for,
        channels,
        Vec::new(),
    );

    println!("Reminder set for {}.", format_local(reminder.due_at()));
    println!("Press Enter when it rings to acknowledge, Ctrl-C to cancel.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = interval(std::time::Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let mut present = false;
        tokio::select! {
            _ = ticker.tick() => {}
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => present = true,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("Failed to read stdin: {e}");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                reminder.cancel();
                println!("Reminder cancelled.");
                return Ok(());
            }
        }

        let was_waiting = reminder.phase() == ReminderPhase::Waiting;
        match reminder.poll(present) {
            ReminderPhase::Ringing if was_waiting => println!("Study time!"),
            ReminderPhase::Acknowledged => {
                println!("Have a good session. Start one with `vigil start --minutes N`.");
                return Ok(());
            }
            ReminderPhase::Expired => {
                println!("Reminder stopped after {minutes} minute(s).");
                return Ok(());
            }
            ReminderPhase::Waiting | ReminderPhase::Ringing => {}
        }
    }
}
