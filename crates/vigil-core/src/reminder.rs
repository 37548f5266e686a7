//! Scheduled study-time reminder.
//!
//! At a chosen wall-clock time the reminder starts nagging through the same
//! alert channels as the guard, and keeps repeating until the user shows up
//! or the ringing window runs out.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;

use crate::alarm::{AlarmScheduler, Alert, AlertChannels, TimingSource, Tone};
use crate::clock::Clock;
use crate::config::GuardConfig;

const REMINDER_TAG: &str = "study-alarm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderPhase {
    Waiting,
    Ringing,
    /// The user showed up while it was ringing
    Acknowledged,
    /// The ringing window ran out
    Expired,
}

impl ReminderPhase {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Expired)
    }
}

/// Parse a 24-hour `HH:MM` time of day.
///
/// # Errors
///
/// Returns an error if `text` is not a valid `HH:MM` time.
pub fn parse_clock_time(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M")
        .with_context(|| format!("Invalid time '{text}', expected HH:MM"))
}

/// The next moment `time` occurs in `now`'s time zone: later today, or
/// tomorrow if it has already passed. `None` if the local time does not exist
/// on either day (a DST gap).
#[must_use]
pub fn next_occurrence<Tz: TimeZone>(time: NaiveTime, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    [Some(today), today.succ_opt()]
        .into_iter()
        .flatten()
        .filter_map(|day| {
            day.and_time(time)
                .and_local_timezone(now.timezone())
                .earliest()
        })
        .map(|at| at.with_timezone(&Utc))
        .find(|at| *at > now.with_timezone(&Utc))
}

pub struct StudyReminder {
    clock: Arc<dyn Clock>,
    alarm: AlarmScheduler,
    due_at: DateTime<Utc>,
    ring_for: Option<Duration>,
    first: Alert,
    repeat: Alert,
    phase: ReminderPhase,
}

impl StudyReminder {
    /// `ring_for` of `None` rings until acknowledged
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        config: &GuardConfig,
        due_at: DateTime<Utc>,
        ring_for: Option<Duration>,
        channels: AlertChannels,
        sources: Vec<Box<dyn TimingSource>>,
    ) -> Self {
        let reminder = &config.reminder;
        let alert = |phrase: &str| Alert {
            phrase: phrase.to_string(),
            title: reminder.notification_title.clone(),
            body: reminder.notification_body.clone(),
            tone: Tone {
                frequency_hz: config.alert.tone_hz,
                duration_ms: config.alert.tone_ms,
            },
            tag: REMINDER_TAG.to_string(),
        };

        Self {
            alarm: AlarmScheduler::new(clock.clone(), reminder.interval_ms, channels, sources),
            clock,
            due_at,
            ring_for,
            first: alert(&reminder.phrase),
            repeat: alert(&reminder.repeat_phrase),
            phase: ReminderPhase::Waiting,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ReminderPhase {
        self.phase
    }

    #[must_use]
    pub fn due_at(&self) -> DateTime<Utc> {
        self.due_at
    }

    #[must_use]
    pub fn alerts_fired(&self) -> u64 {
        self.alarm.alerts_fired()
    }

    /// Advance the reminder. `present` only counts while ringing; showing up
    /// early does not pre-acknowledge it.
    pub fn poll(&mut self, present: bool) -> ReminderPhase {
        let now = self.clock.now();
        match self.phase {
            ReminderPhase::Acknowledged | ReminderPhase::Expired => {}
            ReminderPhase::Waiting => {
                if now >= self.due_at {
                    log::info!("Study reminder due");
                    self.alarm.start(&self.first);
                    self.phase = ReminderPhase::Ringing;
                }
            }
            ReminderPhase::Ringing => {
                if present {
                    log::info!("Study reminder acknowledged");
                    self.alarm.stop();
                    self.phase = ReminderPhase::Acknowledged;
                } else if self.ring_for.is_some_and(|ring_for| now >= self.due_at + ring_for) {
                    log::info!("Study reminder window over");
                    self.alarm.stop();
                    self.phase = ReminderPhase::Expired;
                } else {
                    self.alarm.poll(true, &self.repeat);
                }
            }
        }
        self.phase
    }

    /// Silence and disarm; the phase is left as is
    pub fn cancel(&mut self) {
        self.alarm.stop();
    }
}

impl Drop for StudyReminder {
    fn drop(&mut self) {
        self.alarm.stop();
    }
}
