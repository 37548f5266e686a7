//! The nag loop that runs while the user is away.
//!
//! Several timing sources may drive the cadence at once (the guard's own
//! poll plus any background source that is available on this host). They all
//! funnel into [`AlarmScheduler::poll`], and `next_due_ms` is the single
//! record of when the next alert is owed, so redundant ticks never
//! double-fire.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Idle,
    Sounding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration_ms: u64,
}

/// One alert action: what to say, play, and show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub phrase: String,
    pub title: String,
    pub body: String,
    pub tone: Tone,
    /// Notifications with the same tag replace each other
    pub tag: String,
}

pub trait SpeechChannel: Send {
    /// Start speaking `phrase`. Callers cancel first.
    fn speak(&mut self, phrase: &str) -> Result<()>;

    /// Silence anything in flight; no-op when quiet
    fn cancel(&mut self) -> Result<()>;
}

pub trait ToneChannel: Send {
    fn play(&mut self, tone: Tone) -> Result<()>;
}

pub trait NotificationChannel: Send {
    fn permission_granted(&self) -> bool;

    fn notify(&mut self, title: &str, body: &str, tag: &str) -> Result<()>;
}

/// A clock that can tick the alarm independently of the guard's own poll,
/// e.g. a background task that is not throttled with the foreground.
pub trait TimingSource: Send {
    fn name(&self) -> &str;

    /// Capability check; unavailable sources are never armed
    fn is_available(&self) -> bool;

    fn arm(&mut self, interval_ms: u64) -> Result<()>;

    fn disarm(&mut self);
}

/// Output channels of an alert. Any of them may be absent.
#[derive(Default)]
pub struct AlertChannels {
    pub speech: Option<Box<dyn SpeechChannel>>,
    pub tone: Option<Box<dyn ToneChannel>>,
    pub notifications: Option<Box<dyn NotificationChannel>>,
}

pub struct AlarmScheduler {
    clock: Arc<dyn Clock>,
    interval_ms: u64,
    channels: AlertChannels,
    sources: Vec<Box<dyn TimingSource>>,
    state: AlarmState,
    next_due_ms: Option<u64>,
    alerts_fired: u64,
}

impl AlarmScheduler {
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        interval_ms: u64,
        channels: AlertChannels,
        sources: Vec<Box<dyn TimingSource>>,
    ) -> Self {
        let sources: Vec<_> = sources
            .into_iter()
            .filter(|source| {
                let available = source.is_available();
                if !available {
                    log::debug!("Timing source {} unavailable, skipping", source.name());
                }
                available
            })
            .collect();

        Self {
            clock,
            interval_ms: interval_ms.max(1),
            channels,
            sources,
            state: AlarmState::Idle,
            next_due_ms: None,
            alerts_fired: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> AlarmState {
        self.state
    }

    #[must_use]
    pub fn is_sounding(&self) -> bool {
        self.state == AlarmState::Sounding
    }

    /// Total alerts fired since creation
    #[must_use]
    pub fn alerts_fired(&self) -> u64 {
        self.alerts_fired
    }

    /// Monotonic instant the next alert is owed, while sounding
    #[must_use]
    pub fn next_due_ms(&self) -> Option<u64> {
        self.next_due_ms
    }

    /// Timing sources that passed capability detection
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Early ticks within this margin still count as due
    fn slack_ms(&self) -> u64 {
        (self.interval_ms / 10).min(250)
    }

    /// Fire one alert right away and arm the cadence. Returns `false` if
    /// already sounding.
    pub fn start(&mut self, alert: &Alert) -> bool {
        if self.state == AlarmState::Sounding {
            return false;
        }
        self.state = AlarmState::Sounding;
        log::info!("Alarm started (every {} ms)", self.interval_ms);

        self.fire(alert);
        self.next_due_ms = Some(self.clock.monotonic_ms() + self.interval_ms);

        for source in &mut self.sources {
            if let Err(e) = source.arm(self.interval_ms) {
                log::warn!("Failed to arm timing source {}: {e}", source.name());
            }
        }
        true
    }

    /// Tick from any timing source. `keep_sounding` is the caller's
    /// `is_active && presence == Away` check; when false the alarm stops.
    /// Returns whether an alert fired.
    pub fn poll(&mut self, keep_sounding: bool, alert: &Alert) -> bool {
        if self.state == AlarmState::Idle {
            return false;
        }
        if !keep_sounding {
            self.stop();
            return false;
        }

        let now_ms = self.clock.monotonic_ms();
        let Some(due_ms) = self.next_due_ms else {
            return false;
        };
        if now_ms + self.slack_ms() < due_ms {
            return false;
        }

        self.fire(alert);
        self.next_due_ms = Some(now_ms + self.interval_ms);
        true
    }

    /// Idempotent: disarms every source and silences speech
    pub fn stop(&mut self) {
        if self.state == AlarmState::Idle {
            return;
        }
        for source in &mut self.sources {
            source.disarm();
        }
        if let Some(speech) = self.channels.speech.as_mut() {
            if let Err(e) = speech.cancel() {
                log::debug!("Speech cancel failed: {e}");
            }
        }
        self.state = AlarmState::Idle;
        self.next_due_ms = None;
        log::info!("Alarm stopped after {} alerts", self.alerts_fired);
    }

    fn fire(&mut self, alert: &Alert) {
        self.alerts_fired += 1;
        log::debug!("Firing alert #{}", self.alerts_fired);

        if let Some(speech) = self.channels.speech.as_mut() {
            if let Err(e) = speech.cancel() {
                log::debug!("Speech cancel failed: {e}");
            }
            if let Err(e) = speech.speak(&alert.phrase) {
                log::warn!("Speech alert failed: {e}");
            }
        }

        if let Some(tone) = self.channels.tone.as_mut() {
            if let Err(e) = tone.play(alert.tone) {
                log::warn!("Tone alert failed: {e}");
            }
        }

        if let Some(notifications) = self.channels.notifications.as_mut() {
            if !notifications.permission_granted() {
                log::debug!("Notification permission not granted, skipping");
            } else if let Err(e) = notifications.notify(&alert.title, &alert.body, &alert.tag) {
                log::warn!("Notification alert failed: {e}");
            }
        }
    }
}
