//! The presence guard: session clock, signal fusion, alarm, wake lock and
//! incident log wired into one single-owner state machine.
//!
//! Every entry point takes `&mut self` and returns immediately. The host
//! calls [`PresenceGuard::handle_signal`] for platform events,
//! [`PresenceGuard::tick`] about once a second, and [`PresenceGuard::poll`]
//! whenever [`PresenceGuard::next_deadline_ms`] passes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_storage::{Incident, IncidentKind, SessionStore};

use crate::alarm::{AlarmScheduler, AlarmState, Alert, AlertChannels, TimingSource, Tone};
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::incident_log::IncidentLog;
use crate::pin::PinGate;
use crate::session_clock::{SessionClock, SessionEdge};
use crate::signal_fusion::{PresenceState, RawSignal, SignalDirection, SignalFusion, Transition};
use crate::wake_lock::{WakeLockCoordinator, WakeLockProvider};

const ALERT_TAG: &str = "vigil-alarm";

/// Hooks into the UI layer. Each fires at most once per transition.
pub trait GuardCallbacks: Send {
    /// The session ran out on its own
    fn on_timer_end(&mut self) {}

    /// The user came back after being away for `dwell`
    fn on_return(&mut self, _dwell: Duration) {}
}

pub struct NoopCallbacks;

impl GuardCallbacks for NoopCallbacks {}

/// Host-provided adapters; the default is fully headless
pub struct GuardParts {
    pub channels: AlertChannels,
    pub timing_sources: Vec<Box<dyn TimingSource>>,
    pub wake_lock: Option<Box<dyn WakeLockProvider>>,
    pub callbacks: Box<dyn GuardCallbacks>,
}

impl Default for GuardParts {
    fn default() -> Self {
        Self {
            channels: AlertChannels::default(),
            timing_sources: Vec::new(),
            wake_lock: None,
            callbacks: Box::new(NoopCallbacks),
        }
    }
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStatus {
    pub active: bool,
    pub end_at: Option<DateTime<Utc>>,
    pub remaining_secs: Option<i64>,
    pub presence: PresenceState,
    pub away_since: Option<DateTime<Utc>>,
    pub alarm: AlarmState,
    pub alerts_fired: u64,
    pub wake_lock_held: bool,
    pub display_name: Option<String>,
}

/// `"45s"`, `"2m 05s"`, `"1h 02m"`
#[must_use]
pub fn format_dwell(dwell: Duration) -> String {
    let secs = dwell.num_seconds().max(0);
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

pub struct PresenceGuard {
    config: GuardConfig,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    session: SessionClock,
    fusion: SignalFusion,
    incidents: IncidentLog,
    alarm: AlarmScheduler,
    wake_lock: WakeLockCoordinator,
    pins: PinGate,
    callbacks: Box<dyn GuardCallbacks>,
}

impl PresenceGuard {
    /// Build a guard for a fresh page load. Call [`tick`](Self::tick) once
    /// afterwards to pick up a session persisted by an earlier run.
    #[must_use]
    pub fn new(
        config: GuardConfig,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        parts: GuardParts,
    ) -> Self {
        let config = config.sanitized();
        Self {
            session: SessionClock::new(store.clone(), clock.clone()),
            fusion: SignalFusion::new(config.fusion_tuning(), store.clone(), clock.clone()),
            incidents: IncidentLog::new(
                store.clone(),
                clock.clone(),
                config.incident_throttle_ms,
                config.max_incidents,
            ),
            alarm: AlarmScheduler::new(
                clock.clone(),
                config.alarm_interval_ms,
                parts.channels,
                parts.timing_sources,
            ),
            wake_lock: WakeLockCoordinator::new(parts.wake_lock),
            pins: PinGate::new(store.clone(), config.default_pin.clone()),
            callbacks: parts.callbacks,
            config,
            store,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    #[must_use]
    pub fn presence(&self) -> PresenceState {
        self.fusion.state()
    }

    #[must_use]
    pub fn alarm_state(&self) -> AlarmState {
        self.alarm.state()
    }

    /// Newest first
    #[must_use]
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.entries()
    }

    #[must_use]
    pub fn status(&self) -> GuardStatus {
        GuardStatus {
            active: self.session.is_active(),
            end_at: self.session.end_at(),
            remaining_secs: self.session.remaining().map(|d| d.num_seconds()),
            presence: self.fusion.state(),
            away_since: self.fusion.away_since(),
            alarm: self.alarm.state(),
            alerts_fired: self.alarm.alerts_fired(),
            wake_lock_held: self.wake_lock.is_held(),
            display_name: self.display_name(),
        }
    }

    /// Earliest monotonic instant at which [`poll`](Self::poll) has work
    #[must_use]
    pub fn next_deadline_ms(&self) -> Option<u64> {
        match (self.fusion.pending_deadline_ms(), self.alarm.next_due_ms()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn display_name(&self) -> Option<String> {
        self.store.display_name().unwrap_or_else(|e| {
            log::warn!("Failed to read display name: {e}");
            None
        })
    }

    /// # Errors
    ///
    /// Returns an error if the name cannot be persisted.
    pub fn set_display_name(&mut self, name: Option<&str>) -> Result<()> {
        self.store.set_display_name(name)?;
        Ok(())
    }

    /// Start (or extend) a session ending at `end_at`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::SessionEndInPast`] if `end_at` is not in the
    /// future, or a storage error.
    pub fn start_session(&mut self, end_at: DateTime<Utc>) -> Result<()> {
        if end_at <= self.clock.now() {
            return Err(GuardError::SessionEndInPast(end_at));
        }
        self.session.start(end_at)?;
        if self.config.log_session_events {
            self.incidents.append(IncidentKind::SessionStarted, None);
        }
        self.tick();
        Ok(())
    }

    /// Forced exit behind the PIN. Does not count as the timer ending, so
    /// `on_timer_end` is not invoked.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::WrongPin`] on mismatch, or a storage error.
    pub fn clear_session(&mut self, pin: &str) -> Result<()> {
        self.pins.verify(pin, &self.incidents)?;
        let was_active = self.session.is_active();
        self.session.clear()?;
        self.alarm.stop();
        self.fusion.reset();
        self.wake_lock.release();
        if was_active {
            self.incidents.append(IncidentKind::ForcedExit, None);
            log::info!("Session ended early with PIN");
        }
        Ok(())
    }

    /// Wipe the incident feed behind the PIN.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::WrongPin`] on mismatch, or a storage error.
    pub fn clear_history(&mut self, pin: &str) -> Result<()> {
        self.pins.verify(pin, &self.incidents)?;
        self.incidents.clear()?;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`PinGate::change_pin`].
    pub fn change_pin(&mut self, current: Option<&str>, new_pin: &str) -> Result<()> {
        self.pins.change_pin(current, new_pin, &self.incidents)
    }

    /// Feed one raw platform signal.
    pub fn handle_signal(&mut self, signal: RawSignal) {
        let active = self.session.is_active();
        if let Some(transition) = self.fusion.handle(signal, active) {
            self.apply(transition);
        }
        if active && signal.direction() == SignalDirection::Return {
            self.wake_lock.acquire();
        }
        self.poll_alarm();
    }

    /// Periodic session check. Expiry is only ever declared here.
    pub fn tick(&mut self) -> Option<SessionEdge> {
        let edge = self.session.tick();
        match edge {
            Some(SessionEdge::Started { end_at }) => {
                log::info!("Guarding session until {end_at}");
                self.fusion.reset();
                self.wake_lock.acquire();
            }
            Some(SessionEdge::Expired) => {
                self.alarm.stop();
                self.fusion.reset();
                self.wake_lock.release();
                if self.config.log_session_events {
                    self.incidents.append(IncidentKind::SessionCompleted, None);
                }
                self.callbacks.on_timer_end();
            }
            None => {}
        }
        self.poll();
        edge
    }

    /// Resolve a due confirmation check and service the alarm cadence.
    pub fn poll(&mut self) {
        let active = self.session.is_active();
        if let Some(transition) = self.fusion.poll(active) {
            self.apply(transition);
        }
        self.poll_alarm();
    }

    /// Tick delivered by a background timing source
    pub fn on_timer_tick(&mut self, source: &str) {
        log::debug!("Timer tick from {source}");
        self.poll();
    }

    /// Cancel everything pending; the guard stays usable afterwards.
    pub fn shutdown(&mut self) {
        self.fusion.cancel_pending();
        self.alarm.stop();
        self.wake_lock.release();
    }

    fn poll_alarm(&mut self) {
        if !self.alarm.is_sounding() {
            return;
        }
        let keep_sounding =
            self.session.is_active() && self.fusion.state() == PresenceState::Away;
        let alert = self.build_alert();
        self.alarm.poll(keep_sounding, &alert);
    }

    fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::WentAway { .. } => {
                self.incidents.append(IncidentKind::Away, None);
                let alert = self.build_alert();
                self.alarm.start(&alert);
            }
            Transition::ScreenOff { elapsed_ms } => {
                if self.config.log_screen_off {
                    #[allow(clippy::cast_precision_loss)]
                    let paused = format!("paused for {:.1}s", elapsed_ms as f64 / 1000.0);
                    self.incidents.append(IncidentKind::ScreenOff, Some(paused));
                }
            }
            Transition::Returned { dwell } => {
                self.alarm.stop();
                self.incidents.append(
                    IncidentKind::Returned,
                    Some(format!("away for {}", format_dwell(dwell))),
                );
                self.callbacks.on_return(dwell);
                self.wake_lock.acquire();
            }
            Transition::Resumed => self.wake_lock.acquire(),
        }
    }

    fn build_alert(&self) -> Alert {
        let alert = &self.config.alert;
        let phrase = match self.display_name() {
            Some(name) => alert.named_phrase.replace("{name}", &name),
            None => alert.phrase.clone(),
        };
        let body = match self.fusion.away_since() {
            Some(since) => format!(
                "{} Away for {}.",
                alert.notification_body,
                format_dwell(self.clock.now().signed_duration_since(since))
            ),
            None => alert.notification_body.clone(),
        };
        Alert {
            phrase,
            title: alert.notification_title.clone(),
            body,
            tone: Tone {
                frequency_hz: alert.tone_hz,
                duration_ms: alert.tone_ms,
            },
            tag: ALERT_TAG.to_string(),
        }
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::platform::memory::{AlertEvent, AlertRecorder, FakeWakeLock, RecordingCallbacks};
    use chrono::TimeZone;
    use vigil_storage::MemoryStore;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        alerts: AlertRecorder,
        lock: FakeWakeLock,
        callbacks: RecordingCallbacks,
        guard: PresenceGuard,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 1, 15, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let alerts = AlertRecorder::new(true);
        let lock = FakeWakeLock::new(true);
        let callbacks = RecordingCallbacks::new();
        let guard = PresenceGuard::new(
            GuardConfig::default(),
            store.clone(),
            clock.clone(),
            GuardParts {
                channels: alerts.channels(),
                timing_sources: Vec::new(),
                wake_lock: Some(Box::new(lock.clone())),
                callbacks: Box::new(callbacks.clone()),
            },
        );
        Harness {
            clock,
            store,
            alerts,
            lock,
            callbacks,
            guard,
        }
    }

    #[test]
    fn test_format_dwell() {
        assert_eq!(format_dwell(Duration::seconds(45)), "45s");
        assert_eq!(format_dwell(Duration::seconds(125)), "2m 05s");
        assert_eq!(format_dwell(Duration::seconds(3_720)), "1h 02m");
        assert_eq!(format_dwell(Duration::seconds(-3)), "0s");
    }

    #[test]
    fn test_start_session_rejects_past_end() {
        let mut h = harness();
        let past = h.clock.now() - Duration::seconds(1);
        assert!(matches!(
            h.guard.start_session(past),
            Err(GuardError::SessionEndInPast(_))
        ));
        assert!(!h.guard.is_active());
    }

    #[test]
    fn test_session_start_takes_wake_lock() {
        let mut h = harness();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(25))
            .unwrap();
        assert!(h.guard.is_active());
        assert_eq!(h.lock.outstanding(), 1);
        assert!(h.guard.incidents().is_empty());
    }

    #[test]
    fn test_away_alerts_use_display_name() {
        let mut h = harness();
        h.guard.set_display_name(Some("Mina")).unwrap();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(25))
            .unwrap();

        h.guard.handle_signal(RawSignal::Hidden);
        h.clock.advance_ms(1_100);
        h.guard.poll();

        assert_eq!(h.guard.presence(), PresenceState::Away);
        assert_eq!(h.guard.alarm_state(), AlarmState::Sounding);
        assert!(h
            .alerts
            .events()
            .contains(&AlertEvent::Spoke("Mina, come back! Study time is not over yet!".into())));
    }

    #[test]
    fn test_return_logs_dwell_and_calls_back() {
        let mut h = harness();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(25))
            .unwrap();

        h.guard.handle_signal(RawSignal::PageHide);
        h.clock.advance_ms(1_100);
        h.guard.poll();
        h.lock.auto_release();

        h.clock.advance_ms(125_000);
        h.guard.handle_signal(RawSignal::PageShow);

        assert_eq!(h.guard.alarm_state(), AlarmState::Idle);
        assert_eq!(h.callbacks.returns(), vec![Duration::seconds(125)]);
        assert_eq!(h.lock.outstanding(), 1);

        let incidents = h.guard.incidents();
        assert_eq!(incidents[0].kind, IncidentKind::Returned);
        assert_eq!(incidents[0].meta.as_deref(), Some("away for 2m 05s"));
        assert_eq!(incidents[1].kind, IncidentKind::Away);
    }

    #[test]
    fn test_clear_session_requires_pin() {
        let mut h = harness();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(25))
            .unwrap();

        assert!(matches!(
            h.guard.clear_session("1234"),
            Err(GuardError::WrongPin)
        ));
        assert!(h.guard.is_active());

        h.clock.advance_ms(3_000);
        h.guard.clear_session("0000").unwrap();
        assert!(!h.guard.is_active());
        assert_eq!(h.lock.outstanding(), 0);
        assert_eq!(h.callbacks.timer_ends(), 0);
        assert!(h.store.session_end().unwrap().is_none());

        let kinds: Vec<_> = h.guard.incidents().iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IncidentKind::ForcedExit, IncidentKind::WrongPin]);
    }

    #[test]
    fn test_clear_history_requires_pin() {
        let mut h = harness();
        h.guard.change_pin(None, "2468").unwrap();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(25))
            .unwrap();
        h.guard.handle_signal(RawSignal::Hidden);
        h.clock.advance_ms(1_100);
        h.guard.poll();

        h.clock.advance_ms(3_000);
        assert!(h.guard.clear_history("0000").is_err());
        assert_eq!(h.guard.incidents().len(), 2);

        h.guard.clear_history("2468").unwrap();
        assert!(h.guard.incidents().is_empty());
    }

    #[test]
    fn test_next_deadline_tracks_pending_check_and_alarm() {
        let mut h = harness();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(25))
            .unwrap();
        assert_eq!(h.guard.next_deadline_ms(), None);

        h.guard.handle_signal(RawSignal::Blurred);
        assert_eq!(h.guard.next_deadline_ms(), Some(1_100));

        h.clock.advance_ms(1_100);
        h.guard.poll();
        assert_eq!(h.guard.next_deadline_ms(), Some(11_100));
    }

    #[test]
    fn test_status_snapshot() {
        let mut h = harness();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(10))
            .unwrap();
        let status = h.guard.status();
        assert!(status.active);
        assert_eq!(status.remaining_secs, Some(600));
        assert_eq!(status.presence, PresenceState::Engaged);
        assert!(status.wake_lock_held);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut h = harness();
        h.guard
            .start_session(h.clock.now() + Duration::minutes(10))
            .unwrap();
        h.guard.handle_signal(RawSignal::Hidden);
        h.clock.advance_ms(1_100);
        h.guard.poll();

        h.guard.shutdown();
        h.guard.shutdown();
        assert_eq!(h.guard.alarm_state(), AlarmState::Idle);
        assert_eq!(h.lock.outstanding(), 0);
    }
}
