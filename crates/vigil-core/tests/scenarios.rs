//! End-to-end presence scenarios driven by a manual clock.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use vigil_core::platform::memory::{AlertRecorder, FakeWakeLock, ManualTimer, RecordingCallbacks};
use vigil_core::{
    AlarmState, Clock, GuardConfig, GuardParts, ManualClock, PresenceGuard, PresenceState,
    RawSignal, SessionEdge,
};
use vigil_storage::{Database, IncidentKind, MemoryStore, SessionStore};

struct World {
    clock: Arc<ManualClock>,
    store: Arc<dyn SessionStore>,
    alerts: AlertRecorder,
    lock: FakeWakeLock,
    timer: ManualTimer,
    callbacks: RecordingCallbacks,
}

impl World {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    fn with_store(store: Arc<dyn SessionStore>) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 10, 7, 19, 0, 0).unwrap(),
            )),
            store,
            alerts: AlertRecorder::new(true),
            lock: FakeWakeLock::new(true),
            timer: ManualTimer::new("worker"),
            callbacks: RecordingCallbacks::new(),
        }
    }

    /// A fresh page load over the shared store
    fn guard_with(&self, config: GuardConfig) -> PresenceGuard {
        PresenceGuard::new(
            config,
            self.store.clone(),
            self.clock.clone(),
            GuardParts {
                channels: self.alerts.channels(),
                timing_sources: vec![Box::new(self.timer.clone())],
                wake_lock: Some(Box::new(self.lock.clone())),
                callbacks: Box::new(self.callbacks.clone()),
            },
        )
    }

    fn guard(&self) -> PresenceGuard {
        self.guard_with(GuardConfig::default())
    }

    fn kinds(&self) -> Vec<IncidentKind> {
        self.store
            .incidents()
            .unwrap()
            .into_iter()
            .map(|i| i.kind)
            .collect()
    }

    fn count(&self, kind: IncidentKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    /// Advance in 100 ms steps, ticking and polling like the daemon does
    fn run_for(&self, guard: &mut PresenceGuard, ms: u64) {
        let target = self.clock.elapsed_ms() + ms;
        while self.clock.elapsed_ms() < target {
            self.clock.advance_ms(100.min(target - self.clock.elapsed_ms()));
            guard.tick();
        }
    }
}

#[test]
fn duplicate_raw_events_log_one_away_per_excursion() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    for _ in 0..3 {
        guard.handle_signal(RawSignal::Blurred);
        world.clock.advance_ms(5);
        guard.handle_signal(RawSignal::Hidden);
        world.clock.advance_ms(5);
        guard.handle_signal(RawSignal::PageHide);
        world.run_for(&mut guard, 1_500);
        assert_eq!(guard.presence(), PresenceState::Away);

        world.run_for(&mut guard, 4_000);
        guard.handle_signal(RawSignal::Visible);
        guard.handle_signal(RawSignal::Focused);
        guard.handle_signal(RawSignal::PageShow);
        assert_eq!(guard.presence(), PresenceState::Engaged);
        assert_eq!(guard.alarm_state(), AlarmState::Idle);

        world.run_for(&mut guard, 3_000);
    }

    assert_eq!(world.count(IncidentKind::Away), 3);
    assert_eq!(world.count(IncidentKind::Returned), 3);
    assert_eq!(world.callbacks.returns().len(), 3);
}

#[test]
fn suspended_runtime_is_screen_off_not_away() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    // the runtime freezes: nothing runs until the screen comes back
    world.clock.advance_ms(45_000);
    guard.poll();

    assert_eq!(guard.presence(), PresenceState::ScreenOff);
    assert_eq!(guard.alarm_state(), AlarmState::Idle);
    assert_eq!(world.alerts.spoken(), 0);

    guard.handle_signal(RawSignal::Visible);
    assert_eq!(guard.presence(), PresenceState::Engaged);
    assert_eq!(world.kinds(), vec![IncidentKind::ScreenOff]);
    assert!(world.callbacks.returns().is_empty());
}

#[test]
fn screen_off_logging_can_be_disabled() {
    let world = World::new();
    let mut guard = world.guard_with(GuardConfig {
        log_screen_off: false,
        ..GuardConfig::default()
    });
    guard
        .start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    guard.handle_signal(RawSignal::PageHide);
    world.clock.advance_ms(10_000);
    guard.poll();
    guard.handle_signal(RawSignal::PageShow);

    assert!(world.kinds().is_empty());
}

#[test]
fn wider_tolerance_turns_a_late_check_into_away() {
    let world = World::new();
    let mut guard = world.guard_with(GuardConfig {
        suspend_tolerance_ms: 1_200,
        ..GuardConfig::default()
    });
    guard
        .start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    world.clock.advance_ms(2_000);
    guard.poll();
    assert_eq!(guard.presence(), PresenceState::Away);
}

#[test]
fn session_expiry_stops_alarm_and_fires_timer_end_once() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::seconds(2))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    world.clock.advance_ms(1_100);
    guard.poll();
    assert_eq!(world.kinds(), vec![IncidentKind::Away]);
    assert_eq!(guard.alarm_state(), AlarmState::Sounding);
    assert!(world.timer.is_armed());

    world.clock.set_elapsed_ms(2_500);
    assert_eq!(guard.tick(), Some(SessionEdge::Expired));
    assert_eq!(guard.alarm_state(), AlarmState::Idle);
    assert!(!world.timer.is_armed());
    assert_eq!(world.callbacks.timer_ends(), 1);
    assert_eq!(world.lock.outstanding(), 0);
    assert!(world.store.session_end().unwrap().is_none());

    world.run_for(&mut guard, 20_000);
    assert_eq!(world.callbacks.timer_ends(), 1);
    assert_eq!(world.kinds(), vec![IncidentKind::Away]);
}

#[test]
fn expiry_wins_over_a_stale_away() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::seconds(5))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    world.clock.advance_ms(1_100);
    guard.poll();
    assert_eq!(world.alerts.spoken(), 1);

    // a background tick lands after expiry, before the session tick ran
    world.clock.advance_ms(10_000);
    guard.on_timer_tick("worker");
    assert_eq!(world.alerts.spoken(), 1);
    assert_eq!(guard.alarm_state(), AlarmState::Idle);
}

#[test]
fn confirmation_after_expiry_is_dropped() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::seconds(1))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    world.clock.advance_ms(1_100);
    guard.poll();

    assert_eq!(guard.presence(), PresenceState::Engaged);
    assert!(world.kinds().is_empty());
    assert_eq!(world.alerts.spoken(), 0);
}

#[test]
fn alarm_repeats_while_away() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    world.run_for(&mut guard, 1_100);
    assert_eq!(world.alerts.spoken(), 1);

    // background ticks and foreground polls race for the same cadence
    world.clock.advance_ms(10_000);
    guard.on_timer_tick("worker");
    guard.poll();
    guard.tick();
    assert_eq!(world.alerts.spoken(), 2);

    world.run_for(&mut guard, 10_000);
    assert_eq!(world.alerts.spoken(), 3);
    assert_eq!(world.count(IncidentKind::Away), 1);
}

#[test]
fn quick_return_cancels_confirmation() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    world.run_for(&mut guard, 300);
    guard.handle_signal(RawSignal::Visible);
    world.run_for(&mut guard, 5_000);

    assert!(world.kinds().is_empty());
    assert_eq!(guard.alarm_state(), AlarmState::Idle);
    assert_eq!(world.alerts.spoken(), 0);
}

#[test]
fn reload_is_not_a_leave() {
    let world = World::new();
    let mut page = world.guard();
    page.start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    page.handle_signal(RawSignal::BeforeUnload);
    page.handle_signal(RawSignal::PageHide);
    page.handle_signal(RawSignal::Hidden);
    drop(page);

    world.clock.advance_ms(700);
    let mut reloaded = world.guard();
    assert!(matches!(reloaded.tick(), Some(SessionEdge::Started { .. })));
    reloaded.handle_signal(RawSignal::PageShow);
    reloaded.handle_signal(RawSignal::Visible);
    world.run_for(&mut reloaded, 2_000);

    assert!(world.kinds().is_empty());
    assert_eq!(reloaded.presence(), PresenceState::Engaged);
    assert!(world.store.reload_marker().unwrap().is_none());
}

#[test]
fn signals_outside_a_session_are_ignored() {
    let world = World::new();
    let mut guard = world.guard();
    guard.tick();

    guard.handle_signal(RawSignal::Hidden);
    world.run_for(&mut guard, 5_000);
    guard.handle_signal(RawSignal::Visible);

    assert!(world.kinds().is_empty());
    assert_eq!(world.lock.requests(), 0);
}

#[test]
fn throttle_absorbs_bursts_across_the_feed() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::minutes(30))
        .unwrap();

    guard.handle_signal(RawSignal::Hidden);
    world.run_for(&mut guard, 1_100);
    // wrong PIN within the throttle window of the Away
    assert!(guard.clear_session("9999").is_err());
    assert_eq!(world.kinds(), vec![IncidentKind::Away]);

    world.run_for(&mut guard, 3_000);
    assert!(guard.clear_session("9999").is_err());
    assert_eq!(world.kinds(), vec![IncidentKind::WrongPin, IncidentKind::Away]);
}

#[test]
fn wake_lock_follows_the_session() {
    let world = World::new();
    let mut guard = world.guard();
    guard
        .start_session(world.clock.now() + Duration::seconds(30))
        .unwrap();
    assert_eq!(world.lock.outstanding(), 1);

    // hiding the page makes the platform drop the lock
    guard.handle_signal(RawSignal::Hidden);
    world.lock.auto_release();
    world.run_for(&mut guard, 300);
    guard.handle_signal(RawSignal::Visible);
    assert_eq!(world.lock.outstanding(), 1);
    assert_eq!(world.lock.requests(), 2);

    world.run_for(&mut guard, 30_000);
    assert_eq!(world.lock.outstanding(), 0);
}

#[test]
fn persisted_session_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.db");

    let world = World::with_store(Arc::new(Database::new(Some(path.clone())).unwrap()));
    let end_at = world.clock.now() + Duration::minutes(20);
    {
        let mut guard = world.guard();
        guard.start_session(end_at).unwrap();
        guard.handle_signal(RawSignal::Hidden);
        world.run_for(&mut guard, 1_200);
    }

    let reopened: Arc<dyn SessionStore> = Arc::new(Database::new(Some(path)).unwrap());
    let world = World {
        store: reopened,
        ..world
    };
    let mut guard = world.guard();
    assert_eq!(guard.tick(), Some(SessionEdge::Started { end_at }));
    assert_eq!(guard.presence(), PresenceState::Engaged);
    assert_eq!(world.kinds(), vec![IncidentKind::Away]);
}
