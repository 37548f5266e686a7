//! Time sources.
//!
//! Every component reads time through [`Clock`] so that wall-clock checks
//! (session expiry, throttling) and monotonic measurements (suspension
//! detection) can be driven deterministically in tests and simulations.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since an arbitrary fixed origin; never goes backwards
    fn monotonic_ms(&self) -> u64;
}

/// Elapsed time that keeps counting across a host sleep.
///
/// `Instant` stops while the machine is suspended, so each observation
/// advances by the larger of the monotonic and the wall-clock delta. A wall
/// clock stepped backwards contributes nothing.
#[derive(Debug)]
struct SuspendAwareElapsed {
    last_mono_ms: u64,
    last_wall: DateTime<Utc>,
    total_ms: u64,
}

impl SuspendAwareElapsed {
    fn new(wall: DateTime<Utc>) -> Self {
        Self {
            last_mono_ms: 0,
            last_wall: wall,
            total_ms: 0,
        }
    }

    fn observe(&mut self, mono_ms: u64, wall: DateTime<Utc>) -> u64 {
        let mono_delta = mono_ms.saturating_sub(self.last_mono_ms);
        let wall_delta = u64::try_from((wall - self.last_wall).num_milliseconds()).unwrap_or(0);

        self.total_ms += mono_delta.max(wall_delta);
        self.last_mono_ms = self.last_mono_ms.max(mono_ms);
        self.last_wall = wall;
        self.total_ms
    }
}

/// Production clock backed by `Utc::now` and `Instant`.
///
/// `monotonic_ms` includes time spent suspended, which is what makes a late
/// confirmation after a lid close visible as a screen-off.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
    elapsed: Mutex<SuspendAwareElapsed>,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(SuspendAwareElapsed::new(Utc::now())),
        }
    }

    /// The `Instant` at which the clock reaches `monotonic_ms`, or now if it
    /// already has
    #[must_use]
    pub fn instant_at(&self, monotonic_ms: u64) -> Instant {
        let now = Instant::now();
        now + Duration::from_millis(monotonic_ms.saturating_sub(self.monotonic_ms()))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn instant_elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> u64 {
        let mono_ms = self.instant_elapsed_ms();
        let mut elapsed = self
            .elapsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        elapsed.observe(mono_ms, Utc::now())
    }
}

/// Clock that only moves when told to.
///
/// Wall and monotonic time advance together. A runtime freeze is modelled by
/// advancing the clock without polling anything in between.
#[derive(Debug)]
pub struct ManualClock {
    wall_origin: DateTime<Utc>,
    elapsed_ms: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            elapsed_ms: AtomicU64::new(0),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Move forward to `ms` since creation; earlier targets are ignored
    pub fn set_elapsed_ms(&self, ms: u64) {
        self.elapsed_ms.fetch_max(ms, Ordering::SeqCst);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = i64::try_from(self.elapsed_ms()).unwrap_or(i64::MAX);
        self.wall_origin + chrono::Duration::milliseconds(elapsed)
    }

    fn monotonic_ms(&self) -> u64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_moves_wall_and_monotonic_together() {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let clock = ManualClock::new(origin);

        clock.advance_ms(1_500);
        assert_eq!(clock.monotonic_ms(), 1_500);
        assert_eq!(clock.now(), origin + chrono::Duration::milliseconds(1_500));
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new(Utc::now());
        clock.set_elapsed_ms(2_000);
        clock.set_elapsed_ms(1_000);
        assert_eq!(clock.monotonic_ms(), 2_000);
    }

    #[test]
    fn test_system_clock_instant_mapping() {
        let clock = SystemClock::new();
        let at = clock.monotonic_ms();
        assert!(clock.instant_at(at + 10) > clock.instant_at(at));
    }

    #[test]
    fn test_elapsed_counts_host_sleep() {
        let wall = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mut elapsed = SuspendAwareElapsed::new(wall);

        assert_eq!(elapsed.observe(1_000, wall + chrono::Duration::seconds(1)), 1_000);
        // suspended for a minute: Instant barely moved, the wall clock did
        assert_eq!(elapsed.observe(1_100, wall + chrono::Duration::seconds(61)), 61_000);
        assert_eq!(elapsed.observe(1_600, wall + chrono::Duration::milliseconds(61_500)), 61_500);
    }

    #[test]
    fn test_elapsed_ignores_wall_clock_stepping_back() {
        let wall = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mut elapsed = SuspendAwareElapsed::new(wall);

        assert_eq!(elapsed.observe(500, wall - chrono::Duration::hours(1)), 500);
        assert_eq!(elapsed.observe(900, wall - chrono::Duration::hours(1)), 900);
    }
}
