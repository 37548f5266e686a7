//! Recording in-memory adapters.
//!
//! Each fake is a cheap `Clone` handle over shared state, so a test keeps one
//! copy for assertions and hands the other to the guard. `vigil simulate`
//! uses them too.

use anyhow::{bail, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::alarm::{AlertChannels, NotificationChannel, SpeechChannel, Tone, ToneChannel, TimingSource};
use crate::guard::GuardCallbacks;
use crate::wake_lock::{WakeLockProvider, WakeLockToken};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    SpeechCancelled,
    Spoke(String),
    Tone(u32),
    /// Notification shown, by tag
    Notified(String),
}

#[derive(Debug, Default)]
struct RecorderState {
    events: Vec<AlertEvent>,
    permission_granted: bool,
    fail_speech: bool,
}

/// Records every alert channel call in order
#[derive(Debug, Clone, Default)]
pub struct AlertRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl AlertRecorder {
    #[must_use]
    pub fn new(permission_granted: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                permission_granted,
                ..RecorderState::default()
            })),
        }
    }

    /// All three channels backed by this recorder
    #[must_use]
    pub fn channels(&self) -> AlertChannels {
        AlertChannels {
            speech: Some(Box::new(self.clone())),
            tone: Some(Box::new(self.clone())),
            notifications: Some(Box::new(self.clone())),
        }
    }

    /// Make `speak` fail, as when no voice is installed
    pub fn fail_speech(&self, fail: bool) {
        lock(&self.state).fail_speech = fail;
    }

    #[must_use]
    pub fn events(&self) -> Vec<AlertEvent> {
        lock(&self.state).events.clone()
    }

    /// Number of phrases spoken so far
    #[must_use]
    pub fn spoken(&self) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| matches!(e, AlertEvent::Spoke(_)))
            .count()
    }

    pub fn clear(&self) {
        lock(&self.state).events.clear();
    }
}

impl SpeechChannel for AlertRecorder {
    fn speak(&mut self, phrase: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_speech {
            bail!("speech synthesis unavailable");
        }
        state.events.push(AlertEvent::Spoke(phrase.to_string()));
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        lock(&self.state).events.push(AlertEvent::SpeechCancelled);
        Ok(())
    }
}

impl ToneChannel for AlertRecorder {
    fn play(&mut self, tone: Tone) -> Result<()> {
        lock(&self.state).events.push(AlertEvent::Tone(tone.frequency_hz));
        Ok(())
    }
}

impl NotificationChannel for AlertRecorder {
    fn permission_granted(&self) -> bool {
        lock(&self.state).permission_granted
    }

    fn notify(&mut self, _title: &str, _body: &str, tag: &str) -> Result<()> {
        lock(&self.state).events.push(AlertEvent::Notified(tag.to_string()));
        Ok(())
    }
}

/// Timing source whose ticks are delivered by hand
#[derive(Debug, Clone)]
pub struct ManualTimer {
    name: String,
    available: bool,
    armed_interval: Arc<Mutex<Option<u64>>>,
}

impl ManualTimer {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            armed_interval: Arc::new(Mutex::new(None)),
        }
    }

    /// A source that fails capability detection
    #[must_use]
    pub fn unavailable(name: &str) -> Self {
        Self {
            available: false,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        lock(&self.armed_interval).is_some()
    }

    #[must_use]
    pub fn interval_ms(&self) -> Option<u64> {
        *lock(&self.armed_interval)
    }
}

impl TimingSource for ManualTimer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn arm(&mut self, interval_ms: u64) -> Result<()> {
        *lock(&self.armed_interval) = Some(interval_ms);
        Ok(())
    }

    fn disarm(&mut self) {
        *lock(&self.armed_interval) = None;
    }
}

#[derive(Debug, Default)]
struct FakeLockState {
    supported: bool,
    next_id: u64,
    held: Option<u64>,
    requests: usize,
    releases: usize,
}

/// Wake lock that can be dropped "by the platform" on demand
#[derive(Debug, Clone, Default)]
pub struct FakeWakeLock {
    state: Arc<Mutex<FakeLockState>>,
}

impl FakeWakeLock {
    #[must_use]
    pub fn new(supported: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeLockState {
                supported,
                ..FakeLockState::default()
            })),
        }
    }

    /// Drop the lock the way a browser does when the page is hidden
    pub fn auto_release(&self) {
        lock(&self.state).held = None;
    }

    #[must_use]
    pub fn requests(&self) -> usize {
        lock(&self.state).requests
    }

    #[must_use]
    pub fn releases(&self) -> usize {
        lock(&self.state).releases
    }

    /// Locks currently held; never more than one
    #[must_use]
    pub fn outstanding(&self) -> usize {
        usize::from(lock(&self.state).held.is_some())
    }
}

impl WakeLockProvider for FakeWakeLock {
    fn is_supported(&self) -> bool {
        lock(&self.state).supported
    }

    fn request(&mut self) -> Result<WakeLockToken> {
        let mut state = lock(&self.state);
        if state.held.is_some() {
            bail!("wake lock already held");
        }
        state.requests += 1;
        state.next_id += 1;
        state.held = Some(state.next_id);
        Ok(WakeLockToken::new(state.next_id))
    }

    fn is_held(&self, token: &WakeLockToken) -> bool {
        lock(&self.state).held == Some(token.id())
    }

    fn release(&mut self, token: WakeLockToken) -> Result<()> {
        let mut state = lock(&self.state);
        if state.held == Some(token.id()) {
            state.held = None;
        }
        state.releases += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CallbackLog {
    timer_ends: usize,
    returns: Vec<chrono::Duration>,
}

/// Counts UI callbacks
#[derive(Debug, Clone, Default)]
pub struct RecordingCallbacks {
    log: Arc<Mutex<CallbackLog>>,
}

impl RecordingCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timer_ends(&self) -> usize {
        lock(&self.log).timer_ends
    }

    #[must_use]
    pub fn returns(&self) -> Vec<chrono::Duration> {
        lock(&self.log).returns.clone()
    }
}

impl GuardCallbacks for RecordingCallbacks {
    fn on_timer_end(&mut self) {
        lock(&self.log).timer_ends += 1;
    }

    fn on_return(&mut self, dwell: chrono::Duration) {
        lock(&self.log).returns.push(dwell);
    }
}
