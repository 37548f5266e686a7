//! Presence classification from raw platform signals.
//!
//! `hidden` fires both when the user switches apps and when the screen is
//! locked, and no platform flag tells the two apart. Instead of acting on a
//! leave-type signal immediately, a confirmation check is scheduled a short
//! delay ahead. A locked screen freezes the runtime, so that check fires
//! late; an app switch leaves background execution running and the check
//! fires on time.
//!
//! ## State Transitions
//!
//! ```text
//! Engaged --leave + on-time check--> Away --return--> Engaged (Returned)
//! Engaged --leave + late check-----> ScreenOff --return--> Engaged (silent)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_storage::SessionStore;

use crate::clock::Clock;

/// A raw notification from the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawSignal {
    /// Document visibility became hidden
    Hidden,
    /// Document visibility became visible
    Visible,
    /// Window lost focus
    Blurred,
    /// Window gained focus
    Focused,
    /// Page is being hidden by navigation or app switch
    PageHide,
    /// Page is being shown again
    PageShow,
    /// Navigation (usually a reload) is about to happen
    BeforeUnload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDirection {
    Leave,
    Return,
    Unload,
}

impl RawSignal {
    #[must_use]
    pub const fn direction(&self) -> SignalDirection {
        match self {
            Self::Hidden | Self::Blurred | Self::PageHide => SignalDirection::Leave,
            Self::Visible | Self::Focused | Self::PageShow => SignalDirection::Return,
            Self::BeforeUnload => SignalDirection::Unload,
        }
    }
}

impl std::fmt::Display for RawSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hidden => write!(f, "hidden"),
            Self::Visible => write!(f, "visible"),
            Self::Blurred => write!(f, "blur"),
            Self::Focused => write!(f, "focus"),
            Self::PageHide => write!(f, "pagehide"),
            Self::PageShow => write!(f, "pageshow"),
            Self::BeforeUnload => write!(f, "beforeunload"),
        }
    }
}

impl std::str::FromStr for RawSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "hidden" => Ok(Self::Hidden),
            "visible" => Ok(Self::Visible),
            "blur" | "blurred" => Ok(Self::Blurred),
            "focus" | "focused" => Ok(Self::Focused),
            "pagehide" => Ok(Self::PageHide),
            "pageshow" => Ok(Self::PageShow),
            "beforeunload" => Ok(Self::BeforeUnload),
            _ => Err(format!(
                "Unknown signal: {s}. Use: hidden, visible, blur, focus, pagehide, pageshow, beforeunload"
            )),
        }
    }
}

/// Classified real-world status of the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Engaged,
    Away,
    ScreenOff,
}

impl PresenceState {
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Engaged => "Studying",
            Self::Away => "Away",
            Self::ScreenOff => "Screen off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionTuning {
    pub confirm_delay_ms: u64,
    pub suspend_tolerance_ms: u64,
    pub reentrancy_lock_ms: u64,
    pub reload_window_ms: u64,
}

impl Default for FusionTuning {
    fn default() -> Self {
        Self {
            confirm_delay_ms: 1_100,
            suspend_tolerance_ms: 500,
            reentrancy_lock_ms: 600,
            reload_window_ms: 3_000,
        }
    }
}

/// Classify a signal given how long its confirmation check actually took.
///
/// Return and unload signals carry no evidence of leaving. A leave signal
/// whose check ran later than `confirm_delay_ms + suspend_tolerance_ms`
/// means the runtime was suspended, i.e. the screen went off.
#[must_use]
pub fn classify(signal: RawSignal, elapsed_ms: u64, tuning: &FusionTuning) -> PresenceState {
    match signal.direction() {
        SignalDirection::Return | SignalDirection::Unload => PresenceState::Engaged,
        SignalDirection::Leave => {
            let limit = tuning
                .confirm_delay_ms
                .saturating_add(tuning.suspend_tolerance_ms);
            if elapsed_ms > limit {
                PresenceState::ScreenOff
            } else {
                PresenceState::Away
            }
        }
    }
}

/// Outcome of a classification that changed the presence state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentAway { at: DateTime<Utc> },
    ScreenOff { elapsed_ms: u64 },
    Returned { dwell: chrono::Duration },
    /// Back from `ScreenOff`; nothing was logged on the way out
    Resumed,
}

#[derive(Debug, Clone, Copy)]
struct PendingCheck {
    signal: RawSignal,
    scheduled_ms: u64,
}

pub struct SignalFusion {
    tuning: FusionTuning,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    state: PresenceState,
    pending: Option<PendingCheck>,
    locked_until_ms: Option<u64>,
    suppressed_until_ms: Option<u64>,
    away_since: Option<DateTime<Utc>>,
}

impl SignalFusion {
    /// Create the state machine for a fresh page load.
    ///
    /// A reload marker left by the previous page within the reload window
    /// suppresses leave/return signals for the rest of that window. The
    /// marker is consumed either way.
    #[must_use]
    pub fn new(tuning: FusionTuning, store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        let mut fusion = Self {
            tuning,
            store,
            clock,
            state: PresenceState::Engaged,
            pending: None,
            locked_until_ms: None,
            suppressed_until_ms: None,
            away_since: None,
        };
        fusion.consume_reload_marker();
        fusion
    }

    fn consume_reload_marker(&mut self) {
        let marker = match self.store.reload_marker() {
            Ok(marker) => marker,
            Err(e) => {
                log::warn!("Failed to read reload marker: {e}");
                return;
            }
        };
        let Some(marked_at) = marker else {
            return;
        };

        let age_ms = self
            .clock
            .now()
            .signed_duration_since(marked_at)
            .num_milliseconds();
        let window = i64::try_from(self.tuning.reload_window_ms).unwrap_or(i64::MAX);
        if (0..window).contains(&age_ms) {
            let remaining = u64::try_from(window - age_ms).unwrap_or(0);
            self.suppressed_until_ms = Some(self.clock.monotonic_ms() + remaining);
            log::info!("Page reloaded {age_ms} ms ago, ignoring presence signals for {remaining} ms");
        }

        if let Err(e) = self.store.set_reload_marker(None) {
            log::warn!("Failed to clear reload marker: {e}");
        }
    }

    #[must_use]
    pub fn state(&self) -> PresenceState {
        self.state
    }

    /// When the user was classified as away, if they currently are
    #[must_use]
    pub fn away_since(&self) -> Option<DateTime<Utc>> {
        self.away_since
    }

    /// Monotonic deadline of the pending confirmation check
    #[must_use]
    pub fn pending_deadline_ms(&self) -> Option<u64> {
        self.pending
            .map(|p| p.scheduled_ms + self.tuning.confirm_delay_ms)
    }

    /// Back to `Engaged` with nothing pending, e.g. when a session starts or ends
    pub fn reset(&mut self) {
        self.state = PresenceState::Engaged;
        self.pending = None;
        self.locked_until_ms = None;
        self.away_since = None;
    }

    pub fn cancel_pending(&mut self) {
        if self.pending.take().is_some() {
            log::debug!("Cancelled pending confirmation check");
        }
    }

    fn is_locked(&self, now_ms: u64) -> bool {
        self.locked_until_ms.is_some_and(|until| now_ms < until)
    }

    fn is_suppressed(&self, now_ms: u64) -> bool {
        self.suppressed_until_ms.is_some_and(|until| now_ms < until)
    }

    fn lock(&mut self, now_ms: u64) {
        self.locked_until_ms = Some(now_ms + self.tuning.reentrancy_lock_ms);
    }

    /// Feed one raw signal. Returns a transition only for return signals
    /// that end an excursion; leave signals are resolved later by [`poll`].
    ///
    /// [`poll`]: SignalFusion::poll
    pub fn handle(&mut self, signal: RawSignal, session_active: bool) -> Option<Transition> {
        let now_ms = self.clock.monotonic_ms();

        if signal == RawSignal::BeforeUnload {
            self.mark_reload(now_ms);
            return None;
        }

        if !session_active {
            if self.state != PresenceState::Engaged || self.pending.is_some() {
                self.reset();
            }
            log::debug!("Ignoring {signal}: no active session");
            return None;
        }

        if self.is_suppressed(now_ms) {
            log::debug!("Ignoring {signal}: page is reloading");
            return None;
        }

        match signal.direction() {
            SignalDirection::Leave => {
                self.schedule_check(signal, now_ms);
                None
            }
            SignalDirection::Return => self.handle_return(signal, now_ms),
            SignalDirection::Unload => None,
        }
    }

    fn mark_reload(&mut self, now_ms: u64) {
        self.cancel_pending();
        self.suppressed_until_ms = Some(now_ms + self.tuning.reload_window_ms);
        if let Err(e) = self.store.set_reload_marker(Some(self.clock.now())) {
            log::warn!("Failed to persist reload marker: {e}");
        }
        log::debug!("Reload announced, suppressing presence signals");
    }

    fn schedule_check(&mut self, signal: RawSignal, now_ms: u64) {
        if self.state != PresenceState::Engaged {
            log::debug!("Ignoring {signal}: already {:?}", self.state);
            return;
        }
        if self.pending.is_some() {
            log::debug!("Ignoring {signal}: confirmation already pending");
            return;
        }
        if self.is_locked(now_ms) {
            log::debug!("Ignoring {signal}: transition lock held");
            return;
        }

        self.pending = Some(PendingCheck {
            signal,
            scheduled_ms: now_ms,
        });
        log::debug!(
            "{signal} received, confirming in {} ms",
            self.tuning.confirm_delay_ms
        );
    }

    fn handle_return(&mut self, signal: RawSignal, now_ms: u64) -> Option<Transition> {
        self.cancel_pending();

        match self.state {
            PresenceState::Engaged => None,
            PresenceState::Away => {
                let dwell = self
                    .away_since
                    .take()
                    .map_or_else(chrono::Duration::zero, |since| {
                        self.clock.now().signed_duration_since(since)
                    });
                self.state = PresenceState::Engaged;
                self.lock(now_ms);
                log::info!("User returned ({signal}) after {}s", dwell.num_seconds());
                Some(Transition::Returned { dwell })
            }
            PresenceState::ScreenOff => {
                self.state = PresenceState::Engaged;
                self.lock(now_ms);
                log::info!("Screen back on ({signal})");
                Some(Transition::Resumed)
            }
        }
    }

    /// Fire the pending confirmation check if it is due.
    pub fn poll(&mut self, session_active: bool) -> Option<Transition> {
        let now_ms = self.clock.monotonic_ms();
        let pending = self.pending?;
        if now_ms < pending.scheduled_ms + self.tuning.confirm_delay_ms {
            return None;
        }
        self.pending = None;

        if !session_active {
            log::debug!("Dropping confirmation check: session no longer active");
            return None;
        }
        if self.state != PresenceState::Engaged || self.is_suppressed(now_ms) {
            return None;
        }

        let elapsed_ms = now_ms - pending.scheduled_ms;
        match classify(pending.signal, elapsed_ms, &self.tuning) {
            PresenceState::Away => {
                let at = self.clock.now();
                self.state = PresenceState::Away;
                self.away_since = Some(at);
                self.lock(now_ms);
                log::info!("User left the app ({}, confirmed after {elapsed_ms} ms)", pending.signal);
                Some(Transition::WentAway { at })
            }
            PresenceState::ScreenOff => {
                self.state = PresenceState::ScreenOff;
                self.lock(now_ms);
                log::info!("Runtime was paused for {elapsed_ms} ms, treating as screen off");
                Some(Transition::ScreenOff { elapsed_ms })
            }
            PresenceState::Engaged => None,
        }
    }
}
