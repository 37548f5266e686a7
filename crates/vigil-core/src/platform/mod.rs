//! Host adapters for alert channels, timing sources and the wake lock.

use tokio::sync::mpsc::UnboundedSender;

use crate::alarm::{AlertChannels, NotificationChannel, SpeechChannel, TimingSource};
use crate::config::GuardConfig;
use crate::guard::GuardParts;
use crate::wake_lock::WakeLockProvider;

pub mod memory;
pub mod terminal;
pub mod worker;

pub use worker::{TimerTick, WorkerTimer};

/// Detect what this host can do and build the guard's adapters.
///
/// Missing tools simply leave the matching channel empty. Background ticks
/// are delivered on `ticks` when given.
#[must_use]
pub fn host_parts(config: &GuardConfig, ticks: Option<UnboundedSender<TimerTick>>) -> GuardParts {
    let speech = terminal::SpokenAlert::detect().map(|s| Box::new(s) as Box<dyn SpeechChannel>);
    if speech.is_none() {
        log::warn!("No speech program found (say, spd-say, espeak); spoken alerts disabled");
    }

    let notifications = terminal::DesktopNotifier::detect(config.notifications_granted)
        .map(|n| Box::new(n) as Box<dyn NotificationChannel>);
    if notifications.is_none() {
        log::info!("No desktop notifier found; notifications disabled");
    }

    let wake_lock = terminal::InhibitWakeLock::detect()
        .map(|lock| Box::new(lock) as Box<dyn WakeLockProvider>);
    if wake_lock.is_none() {
        log::info!("No caffeinate or systemd-inhibit; screen may sleep during sessions");
    }

    let timing_sources: Vec<Box<dyn TimingSource>> = ticks
        .map(|tx| Box::new(WorkerTimer::new("worker", tx)) as Box<dyn TimingSource>)
        .into_iter()
        .collect();

    GuardParts {
        channels: AlertChannels {
            speech,
            tone: Some(Box::new(terminal::TerminalBell)),
            notifications,
        },
        timing_sources,
        wake_lock,
        ..GuardParts::default()
    }
}
