pub mod alarm;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod guard;
pub mod incident_log;
pub mod ipc;
pub mod pin;
pub mod platform;
pub mod reminder;
pub mod session_clock;
pub mod signal_fusion;
pub mod wake_lock;

pub use alarm::{AlarmScheduler, AlarmState, Alert, AlertChannels};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use daemon::Daemon;
pub use error::GuardError;
pub use guard::{GuardCallbacks, GuardParts, GuardStatus, PresenceGuard};
pub use incident_log::IncidentLog;
pub use reminder::{ReminderPhase, StudyReminder};
pub use session_clock::{SessionClock, SessionEdge};
pub use signal_fusion::{classify, FusionTuning, PresenceState, RawSignal, SignalFusion, Transition};
pub use wake_lock::WakeLockCoordinator;
