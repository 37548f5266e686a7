use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened during a guarded session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// User switched away from the app while the session was running
    Away,
    /// Screen was turned off or the device was locked
    ScreenOff,
    /// User came back after an `Away`
    Returned,
    /// Someone entered the wrong parental PIN
    WrongPin,
    /// Session was ended early through the PIN gate
    ForcedExit,
    /// A new study session was started
    SessionStarted,
    /// Session timer ran out
    SessionCompleted,
}

impl IncidentKind {
    /// Human-readable description for history screens
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Away => "Left the app",
            Self::ScreenOff => "Screen turned off",
            Self::Returned => "Came back",
            Self::WrongPin => "Wrong PIN entered",
            Self::ForcedExit => "Session ended early",
            Self::SessionStarted => "Session started",
            Self::SessionCompleted => "Session completed",
        }
    }

    /// Security events are the ones a parent would want highlighted
    #[must_use]
    pub const fn is_security(&self) -> bool {
        matches!(self, Self::WrongPin | Self::ForcedExit)
    }
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Away => write!(f, "away"),
            Self::ScreenOff => write!(f, "screen_off"),
            Self::Returned => write!(f, "returned"),
            Self::WrongPin => write!(f, "wrong_pin"),
            Self::ForcedExit => write!(f, "forced_exit"),
            Self::SessionStarted => write!(f, "session_started"),
            Self::SessionCompleted => write!(f, "session_completed"),
        }
    }
}

impl std::str::FromStr for IncidentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "away" => Ok(Self::Away),
            "screen_off" => Ok(Self::ScreenOff),
            "returned" => Ok(Self::Returned),
            "wrong_pin" => Ok(Self::WrongPin),
            "forced_exit" => Ok(Self::ForcedExit),
            "session_started" => Ok(Self::SessionStarted),
            "session_completed" => Ok(Self::SessionCompleted),
            _ => Err(format!("Unknown incident kind: {s}")),
        }
    }
}

/// A single entry in the append-only incident feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub kind: IncidentKind,
    pub at: DateTime<Utc>,
    pub meta: Option<String>,
}

impl Incident {
    #[must_use]
    pub fn new(kind: IncidentKind, at: DateTime<Utc>, meta: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            at,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in [
            IncidentKind::Away,
            IncidentKind::ScreenOff,
            IncidentKind::Returned,
            IncidentKind::WrongPin,
            IncidentKind::ForcedExit,
            IncidentKind::SessionStarted,
            IncidentKind::SessionCompleted,
        ] {
            assert_eq!(kind.to_string().parse::<IncidentKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!("teleported".parse::<IncidentKind>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&IncidentKind::WrongPin).unwrap();
        assert_eq!(json, "\"wrong_pin\"");
    }

    #[test]
    fn test_security_kinds() {
        assert!(IncidentKind::WrongPin.is_security());
        assert!(IncidentKind::ForcedExit.is_security());
        assert!(!IncidentKind::Away.is_security());
    }
}
