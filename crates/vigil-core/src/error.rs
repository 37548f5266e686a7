//! Errors surfaced to the UI layer.
//!
//! Background paths (signals, ticks, alert channels) never return errors;
//! only explicit user actions such as PIN entry do.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Wrong PIN")]
    WrongPin,

    #[error("PIN must be exactly 4 digits")]
    InvalidPin,

    #[error("Session end {0} is not in the future")]
    SessionEndInPast(DateTime<Utc>),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = GuardError> = std::result::Result<T, E>;
