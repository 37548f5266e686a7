//! Parental PIN gate for leaving a session early or wiping the history.

use std::sync::Arc;
use vigil_storage::{IncidentKind, SessionStore};

use crate::error::{GuardError, Result};
use crate::incident_log::IncidentLog;

pub const PIN_LEN: usize = 4;

/// # Errors
///
/// Returns [`GuardError::InvalidPin`] unless `pin` is exactly four ASCII digits.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() == PIN_LEN && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(GuardError::InvalidPin)
    }
}

pub struct PinGate {
    store: Arc<dyn SessionStore>,
    default_pin: String,
}

impl PinGate {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, default_pin: impl Into<String>) -> Self {
        Self {
            store,
            default_pin: default_pin.into(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn has_custom_pin(&self) -> Result<bool> {
        Ok(self.store.pin()?.is_some())
    }

    fn expected(&self) -> Result<String> {
        Ok(self
            .store
            .pin()?
            .unwrap_or_else(|| self.default_pin.clone()))
    }

    /// Check `pin` against the stored PIN, or the default when none is set.
    /// A mismatch is recorded as a `WrongPin` incident.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::WrongPin`] on mismatch, or a storage error.
    pub fn verify(&self, pin: &str, incidents: &IncidentLog) -> Result<()> {
        if pin == self.expected()? {
            return Ok(());
        }
        log::warn!("Wrong PIN entered");
        incidents.append(IncidentKind::WrongPin, None);
        Err(GuardError::WrongPin)
    }

    /// Replace the PIN. Once a custom PIN exists, `current` must match it.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidPin`] if `new_pin` is malformed,
    /// [`GuardError::WrongPin`] if `current` does not match, or a storage error.
    pub fn change_pin(
        &self,
        current: Option<&str>,
        new_pin: &str,
        incidents: &IncidentLog,
    ) -> Result<()> {
        validate_pin(new_pin)?;
        if self.has_custom_pin()? {
            self.verify(current.unwrap_or_default(), incidents)?;
        }
        self.store.set_pin(new_pin)?;
        log::info!("PIN updated");
        Ok(())
    }
}
