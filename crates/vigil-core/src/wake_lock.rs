//! Screen wake lock held for the lifetime of an active session.

use anyhow::Result;

/// Proof of one acquisition. Not `Clone`: it is handed back to the
/// provider by value, so a token can be released only once.
#[derive(Debug, PartialEq, Eq)]
pub struct WakeLockToken {
    id: u64,
}

impl WakeLockToken {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub trait WakeLockProvider: Send {
    fn is_supported(&self) -> bool;

    fn request(&mut self) -> Result<WakeLockToken>;

    /// `false` once the platform has dropped the lock on its own,
    /// e.g. because the page was hidden
    fn is_held(&self, token: &WakeLockToken) -> bool;

    fn release(&mut self, token: WakeLockToken) -> Result<()>;
}

pub struct WakeLockCoordinator {
    provider: Option<Box<dyn WakeLockProvider>>,
    token: Option<WakeLockToken>,
}

impl WakeLockCoordinator {
    #[must_use]
    pub fn new(provider: Option<Box<dyn WakeLockProvider>>) -> Self {
        let provider = provider.filter(|p| {
            let supported = p.is_supported();
            if !supported {
                log::debug!("Wake lock not supported on this host");
            }
            supported
        });
        Self {
            provider,
            token: None,
        }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.provider.is_some()
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        match (&self.provider, &self.token) {
            (Some(provider), Some(token)) => provider.is_held(token),
            _ => false,
        }
    }

    /// Best effort. Re-requests when the platform released the lock behind
    /// our back; otherwise a no-op while held.
    pub fn acquire(&mut self) {
        let Some(provider) = self.provider.as_mut() else {
            return;
        };

        if let Some(token) = self.token.take() {
            if provider.is_held(&token) {
                self.token = Some(token);
                return;
            }
            log::debug!("Wake lock {} was released by the platform", token.id());
        }

        match provider.request() {
            Ok(token) => {
                log::debug!("Wake lock {} acquired", token.id());
                self.token = Some(token);
            }
            Err(e) => log::warn!("Failed to acquire wake lock: {e}"),
        }
    }

    /// Idempotent
    pub fn release(&mut self) {
        let (Some(provider), Some(token)) = (self.provider.as_mut(), self.token.take()) else {
            return;
        };
        let id = token.id();
        match provider.release(token) {
            Ok(()) => log::debug!("Wake lock {id} released"),
            Err(e) => log::warn!("Failed to release wake lock {id}: {e}"),
        }
    }
}
