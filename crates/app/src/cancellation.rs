//! Cooperative cancellation for repository and unit-of-work operations.
//!
//! A [`Cancellation`] observes a `tokio::sync::watch` channel carrying a
//! shutdown flag. Operations check it before every storage round trip and
//! surface [`PersistenceError::Cancelled`] once the flag is raised.

use tokio::sync::watch;
use unitwork_domain::error::PersistenceError;

/// Read side of a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    signal: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a linked trigger and signal. Sending `true` cancels.
    #[must_use]
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self::from(rx))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fail with [`PersistenceError::Cancelled`] once the signal fired.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Cancelled`] when cancellation was requested.
    pub fn check(&self) -> Result<(), PersistenceError> {
        if self.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }
        Ok(())
    }
}

impl From<watch::Receiver<bool>> for Cancellation {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { signal: Some(rx) }
    }
}
