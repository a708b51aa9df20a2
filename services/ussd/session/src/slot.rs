//! The single running flag.
//!
//! Only one session may be in flight per process. Callers acquire a [`SessionPermit`]
//! before dialing; the flag is released when the permit drops, whichever way the session
//! ends.

use crate::error::SessionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared running flag; clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    running: Arc<AtomicBool>,
}

impl SessionSlot {
    /// Create an idle slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag, or fail with [`SessionError::SessionBusy`] if it is already set
    pub fn try_acquire(&self) -> Result<SessionPermit, SessionError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::SessionBusy)?;
        debug!("Session slot acquired");
        Ok(SessionPermit {
            running: Arc::clone(&self.running),
        })
    }

    /// Whether a session holds the flag
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof of holding the running flag
#[derive(Debug)]
pub struct SessionPermit {
    running: Arc<AtomicBool>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        debug!("Session slot released");
    }
}
