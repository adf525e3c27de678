//! Cooperative cancellation for long-running serial waits.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::error::{Error, Result};

/// Shared cancellation flag.
///
/// Clones share the same flag. The embedding application raises it (for
/// example from a Ctrl-C handler) and every blocking wait in the transport
/// observes it within one poll slice.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    /// Create a new, un-raised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn abort(&self) {
        self.flag
            .store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        self.flag
            .load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Aborted`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }
}
