//! Cooperative cancellation for store-bound operations.
//!
//! The core only consults cancellation at suspension points (immediately
//! before a store read or conditional write), so a poll-only token — an
//! atomic flag behind an `Arc` — is sufficient; there is no need to wake
//! waiters.  Cloning shares the flag: cancelling any clone cancels all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{StoreError, StoreResult};

/// A cloneable cancellation flag handed into every public core operation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.  Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Bail out with [`StoreError::Cancelled`] if the flag is set.
    pub fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}
