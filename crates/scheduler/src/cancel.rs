//! Cooperative cancellation for fetch batches
//!
//! Every batch handed to a loader carries a token. The scheduler fires the
//! token when the batch goes stale; the loader may poll it to stop early, and
//! the result-application step checks it again before any record is written.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared cancellation flag for one fetch batch
///
/// Clones observe the same flag. Cancelling is idempotent and cancelling a
/// token whose batch already completed has no effect on the cached records.
///
/// # Example
///
/// ```
/// use lectern_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let loader_side = token.clone();
///
/// token.cancel();
/// assert!(loader_side.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the live (not cancelled) state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fire the token. Every clone observes the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once `cancel()` has been called on this token or a clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles share the same flag
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
