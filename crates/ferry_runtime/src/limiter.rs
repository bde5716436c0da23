//! Optional cap on concurrently running agent processes.
//!
//! Callers over the cap wait for a permit instead of being rejected, so a
//! burst of executions queues up rather than failing.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrency limiter
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Option<Arc<Semaphore>>,
    limit: Option<usize>,
}

impl ConcurrencyLimiter {
    /// Create a limiter; `None` never waits
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        let limit = limit.filter(|&n| n > 0);
        Self {
            semaphore: limit.map(|n| Arc::new(Semaphore::new(n))),
            limit,
        }
    }

    /// A limiter that never waits
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Wait for a slot
    ///
    /// The slot is held until the returned permit is dropped. Unbounded
    /// limiters return `None` immediately.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.semaphore.as_ref()?;
        // The semaphore is never closed, so acquisition only fails if it were.
        Arc::clone(semaphore).acquire_owned().await.ok()
    }

    /// Configured cap
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Free slots, `None` when unbounded
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Check whether a caller would have to wait right now
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.available() == Some(0)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::unbounded()
    }
}
