//! Cooperative cancellation.
//!
//! A board run is cancelled as a whole: the runner signals one
//! [`CancelToken`] and every awaitable in the agent loop observes it at its
//! suspension points. Cancellation is cooperative — nothing is aborted
//! mid-mutation, tasks are released, and actors exit cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable cancellation flag with async wakeup.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is signalled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            // Re-check after registering the waiter so a concurrent
            // cancel() between the two loads cannot be missed.
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}
