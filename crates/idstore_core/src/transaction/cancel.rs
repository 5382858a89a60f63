//! Cooperative cancellation.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable cancellation signal.
///
/// The runner checks the token before every attempt and waits on it during
/// retry back-off, so cancelling wakes a sleeping retry loop immediately.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Signal>,
}

#[derive(Debug, Default)]
struct Signal {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wakeup.notify_all();
    }

    /// Returns true once [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleeps for `timeout` unless cancelled first.
    ///
    /// Returns true if the token was cancelled before or during the wait.
    ///
    /// A timeout too large to express as a deadline waits for cancellation alone.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*cancelled {
                self.inner.wakeup.wait(&mut cancelled);
            }
            return true;
        };
        while !*cancelled {
            if self
                .inner
                .wakeup
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}
