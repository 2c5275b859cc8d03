//! Resettable one-shot signal used by waiters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct SignalInner {
    set: AtomicBool,
    notify: Notify,
}

impl SignalInner {
    pub(crate) fn set(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// A flag that a task can wait on with a timeout.
///
/// Clones share the same flag. The registry keeps only a weak reference, so a
/// signal dropped by its owner is never delivered to.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every task waiting on it.
    pub fn set(&self) {
        self.inner.set();
    }

    /// Clears the flag so the signal can be reused.
    pub fn reset(&self) {
        self.inner.set.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Waits until the flag is set or `timeout` elapses.
    ///
    /// Returns `true` if the flag was set, `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_set() {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_set();
            }
        }
    }

    /// Whether both handles refer to the same signal.
    pub fn same_as(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<SignalInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn is(&self, weak: &Weak<SignalInner>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), weak.as_ptr())
    }
}
