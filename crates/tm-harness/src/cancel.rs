//! Cooperative cancellation.
//!
//! A [`CancelToken`] is cloned into every long-running component. Cancelling
//! it wakes interruptible sleeps, runs registered cleanup callbacks in LIFO
//! order, and makes `is_cancelled` observable everywhere. The work loop
//! checks the token at stage boundaries so a Ctrl-C lands between steps, not
//! mid-write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Returned by [`CancelToken::sleep`] when the wait was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    callbacks: Mutex<Vec<Callback>>,
}

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Flip the token and run cleanup callbacks, most recently registered
    /// first. Idempotent: a second cancel is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("cancellation requested");
        self.inner.notify.notify_waiters();

        let callbacks = {
            let mut guard = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        for callback in callbacks.into_iter().rev() {
            callback();
        }
    }

    /// Register a cleanup callback. Callbacks run in reverse registration
    /// order on cancel; if the token is already cancelled the callback runs
    /// immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            callback();
            return;
        }
        let mut guard = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Re-check under the lock so a concurrent cancel cannot strand us.
        if self.inner.cancelled.load(Ordering::SeqCst) {
            drop(guard);
            callback();
        } else {
            guard.push(Box::new(callback));
        }
    }

    /// Sleep that wakes early on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.inner.notify.notified() => Err(Cancelled),
        }
    }

    /// Wait indefinitely for cancellation.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }

    /// Wire Ctrl-C to this token. Spawns a background task; safe to call
    /// once per process.
    pub fn listen_for_ctrl_c(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install Ctrl-C handler");
                return;
            }
            warn!("interrupt received, cancelling");
            token.cancel();
        });
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn callbacks_run_lifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let token = CancelToken::new();
        for i in 0..3 {
            let order = order.clone();
            token.on_cancel(move || order.lock().unwrap().push(i));
        }
        token.cancel();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn late_callback_runs_immediately() {
        let token = CancelToken::new();
        token.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        token.on_cancel(move || ran2.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_is_idempotent() {
        let count = Arc::new(Mutex::new(0));
        let token = CancelToken::new();
        let count2 = count.clone();
        token.on_cancel(move || *count2.lock().unwrap() += 1);
        token.cancel();
        token.cancel();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert_eq!(token.sleep(Duration::from_millis(1)).await, Ok(()));
    }

    #[tokio::test]
    async fn sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(600)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert_eq!(handle.await.unwrap(), Err(Cancelled));
    }

    #[tokio::test]
    async fn sleep_on_cancelled_token_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(token.sleep(Duration::from_secs(600)).await, Err(Cancelled));
    }
}
