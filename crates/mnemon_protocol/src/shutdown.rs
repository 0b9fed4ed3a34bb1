//! Cooperative shutdown for background loops.
//!
//! Every monitor loop in the control plane owns one of these. `cancel`
//! both flips the flag and wakes any sleeper, so a loop parked on its
//! interval exits promptly instead of finishing the sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Token for cancelling long-lived background tasks.
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation and wake all sleepers.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Sleep for `duration` or until cancelled, whichever is sooner.
    ///
    /// Returns `true` if the sleep was interrupted by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
            _ = self.inner.notify.notified() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_runs_to_completion_when_not_cancelled() {
        let token = ShutdownToken::new();
        let interrupted = token.sleep(Duration::from_millis(5)).await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let token = ShutdownToken::new();
        let sleeper = token.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let interrupted = handle.await.unwrap();
        assert!(interrupted);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn sleep_after_cancel_returns_immediately() {
        let token = ShutdownToken::new();
        token.cancel();
        assert!(token.sleep(Duration::from_secs(60)).await);
    }
}
