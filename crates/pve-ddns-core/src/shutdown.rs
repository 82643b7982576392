//! Cooperative shutdown
//!
//! A watch-channel based cancellation token. The daemon keeps the
//! [`ShutdownHandle`] in its signal task; the engine and the prefix-sync
//! machine hold clones of the [`ShutdownToken`] and consult it immediately
//! after every blocking wait, so shutdown latency is bounded by the
//! shortest wait in flight, not by the longest retry backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Create a connected handle/token pair
pub fn channel() -> (ShutdownHandle, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownToken { rx, keep_open: None })
}

/// Requests shutdown; held by whoever owns process lifecycle
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Flip the flag; every token clone observes it
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Another token observing this handle
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
            keep_open: None,
        }
    }
}

/// Observes a shutdown request; clone freely
///
/// A dropped handle counts as a shutdown request, so an engine can never
/// outlive the task that was supposed to stop it.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
    /// Tokens made by [`never`](Self::never) own their sender so the
    /// channel cannot close; handle-connected tokens leave this empty
    keep_open: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownToken {
    /// True once shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves when shutdown is requested; resolves immediately if it
    /// already was
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Sleep that ends early on shutdown
    ///
    /// Returns `true` when the full duration elapsed, `false` when the wait
    /// was cut short by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }

    /// A token that can never be cancelled; for one-shot runs and tests
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            keep_open: Some(Arc::new(tx)),
        }
    }
}
