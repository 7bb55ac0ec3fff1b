// SPDX-License-Identifier: MIT

//! Shutdown signalling and the compound wait primitive every service loop
//! uses instead of an uninterruptible sleep (spec.md §5: "never an
//! uninterruptible sleep... Wait helpers return `true` iff they returned
//! early due to shutdown or cancellation").

use std::time::Duration;

use tokio::sync::watch;

/// A shutdown signal shareable across every task a service spawns.
/// Cloning shares the same underlying flag; `trigger` wakes every waiter.
#[derive(Clone)]
pub struct Shutdown {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: std::sync::Arc::new(tx), rx }
    }

    /// Close the signal; every `cancelled()`/`wait()` waiter wakes.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `trigger()` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait up to `duration`, or until `shutdown` fires, whichever is first.
/// Returns `true` iff it returned early due to shutdown.
pub async fn wait_or_shutdown(duration: Duration, shutdown: &Shutdown) -> bool {
    if shutdown.is_shutting_down() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.cancelled() => true,
    }
}
