// SPDX-License-Identifier: MIT

//! Explicit per-aggregate cancellation tokens (spec.md §9: "replace
//! implicit cancellation via closed channels with an explicit cancellation
//! token propagated through every I/O call"). The verifier uses one pair
//! per in-flight monitor task so a newer `SearchCompleted` for the same
//! aggregate can supersede it (spec.md §4.4, §5).

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the paired [`CancelHandle`] cancels.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}
