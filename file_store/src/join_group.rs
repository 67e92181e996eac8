//! Completion counter for the writes submitted against one file.

use std::sync::Arc;

use tokio::sync::watch;

/// Counts in-flight operations and lets a closer wait for all of them.
///
/// Every [`JoinGroup::add`] hands out an [`InFlightGuard`]; the count drops
/// when the guard is dropped, whether the operation succeeded, failed or
/// panicked. The count therefore never goes below zero.
#[derive(Clone, Debug)]
pub struct JoinGroup {
    count: Arc<watch::Sender<usize>>,
}

impl JoinGroup {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }

    pub fn add(&self) -> InFlightGuard {
        self.count.send_modify(|n| *n += 1);
        InFlightGuard {
            count: self.count.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once no guard is outstanding.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender is owned by `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for JoinGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one operation as in flight until dropped.
#[derive(Debug)]
#[must_use = "the operation is considered finished as soon as the guard is dropped"]
pub struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}
