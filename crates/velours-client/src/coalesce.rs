//! Single-slot trigger queues for the catch-up scans.
//!
//! Each scan (send receipts, sync to own devices) owns one worker task.
//! Triggering while a cycle is running stores at most one pending re-run, so
//! repeated triggers coalesce instead of piling up.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Coalescer {
    notify: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl Coalescer {
    /// Spawn the worker task.  `cycle` produces one scan run per wake-up;
    /// it must handle its own errors (a cycle's failure never kills the
    /// worker).
    pub fn spawn<F>(label: &'static str, mut cycle: F) -> Self
    where
        F: FnMut() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let waiter = notify.clone();
        let worker = tokio::spawn(async move {
            loop {
                waiter.notified().await;
                debug!(queue = label, "running coalesced cycle");
                cycle().await;
            }
        });
        Self { notify, worker }
    }

    /// Request a cycle.  If one is already queued this is a no-op.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

impl Drop for Coalescer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
