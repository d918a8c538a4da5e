//! Per-conversation serialized job execution.
//!
//! Every read-modify-write of a conversation's unread count, read position,
//! or message collection runs through this queue: at most one job is in
//! flight at a time, admission is first-come-first-served (tokio's mutex
//! queues waiters fairly), and a failed or timed-out job never blocks the
//! jobs behind it.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Mutex;
use tracing::{error, warn};

pub struct JobQueue {
    /// Conversation identity, for logs and timeout attribution.
    label: String,
    slot: Mutex<()>,
    depth: AtomicUsize,
    timeout: Duration,
}

impl JobQueue {
    pub fn new(label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            slot: Mutex::new(()),
            depth: AtomicUsize::new(0),
            timeout,
        }
    }

    /// True when no job is running or waiting.
    pub fn is_idle(&self) -> bool {
        self.depth.load(Ordering::SeqCst) == 0
    }

    /// Run `job` once every previously enqueued job has settled.
    ///
    /// The job's own result or error is returned to the caller; the error is
    /// additionally logged here so queue health is visible even when callers
    /// swallow it.  A job still running after the timeout is dropped and
    /// reported as failed, and the queue moves on.
    pub async fn run<T, F>(&self, name: &str, job: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        self.depth.fetch_add(1, Ordering::SeqCst);
        let _depth = DepthGuard(&self.depth);
        let _slot = self.slot.lock().await;

        match tokio::time::timeout(self.timeout, job).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(conversation = %self.label, job = name, error = %e, "job failed");
                Err(e)
            }
            Err(_) => {
                warn!(conversation = %self.label, job = name, "job timed out, advancing queue");
                Err(anyhow!("job '{name}' timed out on conversation {}", self.label))
            }
        }
    }
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn queue() -> JobQueue {
        JobQueue::new("test", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn jobs_run_in_enqueue_order_without_interleaving() {
        let q = queue();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let run = |tag: &'static str| {
            let log = log.clone();
            let q = &q;
            async move {
                q.run(tag, async {
                    log.lock().unwrap().push(format!("{tag}:start"));
                    // Suspend mid-job: a second job must not slip in here.
                    tokio::task::yield_now().await;
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(format!("{tag}:end"));
                    Ok(())
                })
                .await
            }
        };

        let (a, b, c) = tokio::join!(run("a"), run("b"), run("c"));
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:start", "a:end", "b:start", "b:end", "c:start", "c:end"]
        );
    }

    #[tokio::test]
    async fn failure_propagates_but_does_not_poison() {
        let q = queue();

        let failed: anyhow::Result<()> = q.run("boom", async { Err(anyhow!("boom")) }).await;
        assert!(failed.is_err());

        let ok = q.run("after", async { Ok(42) }).await.unwrap();
        assert_eq!(ok, 42);
        assert!(q.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_job_lets_the_queue_advance() {
        let q = JobQueue::new("test", Duration::from_millis(100));

        let hung: anyhow::Result<()> = q
            .run("hung", async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert!(hung.is_err());

        let ok = q.run("next", async { Ok(1) }).await.unwrap();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn idle_flag_tracks_depth() {
        let q = Arc::new(queue());
        assert!(q.is_idle());

        let q2 = q.clone();
        let handle = tokio::spawn(async move {
            q2.run("busy", async {
                tokio::task::yield_now().await;
                Ok(())
            })
            .await
        });
        handle.await.unwrap().unwrap();
        assert!(q.is_idle());
    }
}
