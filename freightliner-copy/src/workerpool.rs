use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::warn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CopyError;

type JobFuture = Pin<Box<dyn Future<Output = Result<(), CopyError>> + Send>>;
type Job = Box<dyn FnOnce(CancellationToken) -> JobFuture + Send>;

struct QueuedJob {
    id: u64,
    job: Job,
}

/// A fixed-size pool of async workers, each running `func(ctx)` to completion before
/// pulling its next job. Per-job contexts are children of the pool's own cancellation
/// token, so `stop` cancels every in-flight job along with every queued one.
pub struct WorkerPool {
    sender: mpsc::Sender<QueuedJob>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// `workers` tasks are spawned immediately, each pulling from a shared channel of
    /// capacity `queue_capacity`. `submit` is non-blocking while the channel has room
    /// and blocks once it's full.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(queued) = next else { break };
                    let job_cancel = cancel.child_token();
                    if let Err(e) = (queued.job)(job_cancel).await {
                        warn!("worker pool job {} failed: {e}", queued.id);
                    }
                }
            }));
        }

        Self { sender, handles, cancel }
    }

    /// Submits `job` under `id`. Blocks only if the queue is at capacity.
    pub async fn submit<F>(&self, id: u64, job: F)
    where
        F: FnOnce(CancellationToken) -> JobFuture + Send + 'static,
    {
        let queued = QueuedJob { id, job: Box::new(job) };
        if self.sender.send(queued).await.is_err() {
            warn!("worker pool job {id} submitted after shutdown");
        }
    }

    /// Drains the queue, cancels in-flight jobs, and joins every worker.
    pub async fn stop(self) {
        drop(self.sender);
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("worker pool task did not shut down cleanly: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let pool = WorkerPool::new(2, 4);
        let counter = Arc::new(AtomicU64::new(0));
        for i in 0..8 {
            let counter = counter.clone();
            pool.submit(i, move |_ctx| {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as JobFuture
            })
            .await;
        }
        pool.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn stop_cancels_child_tokens() {
        let pool = WorkerPool::new(1, 4);
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cancelled2 = cancelled.clone();
        pool.submit(0, move |ctx| {
            Box::pin(async move {
                ctx.cancelled().await;
                cancelled2.store(true, Ordering::SeqCst);
                Ok(())
            }) as JobFuture
        })
        .await;
        // give the worker a moment to pick up the job, then stop
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        pool.stop().await;
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
