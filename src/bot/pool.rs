//! Bounded worker pool for download jobs.
//!
//! A fixed number of workers pull jobs from a bounded queue. Submitting to a
//! full queue fails immediately so the handler can tell the user to retry
//! instead of piling up tool processes.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type Job = BoxFuture<'static, ()>;

/// Reasons a job was not accepted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Every worker is busy and the queue is at capacity
    #[error("download queue is full")]
    QueueFull,
    /// The pool is shutting down
    #[error("download pool is shut down")]
    Closed,
}

/// Fixed-size pool executing submitted futures
pub struct JobPool {
    tx: mpsc::Sender<Job>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobPool {
    /// Start `workers` workers sharing a queue of `queue_size` pending jobs.
    ///
    /// Both values are raised to at least 1.
    #[must_use]
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let handles = (0..workers.max(1))
            .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(&rx), shutdown.clone())))
            .collect();

        info!(workers = workers.max(1), queue_size = queue_size.max(1), "Job pool started");
        Self {
            tx,
            shutdown,
            workers: Mutex::new(handles),
        }
    }

    /// Queue `job` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::QueueFull`] when the queue is at capacity and
    /// [`PoolError::Closed`] after [`JobPool::shutdown`].
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::Closed);
        }
        self.tx.try_send(Box::pin(job)).map_err(|e| match e {
            TrySendError::Full(_) => PoolError::QueueFull,
            TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    /// Stop accepting jobs and wait until every queued and running job is done.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker ended abnormally");
            }
        }
        info!("Job pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            // Queued jobs win over shutdown so the queue drains first
            tokio::select! {
                biased;
                job = rx.recv() => job,
                () = shutdown.cancelled() => None,
            }
        };
        let Some(job) = job else {
            break;
        };

        debug!(worker, "Job started");
        // A panicking job must not take the worker down with it
        if let Err(e) = tokio::spawn(job).await {
            error!(worker, error = %e, "Download job panicked");
        }
        debug!(worker, "Job finished");
    }
    debug!(worker, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn full_queue_is_rejected() {
        let pool = JobPool::new(1, 1);

        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        assert_eq!(
            pool.submit(async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
            }),
            Ok(())
        );
        // Worker is now busy with the first job
        assert!(started_rx.await.is_ok());

        let (done_tx, done_rx) = oneshot::channel();
        assert_eq!(
            pool.submit(async move {
                let _ = done_tx.send(());
            }),
            Ok(())
        );
        assert_eq!(pool.submit(async {}), Err(PoolError::QueueFull));

        let _ = release_tx.send(());
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_workers() {
        let pool = JobPool::new(2, 16);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::channel(8);

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            let submitted = pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(()).await;
            });
            assert_eq!(submitted, Ok(()));
        }

        for _ in 0..6 {
            assert!(done_rx.recv().await.is_some());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn panicking_job_keeps_worker_alive() {
        let pool = JobPool::new(1, 4);
        assert_eq!(pool.submit(async { panic!("boom") }), Ok(()));

        let (done_tx, done_rx) = oneshot::channel();
        assert_eq!(
            pool.submit(async move {
                let _ = done_tx.send(());
            }),
            Ok(())
        );
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let pool = JobPool::new(1, 8);
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let finished = Arc::clone(&finished);
            let submitted = pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(submitted, Ok(()));
        }

        pool.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn rejects_after_shutdown() {
        let pool = JobPool::new(1, 1);
        pool.shutdown().await;
        assert_eq!(pool.submit(async {}), Err(PoolError::Closed));
    }
}
