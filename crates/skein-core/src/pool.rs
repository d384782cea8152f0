//! Worker pool for per-message processing.
//!
//! A fixed number of worker tasks consume a bounded FIFO queue. Each
//! job runs inside its own spawned task so a panicking job is contained
//! and logged without killing the worker. Shutdown closes the queue,
//! lets the workers drain it, and joins them; enqueues after shutdown
//! warn and drop the job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default number of worker tasks.
pub const DEFAULT_WORKERS: usize = 4;
/// Bound on the task queue.
const QUEUE_CAPACITY: usize = 1024;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fixed-size pool of workers consuming a bounded task queue.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// Spawn `num_workers` workers (at least one).
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..num_workers)
            .map(|worker_id| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut guard = rx.lock().await;
                            guard.recv().await
                        };
                        let Some(job) = job else {
                            debug!(worker_id, "queue closed, worker exiting");
                            break;
                        };
                        // Run each job in its own task so a panic is
                        // contained at the job boundary.
                        if let Err(e) = tokio::spawn(job).await {
                            if e.is_panic() {
                                error!(worker_id, "task panicked: {e}");
                            }
                        }
                    }
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            stopped: AtomicBool::new(false),
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers.lock().expect("worker list poisoned").len()
    }

    /// Approximate number of queued tasks.
    pub fn pending(&self) -> usize {
        self.sender
            .lock()
            .expect("sender poisoned")
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Queue a task. After shutdown (or when the queue is full) the task
    /// is dropped with a warning.
    pub fn enqueue<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("enqueue after shutdown, dropping task");
            return;
        }
        let guard = self.sender.lock().expect("sender poisoned");
        match guard.as_ref() {
            Some(tx) => {
                if tx.try_send(Box::pin(task)).is_err() {
                    warn!("task queue full or closed, dropping task");
                }
            }
            None => warn!("enqueue after shutdown, dropping task"),
        }
    }

    /// Stop accepting tasks, drain the queue, and join every worker.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Dropping the sender closes the queue; workers exit once it
        // drains.
        self.sender.lock().expect("sender poisoned").take();

        let workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().expect("worker list poisoned"));
        for handle in workers {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("worker task panicked during shutdown: {e}");
                }
            }
        }
        debug!("worker pool shut down");
    }

    /// Whether the pool has been shut down.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_enqueued_tasks() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.enqueue(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn tasks_run_concurrently() {
        let pool = WorkerPool::new(4);
        let (tx, mut rx) = mpsc::channel::<usize>(8);
        for i in 0..4 {
            let tx = tx.clone();
            pool.enqueue(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = tx.send(i).await;
            });
        }
        drop(tx);

        let started = std::time::Instant::now();
        let mut seen = Vec::new();
        while let Some(i) = rx.recv().await {
            seen.push(i);
        }
        // Four 20ms sleeps on four workers finish well under 80ms.
        assert!(started.elapsed() < Duration::from_millis(75));
        assert_eq!(seen.len(), 4);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.enqueue(async {
            panic!("intentional test panic");
        });
        let counter2 = counter.clone();
        pool.enqueue(async move {
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_noop() {
        let pool = WorkerPool::new(2);
        pool.shutdown().await;
        assert!(pool.is_stopped());
        assert_eq!(pool.size(), 0);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        pool.enqueue(async move {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_tasks() {
        let pool = WorkerPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.enqueue(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
