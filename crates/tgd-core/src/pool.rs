//! Bounded worker pool for handler execution.
//!
//! A fixed number of worker tasks pull jobs from one queue. Each job runs in
//! its own spawned task so a panicking handler is caught and logged without
//! taking its worker down. At most `workers` jobs run at once regardless of
//! the queue policy.

use std::{
    fmt,
    future::Future,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{errors::Error, handler::HandlerFuture, Result};

/// What `submit` does when the queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Wait for space (the driving loop slows down).
    #[default]
    Block,
    /// Discard the job and log it.
    Drop,
    /// Unbounded queue.
    Grow,
}

impl FromStr for Backpressure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Backpressure::Block),
            "drop" => Ok(Backpressure::Drop),
            "grow" => Ok(Backpressure::Grow),
            other => Err(Error::Config(format!(
                "unknown queue policy {other:?} (expected block, drop or grow)"
            ))),
        }
    }
}

impl fmt::Display for Backpressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backpressure::Block => "block",
            Backpressure::Drop => "drop",
            Backpressure::Grow => "grow",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    /// Queue slots; ignored by [`Backpressure::Grow`].
    pub capacity: usize,
    pub backpressure: Backpressure,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 256,
            backpressure: Backpressure::Block,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    Dropped,
}

struct Job {
    label: String,
    fut: HandlerFuture,
}

#[derive(Clone)]
enum JobTx {
    Bounded(mpsc::Sender<Job>),
    Unbounded(mpsc::UnboundedSender<Job>),
}

enum JobRx {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

impl JobRx {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            JobRx::Bounded(rx) => rx.recv().await,
            JobRx::Unbounded(rx) => rx.recv().await,
        }
    }
}

#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    panics: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct WorkerPool {
    cfg: PoolConfig,
    tx: Mutex<Option<JobTx>>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn new(cfg: PoolConfig) -> Self {
        let cfg = PoolConfig {
            workers: cfg.workers.max(1),
            capacity: cfg.capacity.max(1),
            ..cfg
        };

        let (tx, rx) = match cfg.backpressure {
            Backpressure::Grow => {
                let (tx, rx) = mpsc::unbounded_channel();
                (JobTx::Unbounded(tx), JobRx::Unbounded(rx))
            }
            Backpressure::Block | Backpressure::Drop => {
                let (tx, rx) = mpsc::channel(cfg.capacity);
                (JobTx::Bounded(tx), JobRx::Bounded(rx))
            }
        };

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared::default());
        let workers = (0..cfg.workers)
            .map(|idx| tokio::spawn(worker_loop(idx, rx.clone(), shared.clone())))
            .collect();

        Self {
            cfg,
            tx: Mutex::new(Some(tx)),
            shared,
            workers: Mutex::new(workers),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.cfg
    }

    /// Jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Jobs that panicked since the pool started.
    pub fn panics(&self) -> usize {
        self.shared.panics.load(Ordering::Acquire)
    }

    /// Queue a job according to the backpressure policy.
    pub async fn submit<F>(&self, label: impl Into<String>, fut: F) -> Result<Submitted>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::QueueClosed)?;
        let job = Job {
            label: label.into(),
            fut: Box::pin(fut),
        };

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let res = match (&tx, self.cfg.backpressure) {
            (JobTx::Unbounded(tx), _) => tx.send(job).map_err(|_| Error::QueueClosed),
            (JobTx::Bounded(tx), Backpressure::Drop) => match tx.try_send(job) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(job)) => {
                    self.shared.finish_one();
                    warn!(job = %job.label, "worker queue full, dropping job");
                    return Ok(Submitted::Dropped);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::QueueClosed),
            },
            (JobTx::Bounded(tx), _) => tx.send(job).await.map_err(|_| Error::QueueClosed),
        };

        match res {
            Ok(()) => Ok(Submitted::Queued),
            Err(e) => {
                self.shared.finish_one();
                Err(e)
            }
        }
    }

    /// Wait until every queued and running job has completed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, let the queue drain, and join the workers.
    pub async fn shutdown(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for w in workers {
            let _ = w.await;
        }
    }
}

async fn worker_loop(idx: usize, rx: Arc<tokio::sync::Mutex<JobRx>>, shared: Arc<Shared>) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker = idx, "worker queue closed");
            break;
        };

        match tokio::spawn(job.fut).await {
            Ok(()) => {}
            Err(err) if err.is_panic() => {
                shared.panics.fetch_add(1, Ordering::AcqRel);
                let msg = panic_message(err.into_panic());
                warn!(worker = idx, job = %job.label, panic = %msg, "handler panicked");
            }
            Err(err) => {
                warn!(worker = idx, job = %job.label, error = %err, "handler task cancelled");
            }
        }
        shared.finish_one();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn runs_jobs_and_reports_idle() {
        let pool = WorkerPool::new(PoolConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        for i in 0..20 {
            let hits = hits.clone();
            pool.submit(format!("job {i}"), async move {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        pool.wait_idle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 20);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_job() {
        let pool = WorkerPool::new(PoolConfig {
            workers: 1,
            ..PoolConfig::default()
        });
        let hits = Arc::new(AtomicUsize::new(0));

        pool.submit("boom", async { panic!("handler exploded") })
            .await
            .unwrap();
        {
            let hits = hits.clone();
            pool.submit("after", async move {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.wait_idle().await;
        assert_eq!(pool.panics(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_worker_count() {
        let pool = WorkerPool::new(PoolConfig {
            workers: 2,
            capacity: 64,
            backpressure: Backpressure::Block,
        });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(format!("job {i}"), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        pool.wait_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn drop_policy_discards_when_full() {
        let pool = WorkerPool::new(PoolConfig {
            workers: 1,
            capacity: 1,
            backpressure: Backpressure::Drop,
        });
        let gate = Arc::new(Semaphore::new(0));

        // Occupies the single worker until the gate opens.
        {
            let gate = gate.clone();
            pool.submit("blocker", async move {
                let _permit = gate.acquire().await;
            })
            .await
            .unwrap();
        }
        // Wait for the worker to take the blocker off the queue.
        while !queue_is_empty(&pool) {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.submit("queued", async {}).await.unwrap(), Submitted::Queued);
        assert_eq!(pool.submit("extra", async {}).await.unwrap(), Submitted::Dropped);

        gate.add_permits(1);
        pool.wait_idle().await;
        assert_eq!(pool.in_flight(), 0);
    }

    fn queue_is_empty(pool: &WorkerPool) -> bool {
        match pool.tx.lock().unwrap().as_ref() {
            Some(JobTx::Bounded(tx)) => tx.capacity() == tx.max_capacity(),
            _ => true,
        }
    }

    #[tokio::test]
    async fn shutdown_drains_and_rejects_new_jobs() {
        let pool = WorkerPool::new(PoolConfig {
            backpressure: Backpressure::Grow,
            ..PoolConfig::default()
        });
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let hits = hits.clone();
            pool.submit("job", async move {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        pool.shutdown().await;
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert!(matches!(
            pool.submit("late", async {}).await,
            Err(Error::QueueClosed)
        ));
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("Block".parse::<Backpressure>().unwrap(), Backpressure::Block);
        assert_eq!(" drop ".parse::<Backpressure>().unwrap(), Backpressure::Drop);
        assert_eq!("grow".parse::<Backpressure>().unwrap(), Backpressure::Grow);
        assert!("later".parse::<Backpressure>().is_err());
    }
}
