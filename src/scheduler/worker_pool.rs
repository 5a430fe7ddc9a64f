//! Worker pool dispatching scheduler jobs to async worker tasks.
//!
//! The pool runs a fixed number of tokio tasks that pull jobs from a bounded
//! channel, execute them through a [`Worker`] under the job's cutoff and
//! complete them, which invokes the scheduler's callback exactly once.
//!
//! # Features
//!
//! - Back-pressure: the channel holds at most `num_workers` queued jobs, so
//!   `submit` waits while every worker is busy and the queue is full
//! - Drain: `finish_work` holds intake closed until every in-flight job
//!   completed, then re-opens it
//! - Graceful shutdown with broadcast channel
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::model::{EvaluationResult, StatusType};
use crate::worker::Worker;

use super::job::{EvaluationJob, Job, StructureJob};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// All workers stopped before the job could be queued.
    #[error("Worker channel closed")]
    ChannelClosed,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Accepts jobs and completes them asynchronously.
///
/// Every submitted job must be completed exactly once, which invokes its
/// callback.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Queues a job, waiting while the dispatcher is saturated.
    async fn submit(&self, job: Job) -> Result<(), DispatchError>;

    /// Stops accepting jobs until every submitted job completed.
    async fn finish_work(&self) -> Result<(), DispatchError>;

    /// Stops all workers.
    async fn shutdown(&self) -> Result<(), DispatchError>;
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Jobs submitted and not yet completed.
    pub in_flight: usize,
    /// Total number of jobs completed successfully.
    pub jobs_completed: u64,
    /// Total number of jobs that failed.
    pub jobs_failed: u64,
    /// Jobs stopped at their cutoff.
    pub jobs_timed_out: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed + self.jobs_timed_out
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_timed_out: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, status: StatusType, duration: Duration) {
        let counter = match status {
            StatusType::Success => &self.jobs_completed,
            StatusType::Crashed => &self.jobs_failed,
            StatusType::Timeout => &self.jobs_timed_out,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize, in_flight: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let timed_out = self.jobs_timed_out.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed + timed_out;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            in_flight,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_timed_out: timed_out,
            average_job_duration: average_duration,
        }
    }
}

/// Count of submitted jobs that have not completed yet.
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Ends a job's in-flight slot even if its callback panics.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Tokio worker pool implementing [`Dispatcher`].
pub struct WorkerPool {
    config: WorkerPoolConfig,
    worker: Arc<dyn Worker>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    /// Submissions hold it shared, `finish_work` exclusively.
    intake: RwLock<()>,
    in_flight: Arc<InFlight>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool executing jobs through `worker`.
    ///
    /// Workers are spawned by [`WorkerPool::start`].
    pub fn new(config: WorkerPoolConfig, worker: Arc<dyn Worker>) -> Self {
        let capacity = config.num_workers.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            worker,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            intake: RwLock::new(()),
            in_flight: Arc::new(InFlight {
                count: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            shutdown_tx,
            worker_handles: Mutex::new(Vec::new()),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::AlreadyRunning` if the pool is already running
    /// and `DispatchError::NotRunning` if it was shut down before.
    pub fn start(&self) -> Result<(), DispatchError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyRunning);
        }
        if self.lock_sender().is_none() {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(DispatchError::NotRunning);
        }

        let mut handles = self.lock_handles();
        for i in 0..self.config.num_workers {
            let task = WorkerTask {
                id: format!("worker-{}", i),
                worker: Arc::clone(&self.worker),
                receiver: Arc::clone(&self.receiver),
                shutdown_rx: self.shutdown_tx.subscribe(),
                in_flight: Arc::clone(&self.in_flight),
                stats: Arc::clone(&self.stats),
                metrics: MetricsCollector::new(),
            };
            handles.push(tokio::spawn(task.run()));
        }

        info!(num_workers = self.config.num_workers, "Worker pool started");
        Ok(())
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats
            .to_pool_stats(self.config.num_workers, self.in_flight.get())
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Job>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.worker_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Dispatcher for WorkerPool {
    async fn submit(&self, job: Job) -> Result<(), DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::NotRunning);
        }
        let _intake = self.intake.read().await;
        let sender = self.lock_sender().clone().ok_or(DispatchError::NotRunning)?;

        let (id, kind, cid) = (job.id(), job.kind(), job.cid());
        self.in_flight.begin();
        if sender.send(job).await.is_err() {
            self.in_flight.end();
            return Err(DispatchError::ChannelClosed);
        }
        debug!(job_id = %id, kind = %kind, cid = %cid, "Job submitted");
        Ok(())
    }

    async fn finish_work(&self) -> Result<(), DispatchError> {
        let _intake = self.intake.write().await;
        let pending = self.in_flight.get();
        if pending > 0 {
            info!(pending, "Waiting for in-flight jobs to finish");
        }
        self.wait_idle().await;
        debug!("Worker pool drained");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DispatchError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(DispatchError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Dropping the sender closes the channel for idle workers.
        self.lock_sender().take();
        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.lock_handles().drain(..).collect();
        let shutdown_future = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                let abandoned = self.in_flight.get();
                if abandoned > 0 {
                    warn!(abandoned, "Jobs were still queued at shutdown");
                }
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(DispatchError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }
}

/// A single worker task pulling jobs from the shared channel.
struct WorkerTask {
    id: String,
    worker: Arc<dyn Worker>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    shutdown_rx: broadcast::Receiver<()>,
    in_flight: Arc<InFlight>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl WorkerTask {
    /// Main worker loop.
    ///
    /// Processes jobs until a shutdown signal is received or the channel is
    /// closed.
    async fn run(mut self) {
        debug!(worker_id = %self.id, "Worker started");
        let receiver = Arc::clone(&self.receiver);

        loop {
            let next = tokio::select! {
                _ = self.shutdown_rx.recv() => None,
                job = async { receiver.lock().await.recv().await } => job,
            };
            let Some(job) = next else {
                break;
            };
            self.process_job(job).await;
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes a single job and completes it.
    async fn process_job(&self, job: Job) {
        let _slot = InFlightGuard(Arc::clone(&self.in_flight));
        let start_time = Instant::now();
        let kind = job.kind();

        debug!(worker_id = %self.id, job_id = %job.id(), cid = %job.cid(), kind = %kind, "Processing job");
        self.stats.increment_active();
        self.metrics.worker_started();

        let status = match job {
            Job::Structure(job) => self.run_structure(job).await,
            Job::Evaluation(job) => self.run_evaluation(job).await,
        };
        let duration = start_time.elapsed();

        self.stats.decrement_active();
        self.metrics.worker_finished();
        self.stats.record(status, duration);
        self.metrics
            .record_job_completed(kind.as_str(), &status.to_string(), duration.as_secs_f64());
    }

    async fn run_structure(&self, mut job: StructureJob) -> StatusType {
        let execution = self.worker.materialize(&job.dataset, &job.candidate);
        let (outcome, status) = match with_cutoff(job.cutoff, execution).await {
            Some(Ok(structure)) => (Ok(structure), StatusType::Success),
            Some(Err(e)) => {
                warn!(worker_id = %self.id, cid = %job.cid(), error = %e, "Structure job failed");
                (Err(e.to_string()), StatusType::Crashed)
            }
            None => {
                warn!(worker_id = %self.id, cid = %job.cid(), "Structure job exceeded its cutoff");
                (
                    Err("Structure job exceeded its cutoff".to_string()),
                    StatusType::Timeout,
                )
            }
        };
        job.complete(outcome);
        status
    }

    async fn run_evaluation(&self, mut job: EvaluationJob) -> StatusType {
        let start_time = Instant::now();
        let outcome = with_cutoff(job.cutoff, self.worker.evaluate(&job)).await;
        let (config, result) = match outcome {
            Some(Ok(evaluation)) => (evaluation.config, evaluation.result),
            Some(Err(e)) => {
                warn!(worker_id = %self.id, cid = %job.cid, error = %e, "Evaluation failed");
                (None, EvaluationResult::crashed(e.to_string(), start_time.elapsed()))
            }
            None => (None, EvaluationResult::timeout(start_time.elapsed())),
        };
        let status = result.status;
        job.complete(config, result);
        status
    }
}

/// Runs `future` under an optional cutoff; `None` means the cutoff elapsed.
async fn with_cutoff<F: std::future::Future>(cutoff: Option<Duration>, future: F) -> Option<F::Output> {
    match cutoff {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}
