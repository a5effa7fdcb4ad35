//! Bounded pool running transcode jobs on blocking worker threads
//!
//! The pool is an actor: callers send [`PoolCommand`]s over a channel and get
//! replies on oneshot channels. Each job runs [`TranscodeEngine::execute`] on
//! its own blocking thread, at most `max_concurrent_jobs` at a time.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::engine::{
    CancellationFlag, ProgressListener, RunOutcome, TranscodeEngine, TranscodeJob,
    TranscodeReport,
};
use crate::error::TranscodeError;

/// Errors reported by the job pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Worker pool is shutting down")]
    PoolShuttingDown,

    #[error("Job queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("Worker thread for job {job_id} failed: {reason}")]
    WorkerFailed { job_id: JobId, reason: String },

    #[error("Transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
}

/// Unique identifier for transcode jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub state: JobState,
    /// Last fraction reported by the engine, `None` before the first report
    pub fraction: Option<f64>,
    /// Time spent running, zero while queued
    pub elapsed: Duration,
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub average_processing_time: Option<Duration>,
}

/// Job completion result
pub type JobResult = Result<RunOutcome, PoolError>;

/// Receives the result of one submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    result_rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Waits until the job completes, fails, or is cancelled.
    ///
    /// # Errors
    ///
    /// - `PoolError::Transcode` - The engine failed the job
    /// - `PoolError::PoolShuttingDown` - The pool stopped before reporting a result
    pub async fn wait(self) -> JobResult {
        self.result_rx
            .await
            .map_err(|_| PoolError::PoolShuttingDown)?
    }
}

/// Command messages for worker pool
enum PoolCommand {
    Submit {
        job_id: JobId,
        job: TranscodeJob,
        listener: Arc<dyn ProgressListener>,
        result_tx: oneshot::Sender<JobResult>,
        ack_tx: oneshot::Sender<Result<(), PoolError>>,
    },
    Cancel {
        job_id: JobId,
        result_tx: oneshot::Sender<Result<(), PoolError>>,
    },
    GetProgress {
        job_id: JobId,
        result_tx: oneshot::Sender<Option<JobProgress>>,
    },
    GetStats {
        result_tx: oneshot::Sender<PoolStats>,
    },
    Shutdown {
        done_tx: oneshot::Sender<()>,
    },
}

/// Transcode job pool with cooperative cancellation.
pub struct WorkerPool {
    command_tx: mpsc::UnboundedSender<PoolCommand>,
    _handle: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    /// Starts the pool actor. Must be called within a tokio runtime.
    pub fn new(engine: TranscodeEngine, config: PoolConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut pool = WorkerPoolImpl::new(engine, config, command_rx);
            pool.run().await;
        });

        Self {
            command_tx,
            _handle: handle,
        }
    }

    /// Queues `job`; `listener` receives its callbacks from the worker thread.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` - Queue capacity reached
    /// - `PoolError::PoolShuttingDown` - Pool no longer accepts jobs
    pub async fn submit(
        &self,
        job: TranscodeJob,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<JobHandle, PoolError> {
        let job_id = JobId::new();
        let (result_tx, result_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        self.command_tx
            .send(PoolCommand::Submit {
                job_id,
                job,
                listener,
                result_tx,
                ack_tx,
            })
            .map_err(|_| PoolError::PoolShuttingDown)?;

        ack_rx.await.map_err(|_| PoolError::PoolShuttingDown)??;
        Ok(JobHandle {
            id: job_id,
            result_rx,
        })
    }

    /// Requests cancellation. Queued jobs are dropped, running jobs stop at
    /// their next step-loop iteration. Finished jobs are left as they are.
    ///
    /// # Errors
    ///
    /// - `PoolError::JobNotFound` - The pool never saw `job_id`
    pub async fn cancel(&self, job_id: JobId) -> Result<(), PoolError> {
        let (result_tx, result_rx) = oneshot::channel();

        self.command_tx
            .send(PoolCommand::Cancel { job_id, result_tx })
            .map_err(|_| PoolError::PoolShuttingDown)?;

        result_rx.await.map_err(|_| PoolError::PoolShuttingDown)?
    }

    pub async fn progress(&self, job_id: JobId) -> Result<Option<JobProgress>, PoolError> {
        let (result_tx, result_rx) = oneshot::channel();

        self.command_tx
            .send(PoolCommand::GetProgress { job_id, result_tx })
            .map_err(|_| PoolError::PoolShuttingDown)?;

        result_rx.await.map_err(|_| PoolError::PoolShuttingDown)
    }

    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let (result_tx, result_rx) = oneshot::channel();

        self.command_tx
            .send(PoolCommand::GetStats { result_tx })
            .map_err(|_| PoolError::PoolShuttingDown)?;

        result_rx.await.map_err(|_| PoolError::PoolShuttingDown)
    }

    /// Stops accepting jobs, cancels queued ones and waits for running jobs.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(PoolCommand::Shutdown { done_tx })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

/// Forwards callbacks and remembers the last progress value for snapshots.
struct TrackingListener {
    inner: Arc<dyn ProgressListener>,
    fraction: Arc<Mutex<Option<f64>>>,
}

impl ProgressListener for TrackingListener {
    fn on_progress(&self, fraction: f64) {
        *self.fraction.lock() = Some(fraction);
        self.inner.on_progress(fraction);
    }

    fn on_complete(&self, report: &TranscodeReport) {
        self.inner.on_complete(report);
    }

    fn on_error(&self, error: &TranscodeError) {
        self.inner.on_error(error);
    }

    fn on_cancelled(&self) {
        self.inner.on_cancelled();
    }
}

struct QueuedJob {
    job_id: JobId,
    job: TranscodeJob,
    listener: Arc<dyn ProgressListener>,
    result_tx: oneshot::Sender<JobResult>,
}

struct RunningJob {
    cancel: CancellationFlag,
    fraction: Arc<Mutex<Option<f64>>>,
    started_at: Instant,
}

struct FinishedJob {
    job_id: JobId,
    state: JobState,
    fraction: Option<f64>,
    elapsed: Duration,
}

/// Internal worker pool implementation
struct WorkerPoolImpl {
    engine: TranscodeEngine,
    config: PoolConfig,
    command_rx: mpsc::UnboundedReceiver<PoolCommand>,
    done_tx: mpsc::UnboundedSender<FinishedJob>,
    done_rx: mpsc::UnboundedReceiver<FinishedJob>,
    job_queue: VecDeque<QueuedJob>,
    running_jobs: HashMap<JobId, RunningJob>,
    finished_jobs: HashMap<JobId, JobProgress>,
    /// Oldest first, bounded by `finished_history`
    finished_order: VecDeque<JobId>,
    completed_jobs: u64,
    failed_jobs: u64,
    cancelled_jobs: u64,
    total_processing_time: Duration,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    shutting_down: bool,
    commands_closed: bool,
}

impl WorkerPoolImpl {
    fn new(
        engine: TranscodeEngine,
        config: PoolConfig,
        command_rx: mpsc::UnboundedReceiver<PoolCommand>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            config,
            command_rx,
            done_tx,
            done_rx,
            job_queue: VecDeque::new(),
            running_jobs: HashMap::new(),
            finished_jobs: HashMap::new(),
            finished_order: VecDeque::new(),
            completed_jobs: 0,
            failed_jobs: 0,
            cancelled_jobs: 0,
            total_processing_time: Duration::ZERO,
            shutdown_waiters: Vec::new(),
            shutting_down: false,
            commands_closed: false,
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                biased;

                // Completions first so stats reflect every delivered result
                Some(finished) = self.done_rx.recv() => {
                    self.record_finished(finished);
                }

                cmd = self.command_rx.recv(), if !self.commands_closed => {
                    match cmd {
                        Some(PoolCommand::Submit { job_id, job, listener, result_tx, ack_tx }) => {
                            let accepted = self.queue_job(QueuedJob { job_id, job, listener, result_tx });
                            let _ = ack_tx.send(accepted);
                        }
                        Some(PoolCommand::Cancel { job_id, result_tx }) => {
                            let _ = result_tx.send(self.cancel_job(job_id));
                        }
                        Some(PoolCommand::GetProgress { job_id, result_tx }) => {
                            let _ = result_tx.send(self.progress(job_id));
                        }
                        Some(PoolCommand::GetStats { result_tx }) => {
                            let _ = result_tx.send(self.get_stats());
                        }
                        Some(PoolCommand::Shutdown { done_tx }) => {
                            self.shutdown_waiters.push(done_tx);
                            self.begin_shutdown();
                        }
                        None => {
                            self.commands_closed = true;
                            self.begin_shutdown();
                        }
                    }
                }
            }

            self.process_queue();

            if self.shutting_down && self.running_jobs.is_empty() {
                break;
            }
        }

        tracing::info!(
            "Worker pool stopped: {} completed, {} failed, {} cancelled",
            self.completed_jobs,
            self.failed_jobs,
            self.cancelled_jobs
        );
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn queue_job(&mut self, queued: QueuedJob) -> Result<(), PoolError> {
        if self.shutting_down {
            return Err(PoolError::PoolShuttingDown);
        }
        if self.job_queue.len() >= self.config.queue_capacity {
            return Err(PoolError::QueueFull {
                capacity: self.config.queue_capacity,
            });
        }

        tracing::info!("Queued job {}: {:?}", queued.job_id, queued.job);
        self.job_queue.push_back(queued);
        Ok(())
    }

    fn process_queue(&mut self) {
        let max_jobs = self.config.max_concurrent_jobs.max(1);
        while self.running_jobs.len() < max_jobs {
            let Some(queued) = self.job_queue.pop_front() else {
                break;
            };
            self.start_job(queued);
        }
    }

    fn start_job(&mut self, queued: QueuedJob) {
        let QueuedJob {
            job_id,
            job,
            listener,
            result_tx,
        } = queued;

        let cancel = CancellationFlag::new();
        let fraction = Arc::new(Mutex::new(None));
        self.running_jobs.insert(
            job_id,
            RunningJob {
                cancel: cancel.clone(),
                fraction: fraction.clone(),
                started_at: Instant::now(),
            },
        );

        let engine = self.engine.clone();
        let done_tx = self.done_tx.clone();
        let listener = TrackingListener {
            inner: listener,
            fraction: fraction.clone(),
        };
        tracing::debug!("Starting job {}", job_id);

        tokio::spawn(async move {
            let started_at = Instant::now();
            let result = tokio::task::spawn_blocking(move || {
                engine.execute(&job, &listener, &cancel)
            })
            .await;

            let result: JobResult = match result {
                Ok(run) => run.map_err(PoolError::from),
                Err(e) => Err(PoolError::WorkerFailed {
                    job_id,
                    reason: e.to_string(),
                }),
            };
            let state = match &result {
                Ok(RunOutcome::Completed(_)) => JobState::Completed,
                Ok(RunOutcome::Cancelled) => JobState::Cancelled,
                Err(_) => JobState::Failed,
            };

            let _ = done_tx.send(FinishedJob {
                job_id,
                state,
                fraction: *fraction.lock(),
                elapsed: started_at.elapsed(),
            });
            let _ = result_tx.send(result);
        });
    }

    fn record_finished(&mut self, finished: FinishedJob) {
        self.running_jobs.remove(&finished.job_id);
        match finished.state {
            JobState::Completed => {
                self.completed_jobs += 1;
                self.total_processing_time += finished.elapsed;
            }
            JobState::Cancelled => self.cancelled_jobs += 1,
            _ => self.failed_jobs += 1,
        }
        tracing::info!(
            "Job {} finished as {:?} after {:?}",
            finished.job_id,
            finished.state,
            finished.elapsed
        );

        self.remember_finished(JobProgress {
            job_id: finished.job_id,
            state: finished.state,
            fraction: finished.fraction,
            elapsed: finished.elapsed,
        });
    }

    /// Keeps the final progress of the most recent `finished_history` jobs.
    fn remember_finished(&mut self, progress: JobProgress) {
        self.finished_order.push_back(progress.job_id);
        self.finished_jobs.insert(progress.job_id, progress);

        while self.finished_order.len() > self.config.finished_history {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished_jobs.remove(&oldest);
            }
        }
    }

    fn cancel_job(&mut self, job_id: JobId) -> Result<(), PoolError> {
        if let Some(running) = self.running_jobs.get(&job_id) {
            tracing::info!("Cancelling running job {}", job_id);
            running.cancel.cancel();
            return Ok(());
        }

        if let Some(position) = self.job_queue.iter().position(|q| q.job_id == job_id) {
            if let Some(queued) = self.job_queue.remove(position) {
                self.cancel_queued(queued);
            }
            return Ok(());
        }

        if self.finished_jobs.contains_key(&job_id) {
            return Ok(());
        }
        Err(PoolError::JobNotFound { job_id })
    }

    fn cancel_queued(&mut self, queued: QueuedJob) {
        tracing::info!("Cancelling queued job {}", queued.job_id);
        queued.listener.on_cancelled();
        let _ = queued.result_tx.send(Ok(RunOutcome::Cancelled));
        self.cancelled_jobs += 1;
        self.remember_finished(JobProgress {
            job_id: queued.job_id,
            state: JobState::Cancelled,
            fraction: None,
            elapsed: Duration::ZERO,
        });
    }

    fn begin_shutdown(&mut self) {
        if !self.shutting_down {
            tracing::info!(
                "Worker pool shutting down, waiting for {} running jobs",
                self.running_jobs.len()
            );
        }
        self.shutting_down = true;
        while let Some(queued) = self.job_queue.pop_front() {
            self.cancel_queued(queued);
        }
    }

    fn progress(&self, job_id: JobId) -> Option<JobProgress> {
        if let Some(running) = self.running_jobs.get(&job_id) {
            return Some(JobProgress {
                job_id,
                state: JobState::Running,
                fraction: *running.fraction.lock(),
                elapsed: running.started_at.elapsed(),
            });
        }
        if self.job_queue.iter().any(|q| q.job_id == job_id) {
            return Some(JobProgress {
                job_id,
                state: JobState::Queued,
                fraction: None,
                elapsed: Duration::ZERO,
            });
        }
        self.finished_jobs.get(&job_id).cloned()
    }

    fn get_stats(&self) -> PoolStats {
        let average_processing_time = (self.completed_jobs > 0)
            .then(|| self.total_processing_time.div_f64(self.completed_jobs as f64));

        PoolStats {
            queued_jobs: self.job_queue.len(),
            running_jobs: self.running_jobs.len(),
            completed_jobs: self.completed_jobs,
            failed_jobs: self.failed_jobs,
            cancelled_jobs: self.cancelled_jobs,
            average_processing_time,
        }
    }
}
