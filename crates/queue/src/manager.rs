//! FIFO queue manager owning all job state.
//!
//! One actor task owns the job table, the pending queue, and the single
//! execution slot; a cloneable [`QueueHandle`] talks to it over an mpsc
//! channel. Execution results and engine progress come back on a second
//! internal channel, so no component ever shares mutable state with the
//! socket layer. At most one job holds the generation slot at any
//! instant; FIFO with a single consumer makes starvation structurally
//! impossible.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use pixelforge_core::job::{validate_transition, GenerationStage, Job, JobStatus};
use pixelforge_core::params::GenerateParams;
use pixelforge_core::types::JobId;
use pixelforge_proto::messages::ProgressEvent;

use crate::config::QueueConfig;
use crate::engine::{EngineError, EngineProgress, GenerationEngine};
use crate::eta::ProgressModel;
use crate::publisher::ProgressPublisher;

/// Capacity of the command channel between handles and the actor.
const COMMAND_BUFFER: usize = 64;

/// Capacity of the internal execution-event channel.
const EXEC_BUFFER: usize = 64;

/// Errors returned by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Backpressure: the pending queue is at capacity. Returned
    /// synchronously so the caller can apply its own retry policy.
    #[error("queue full: {active} active jobs (max {max})")]
    QueueFull { active: usize, max: usize },

    /// No job with that id exists (or it was garbage-collected).
    #[error("job {0} not found")]
    NotFound(JobId),

    /// The manager task has shut down.
    #[error("queue manager is not running")]
    Closed,
}

/// Receipt for an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Submitted {
    pub job_id: JobId,
    pub estimated_seconds: f32,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u32,
    pub running: u32,
    pub uptime_seconds: u64,
}

enum Command {
    Submit {
        params: GenerateParams,
        reply: oneshot::Sender<Result<Submitted, QueueError>>,
    },
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    Status {
        job_id: JobId,
        reply: oneshot::Sender<Option<JobStatus>>,
    },
    ListActive {
        reply: oneshot::Sender<Vec<JobId>>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
}

enum ExecEvent {
    Progress {
        job_id: JobId,
        progress: EngineProgress,
    },
    Finished {
        job_id: JobId,
        outcome: Result<String, JobFailure>,
        duration: Duration,
    },
}

/// Why an execution ended without an artifact.
#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error("generation timeout")]
    TimedOut,

    #[error(transparent)]
    Engine(EngineError),
}

/// Cloneable handle to the queue actor. The only mutation path for job
/// state.
#[derive(Clone)]
pub struct QueueHandle {
    cmd_tx: mpsc::Sender<Command>,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

impl QueueHandle {
    /// Submit a generation job. Fails fast with
    /// [`QueueError::QueueFull`] once the queue is at capacity.
    pub async fn submit(&self, params: GenerateParams) -> Result<Submitted, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit { params, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Cancel a job. Queued jobs are cancelled exactly; running jobs
    /// are signalled cooperatively and marked `Cancelled` immediately.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), QueueError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Cancel { job_id, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Read the canonical status of a job.
    pub async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status { job_id, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Ids of all non-terminal jobs: the running job first, then the
    /// pending queue in FIFO order.
    pub async fn list_active(&self) -> Result<Vec<JobId>, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ListActive { reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Point-in-time queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stats { reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Subscribe to the progress broadcast.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }
}

/// Spawn the queue actor. The returned handle is the only way in;
/// cancelling `cancel` shuts the actor down, signalling any in-flight
/// execution first.
pub fn spawn(
    config: QueueConfig,
    engine: Arc<dyn GenerationEngine>,
    cancel: CancellationToken,
) -> QueueHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let publisher = ProgressPublisher::new(config.event_capacity);
    let progress_tx = publisher.sender();

    tokio::spawn(run(config, engine, publisher, cmd_rx, cancel));

    QueueHandle {
        cmd_tx,
        progress_tx,
    }
}

async fn run(
    config: QueueConfig,
    engine: Arc<dyn GenerationEngine>,
    publisher: ProgressPublisher,
    mut cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    let (exec_tx, mut exec_rx) = mpsc::channel(EXEC_BUFFER);
    let mut state = ManagerState {
        config,
        engine,
        publisher,
        exec_tx,
        cancel: cancel.clone(),
        jobs: HashMap::new(),
        pending: VecDeque::new(),
        running: None,
        terminal_order: VecDeque::new(),
        next_id: 1,
        model: ProgressModel::new(),
        started_at: Instant::now(),
    };

    tracing::info!(
        max_pending = state.config.max_pending_jobs,
        generation_timeout_secs = state.config.generation_timeout.as_secs(),
        "Queue manager started",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Queue manager shutting down");
                break;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => state.handle_command(cmd),
                None => {
                    tracing::info!("All queue handles dropped, shutting down");
                    break;
                }
            },
            event = exec_rx.recv() => {
                if let Some(event) = event {
                    state.handle_exec_event(event);
                }
            }
        }
        state.maybe_start_next();
    }

    // Signal the in-flight execution, if any, on the way out.
    if let Some(slot) = &state.running {
        slot.cancel.cancel();
    }
}

struct RunningSlot {
    job_id: JobId,
    cancel: CancellationToken,
}

struct ManagerState {
    config: QueueConfig,
    engine: Arc<dyn GenerationEngine>,
    publisher: ProgressPublisher,
    exec_tx: mpsc::Sender<ExecEvent>,
    cancel: CancellationToken,
    jobs: HashMap<JobId, Job>,
    pending: VecDeque<JobId>,
    /// Occupied from execution start until the engine task reports
    /// back, even if the job was cancelled meanwhile: the compute slot
    /// is only free once the engine actually returns.
    running: Option<RunningSlot>,
    terminal_order: VecDeque<JobId>,
    next_id: JobId,
    model: ProgressModel,
    started_at: Instant,
}

impl ManagerState {
    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { params, reply } => {
                let _ = reply.send(self.submit(params));
            }
            Command::Cancel { job_id, reply } => {
                let _ = reply.send(self.cancel_job(job_id));
            }
            Command::Status { job_id, reply } => {
                let _ = reply.send(self.jobs.get(&job_id).map(|job| job.status.clone()));
            }
            Command::ListActive { reply } => {
                let mut active: Vec<JobId> = Vec::with_capacity(self.pending.len() + 1);
                if let Some(slot) = &self.running {
                    active.push(slot.job_id);
                }
                active.extend(self.pending.iter().copied());
                let _ = reply.send(active);
            }
            Command::Stats { reply } => {
                let _ = reply.send(QueueStats {
                    queued: self.pending.len() as u32,
                    running: self.running.is_some() as u32,
                    uptime_seconds: self.started_at.elapsed().as_secs(),
                });
            }
        }
    }

    fn submit(&mut self, params: GenerateParams) -> Result<Submitted, QueueError> {
        let active = self.pending.len() + usize::from(self.running.is_some());
        if active >= self.config.max_pending_jobs {
            tracing::warn!(active, max = self.config.max_pending_jobs, "Queue full");
            return Err(QueueError::QueueFull {
                active,
                max: self.config.max_pending_jobs,
            });
        }

        let job_id = self.next_id;
        self.next_id += 1;
        let estimated_seconds = self.model.estimate_total(params.steps);

        tracing::info!(job_id, model = %params.model, steps = params.steps, "Job queued");
        self.jobs.insert(job_id, Job::new(job_id, params));
        self.pending.push_back(job_id);
        self.publisher.emit(job_id, JobStatus::Queued);

        Ok(Submitted {
            job_id,
            estimated_seconds,
        })
    }

    fn cancel_job(&mut self, job_id: JobId) -> Result<(), QueueError> {
        let Some(job) = self.jobs.get(&job_id) else {
            return Err(QueueError::NotFound(job_id));
        };
        let current = job.status.clone();

        match current {
            JobStatus::Queued => {
                self.pending.retain(|id| *id != job_id);
                self.finish_job(job_id, JobStatus::Cancelled);
                tracing::info!(job_id, "Queued job cancelled");
                Ok(())
            }
            JobStatus::Running { .. } => {
                // Cooperative: signal the engine, mark the job now. The
                // slot stays occupied until the engine actually returns.
                if let Some(slot) = &self.running {
                    if slot.job_id == job_id {
                        slot.cancel.cancel();
                    }
                }
                self.finish_job(job_id, JobStatus::Cancelled);
                tracing::info!(job_id, "Running job cancelled (signal sent to engine)");
                Ok(())
            }
            // Cancelling an already-terminal job is a no-op ack.
            _ => Ok(()),
        }
    }

    fn handle_exec_event(&mut self, event: ExecEvent) {
        match event {
            ExecEvent::Progress { job_id, progress } => self.apply_progress(job_id, progress),
            ExecEvent::Finished {
                job_id,
                outcome,
                duration,
            } => self.apply_finished(job_id, outcome, duration),
        }
    }

    fn apply_progress(&mut self, job_id: JobId, progress: EngineProgress) {
        self.model.record(&progress);

        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        // A cancelled job may still report a few steps before the
        // engine notices the signal; those updates are dropped.
        if !matches!(job.status, JobStatus::Running { .. }) {
            return;
        }

        let status = JobStatus::Running {
            stage: progress.stage,
            percent: self.model.percent(&progress),
            eta_seconds: self.model.eta_seconds(&progress),
        };
        job.status = status.clone();
        self.publisher.emit(job_id, status);
    }

    fn apply_finished(
        &mut self,
        job_id: JobId,
        outcome: Result<String, JobFailure>,
        duration: Duration,
    ) {
        if self
            .running
            .as_ref()
            .is_some_and(|slot| slot.job_id == job_id)
        {
            self.running = None;
        }

        let Some(job) = self.jobs.get(&job_id) else {
            tracing::warn!(job_id, "Execution finished for unknown job");
            return;
        };

        if job.status.is_terminal() {
            // Cancelled mid-flight. Whatever the engine produced is
            // discarded; the terminal event already went out.
            if let Ok(artifact) = &outcome {
                tracing::info!(job_id, artifact = %artifact, "Discarding artifact of cancelled job");
            }
            return;
        }

        match outcome {
            Ok(artifact_path) => {
                tracing::info!(
                    job_id,
                    artifact = %artifact_path,
                    duration_ms = duration.as_millis() as u64,
                    "Job complete",
                );
                self.finish_job(
                    job_id,
                    JobStatus::Complete {
                        artifact_path,
                        duration_seconds: duration.as_secs_f32(),
                    },
                );
            }
            Err(JobFailure::Engine(EngineError::Interrupted)) => {
                // The engine honored a cancel we no longer know about
                // (e.g. shutdown); record it as cancelled.
                self.finish_job(job_id, JobStatus::Cancelled);
            }
            Err(failure) => {
                tracing::error!(job_id, error = %failure, "Job failed");
                self.finish_job(
                    job_id,
                    JobStatus::Failed {
                        error: failure.to_string(),
                    },
                );
            }
        }
    }

    /// Apply a terminal transition, emit the terminal event, and retire
    /// the job into the bounded retention window.
    fn finish_job(&mut self, job_id: JobId, status: JobStatus) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if let Err(e) = validate_transition(&job.status, &status) {
            tracing::error!(job_id, error = %e, "Rejected illegal status transition");
            debug_assert!(false, "illegal transition for job {job_id}: {e}");
            return;
        }
        job.status = status.clone();
        job.finished_at = Some(chrono::Utc::now());
        self.publisher.emit(job_id, status);

        self.terminal_order.push_back(job_id);
        while self.terminal_order.len() > self.config.max_retained_jobs {
            if let Some(old) = self.terminal_order.pop_front() {
                self.jobs.remove(&old);
                self.publisher.forget(old);
                tracing::debug!(job_id = old, "Retired terminal job");
            }
        }
    }

    /// Start the next queued job if the generation slot is free.
    fn maybe_start_next(&mut self) {
        if self.running.is_some() {
            return;
        }
        let Some(job_id) = self.pending.pop_front() else {
            return;
        };
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };

        let status = JobStatus::Running {
            stage: GenerationStage::Initializing,
            percent: 0.0,
            eta_seconds: self.model.estimate_total(job.params.steps),
        };
        if let Err(e) = validate_transition(&job.status, &status) {
            tracing::error!(job_id, error = %e, "Rejected illegal start transition");
            debug_assert!(false, "illegal start for job {job_id}: {e}");
            return;
        }
        job.status = status.clone();
        job.started_at = Some(chrono::Utc::now());
        self.model.start_job();
        self.publisher.emit(job_id, status);

        let job_cancel = self.cancel.child_token();
        let params = job.params.clone();
        let engine = Arc::clone(&self.engine);
        let exec_tx = self.exec_tx.clone();
        let timeout = self.config.generation_timeout;
        let token = job_cancel.clone();

        tracing::info!(job_id, "Job started");
        tokio::spawn(async move {
            execute_job(engine, job_id, params, exec_tx, token, timeout).await;
        });

        self.running = Some(RunningSlot {
            job_id,
            cancel: job_cancel,
        });
    }
}

/// Drive one engine execution: forward progress samples, enforce the
/// generation timeout, and report the terminal outcome.
async fn execute_job(
    engine: Arc<dyn GenerationEngine>,
    job_id: JobId,
    params: GenerateParams,
    exec_tx: mpsc::Sender<ExecEvent>,
    cancel: CancellationToken,
    timeout: Duration,
) {
    let started = Instant::now();
    let (progress_tx, mut progress_rx) = mpsc::channel(EXEC_BUFFER);

    let forward_tx = exec_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            if forward_tx
                .send(ExecEvent::Progress { job_id, progress })
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let outcome = match tokio::time::timeout(
        timeout,
        engine.execute(job_id, &params, progress_tx, cancel.clone()),
    )
    .await
    {
        Ok(result) => result.map_err(JobFailure::Engine),
        Err(_) => {
            // Stop waiting and tell the engine to stop; the slot is
            // released when this report lands.
            cancel.cancel();
            Err(JobFailure::TimedOut)
        }
    };

    forwarder.abort();

    let _ = exec_tx
        .send(ExecEvent::Finished {
            job_id,
            outcome,
            duration: started.elapsed(),
        })
        .await;
}
