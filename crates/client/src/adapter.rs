//! The client-facing adapter surface.
//!
//! [`BackendClient`] wraps the requester and subscriber tasks behind a
//! small API: bounded-timeout request calls, a non-blocking progress
//! drain for the render loop, and a heartbeat that marks the backend
//! unavailable rather than letting callers hang.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use pixelforge_core::job::JobStatus;
use pixelforge_core::params::GenerateParams;
use pixelforge_core::types::JobId;
use pixelforge_proto::messages::{ModelInfo, ProgressEvent, Request, Response};

use crate::config::ClientConfig;
use crate::error::AdapterError;
use crate::reconnect::connect_with_backoff;
use crate::requester::{run_requester, PendingRequest};
use crate::subscriber::run_subscriber;

/// Capacity of the queue feeding the requester task.
const REQUEST_QUEUE: usize = 32;

/// Observed health of the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

/// Worker statistics as reported by a `Stats` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub version: String,
    pub queued: u32,
    pub running: u32,
    pub uptime_seconds: u64,
}

/// Client adapter for the generation worker.
///
/// `generate`/`cancel`/`status` may suspend the caller, bounded by the
/// request timeout; [`poll_progress`](Self::poll_progress) never blocks
/// and is the only call meant for a render loop's hot path.
#[derive(Debug)]
pub struct BackendClient {
    req_tx: mpsc::Sender<PendingRequest>,
    event_rx: mpsc::Receiver<ProgressEvent>,
    availability: watch::Receiver<Availability>,
    cancel: CancellationToken,
}

impl BackendClient {
    /// Connect both channels, retrying with capped exponential backoff
    /// up to `connect_max_attempts`, and start the background tasks.
    pub async fn connect(config: ClientConfig) -> Result<Self, AdapterError> {
        let cancel = CancellationToken::new();

        let request_stream = connect_with_backoff(
            &config.request_addr,
            &config.backoff,
            Some(config.connect_max_attempts),
            &cancel,
        )
        .await
        .ok_or_else(|| {
            AdapterError::BackendUnavailable(format!("could not reach {}", config.request_addr))
        })?;

        let subscribe_stream = connect_with_backoff(
            &config.subscribe_addr,
            &config.backoff,
            Some(config.connect_max_attempts),
            &cancel,
        )
        .await
        .ok_or_else(|| {
            AdapterError::BackendUnavailable(format!("could not reach {}", config.subscribe_addr))
        })?;

        let (availability_tx, availability_rx) = watch::channel(Availability::Available);
        let availability_tx = Arc::new(availability_tx);
        let (req_tx, req_rx) = mpsc::channel(REQUEST_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(config.progress_buffer);

        tokio::spawn(run_requester(
            request_stream,
            config.clone(),
            req_rx,
            Arc::clone(&availability_tx),
            cancel.child_token(),
        ));
        tokio::spawn(run_subscriber(
            subscribe_stream,
            config.clone(),
            event_tx,
            cancel.child_token(),
        ));
        tokio::spawn(run_heartbeat(
            req_tx.clone(),
            availability_tx,
            config.clone(),
            cancel.child_token(),
        ));

        Ok(Self {
            req_tx,
            event_rx,
            availability: availability_rx,
            cancel,
        })
    }

    /// Submit a generation request.
    pub async fn generate(&self, params: GenerateParams) -> Result<JobId, AdapterError> {
        match self.request(Request::Generate { params }).await? {
            Response::Accepted { job_id, .. } => Ok(job_id),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Cancel a queued or running job.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), AdapterError> {
        match self.request(Request::Cancel { job_id }).await? {
            Response::Cancelled { .. } => Ok(()),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Read the canonical status of a job, `None` when the worker no
    /// longer knows the id.
    pub async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, AdapterError> {
        match self.request(Request::Status { job_id }).await? {
            Response::Status { status, .. } => Ok(status),
            Response::Complete {
                artifact_path,
                duration_seconds,
                ..
            } => Ok(Some(JobStatus::Complete {
                artifact_path,
                duration_seconds,
            })),
            Response::Failed { error, .. } => Ok(Some(JobStatus::Failed { error })),
            other => Err(Self::unexpected(other)),
        }
    }

    /// List models known to the worker.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, AdapterError> {
        match self.request(Request::ListModels).await? {
            Response::ModelList { models } => Ok(models),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Worker-level queue statistics.
    pub async fn server_stats(&self) -> Result<ServerStats, AdapterError> {
        match self.request(Request::Stats).await? {
            Response::Stats {
                version,
                queued,
                running,
                uptime_seconds,
            } => Ok(ServerStats {
                version,
                queued,
                running,
                uptime_seconds,
            }),
            other => Err(Self::unexpected(other)),
        }
    }

    /// Drain all buffered progress events without blocking.
    ///
    /// Safe to call every frame: it only touches the in-process buffer,
    /// never socket I/O.
    pub fn poll_progress(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Current backend health as seen by the connection and heartbeat.
    pub fn availability(&self) -> Availability {
        *self.availability.borrow()
    }

    /// Stop the background tasks and drop the connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn request(&self, request: Request) -> Result<Response, AdapterError> {
        if self.availability() == Availability::Unavailable {
            return Err(AdapterError::BackendUnavailable(
                "backend is marked unavailable".into(),
            ));
        }

        let (reply, rx) = oneshot::channel();
        self.req_tx
            .send(PendingRequest { request, reply })
            .await
            .map_err(|_| AdapterError::Closed)?;

        match rx.await.map_err(|_| AdapterError::Closed)?? {
            Response::Rejected { code, reason } => Err(AdapterError::Rejected { code, reason }),
            Response::ProtocolError { code, message } => {
                Err(AdapterError::Protocol { code, message })
            }
            response => Ok(response),
        }
    }

    fn unexpected(response: Response) -> AdapterError {
        AdapterError::UnexpectedResponse(format!("{response:?}"))
    }
}

impl Drop for BackendClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Periodic liveness probe. After `heartbeat_max_misses` consecutive
/// silent intervals the backend is marked unavailable; any successful
/// response flips it back.
async fn run_heartbeat(
    req_tx: mpsc::Sender<PendingRequest>,
    availability: Arc<watch::Sender<Availability>>,
    config: ClientConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut misses = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let (reply, rx) = oneshot::channel();
        if req_tx
            .try_send(PendingRequest {
                request: Request::Ping,
                reply,
            })
            .is_err()
        {
            // Request queue saturated; the requester is wedged or busy.
            misses += 1;
        } else {
            match tokio::time::timeout(config.heartbeat_interval, rx).await {
                Ok(Ok(Ok(_any_response))) => {
                    misses = 0;
                    let _ = availability.send(Availability::Available);
                    continue;
                }
                _ => misses += 1,
            }
        }

        if misses >= config.heartbeat_max_misses {
            if *availability.borrow() != Availability::Unavailable {
                tracing::warn!(misses, "Heartbeat lost, marking backend unavailable");
            }
            let _ = availability.send(Availability::Unavailable);
        }
    }
}
