//! Message definitions for the two IPC channels.
//!
//! Requests and responses travel on the synchronous channel, one
//! outstanding request at a time. [`ProgressEvent`]s travel on the
//! broadcast channel only. Every message carries a `type` field via the
//! serde tag; the envelope adds the protocol `version` (see
//! [`crate::codec`]).

use serde::{Deserialize, Serialize};

use pixelforge_core::job::JobStatus;
use pixelforge_core::params::GenerateParams;
use pixelforge_core::types::JobId;

/// Protocol version embedded in every frame. Peers accept a frame when
/// the major component matches.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default bind address for the request/response channel.
pub const DEFAULT_REQUEST_ADDR: &str = "127.0.0.1:5555";

/// Default bind address for the progress broadcast channel.
pub const DEFAULT_SUBSCRIBE_ADDR: &str = "127.0.0.1:5556";

/// Closed error-code set shared by both channels and both kinds of
/// consumer (human-facing UI and tool-calling bridges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    QueueFull,
    BackendUnavailable,
    Timeout,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::MethodNotFound => "method_not_found",
            ErrorCode::InvalidParams => "invalid_params",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::QueueFull => "queue_full",
            ErrorCode::BackendUnavailable => "backend_unavailable",
            ErrorCode::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request message, client to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Submit a generation job.
    Generate {
        #[serde(flatten)]
        params: GenerateParams,
    },

    /// Cancel a queued or running job.
    Cancel { job_id: JobId },

    /// Read the canonical status of one job (resync after a missed
    /// broadcast).
    Status { job_id: JobId },

    /// List models known to the worker.
    ListModels,

    /// Worker-level queue statistics.
    Stats,

    /// Liveness probe; the heartbeat substrate.
    Ping,
}

impl Request {
    /// Wire names of every request variant, used by the decode probe.
    pub const KINDS: &'static [&'static str] = &[
        "generate",
        "cancel",
        "status",
        "list_models",
        "stats",
        "ping",
    ];
}

/// Response message, worker to client. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Job admitted to the queue.
    Accepted {
        job_id: JobId,
        /// Rough total-duration estimate from recent step timings.
        estimated_seconds: f32,
    },

    /// Request was understood but refused (backpressure, validation,
    /// unknown job id).
    Rejected { code: ErrorCode, reason: String },

    /// Terminal result for a completed job (`status` queries).
    Complete {
        job_id: JobId,
        artifact_path: String,
        duration_seconds: f32,
    },

    /// Terminal result for a failed job (`status` queries).
    Failed { job_id: JobId, error: String },

    /// Cancellation acknowledged.
    Cancelled { job_id: JobId },

    /// Non-terminal status snapshot; `None` when the job is unknown or
    /// already garbage-collected.
    Status {
        job_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<JobStatus>,
    },

    /// Model catalog.
    ModelList { models: Vec<ModelInfo> },

    /// Worker statistics.
    Stats {
        version: String,
        queued: u32,
        running: u32,
        uptime_seconds: u64,
    },

    /// Liveness reply.
    Pong,

    /// The request could not be decoded or understood at the wire level.
    ProtocolError { code: ErrorCode, message: String },
}

impl Response {
    /// Wire names of every response variant, used by the decode probe.
    pub const KINDS: &'static [&'static str] = &[
        "accepted",
        "rejected",
        "complete",
        "failed",
        "cancelled",
        "status",
        "model_list",
        "stats",
        "pong",
        "protocol_error",
    ];
}

/// One broadcast progress sample.
///
/// `sequence` is strictly increasing per `job_id`, starting at 1;
/// subscribers drop duplicates and out-of-order deliveries by comparing
/// it. Delivery is at-most-once: late joiners receive no history and
/// resynchronize with a `Status` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub sequence: u64,
    pub status: JobStatus,
}

/// Wire discriminator for [`ProgressEvent`] frames.
pub const EVENT_KIND: &str = "progress";

/// One entry in the model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub path: String,
    pub model_type: ModelType,
    pub size_mb: u64,
}

/// Kind of model weight file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Checkpoint,
    Lora,
    Vae,
}
