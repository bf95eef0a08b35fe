use std::time::Duration;

use pixelforge_proto::messages::ErrorCode;

/// Errors surfaced by the client adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The backend is not reachable (connection refused/lost, or the
    /// heartbeat miss threshold was crossed). Callers get this
    /// immediately instead of blocking while the reconnect loop runs.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The request/response round trip exceeded the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The worker understood the request but refused it.
    #[error("request rejected ({code}): {reason}")]
    Rejected { code: ErrorCode, reason: String },

    /// A wire-level failure reported by either side.
    #[error("protocol error ({code}): {message}")]
    Protocol { code: ErrorCode, message: String },

    /// The worker answered with a variant this call does not expect.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The adapter has been shut down.
    #[error("adapter is shut down")]
    Closed,
}

impl AdapterError {
    /// The closed-enum code for this error, for tool-calling consumers
    /// that propagate codes directly.
    pub fn code(&self) -> ErrorCode {
        match self {
            AdapterError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            AdapterError::Timeout(_) => ErrorCode::Timeout,
            AdapterError::Rejected { code, .. } | AdapterError::Protocol { code, .. } => *code,
            AdapterError::UnexpectedResponse(_) | AdapterError::Closed => ErrorCode::InternalError,
        }
    }
}
