//! Client adapter configuration loaded from environment variables.

use std::time::Duration;

use pixelforge_proto::codec::DEFAULT_MAX_FRAME_BYTES;
use pixelforge_proto::messages::{DEFAULT_REQUEST_ADDR, DEFAULT_SUBSCRIBE_ADDR};

use crate::reconnect::BackoffConfig;

/// Tunables for [`crate::adapter::BackendClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Worker request/response endpoint.
    pub request_addr: String,
    /// Worker progress broadcast endpoint.
    pub subscribe_addr: String,
    /// Bound on one request/response round trip. Distinct from (and
    /// much smaller than) the worker's generation timeout.
    pub request_timeout: Duration,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before the backend is marked
    /// unavailable.
    pub heartbeat_max_misses: u32,
    /// Connection attempts made by `connect` before giving up.
    pub connect_max_attempts: u32,
    /// Backoff between reconnection attempts.
    pub backoff: BackoffConfig,
    /// Buffered progress events awaiting a `poll_progress` drain.
    pub progress_buffer: usize,
    /// Upper bound on a single wire frame.
    pub max_frame_bytes: usize,
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default           |
    /// |--------------------------|-------------------|
    /// | `BACKEND_REQUEST_ADDR`   | `127.0.0.1:5555`  |
    /// | `BACKEND_SUBSCRIBE_ADDR` | `127.0.0.1:5556`  |
    /// | `REQUEST_TIMEOUT_MS`     | `5000`            |
    /// | `HEARTBEAT_INTERVAL_MS`  | `1000`            |
    /// | `HEARTBEAT_MAX_MISSES`   | `3`               |
    /// | `CONNECT_MAX_ATTEMPTS`   | `5`               |
    pub fn from_env() -> Self {
        let request_addr =
            std::env::var("BACKEND_REQUEST_ADDR").unwrap_or_else(|_| DEFAULT_REQUEST_ADDR.into());
        let subscribe_addr = std::env::var("BACKEND_SUBSCRIBE_ADDR")
            .unwrap_or_else(|_| DEFAULT_SUBSCRIBE_ADDR.into());

        let request_timeout_ms: u64 = std::env::var("REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".into())
            .parse()
            .expect("REQUEST_TIMEOUT_MS must be a valid u64");

        let heartbeat_interval_ms: u64 = std::env::var("HEARTBEAT_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("HEARTBEAT_INTERVAL_MS must be a valid u64");

        let heartbeat_max_misses: u32 = std::env::var("HEARTBEAT_MAX_MISSES")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("HEARTBEAT_MAX_MISSES must be a valid u32");

        let connect_max_attempts: u32 = std::env::var("CONNECT_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("CONNECT_MAX_ATTEMPTS must be a valid u32");

        Self {
            request_addr,
            subscribe_addr,
            request_timeout: Duration::from_millis(request_timeout_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            heartbeat_max_misses,
            connect_max_attempts,
            backoff: BackoffConfig::default(),
            progress_buffer: 1024,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_addr: DEFAULT_REQUEST_ADDR.into(),
            subscribe_addr: DEFAULT_SUBSCRIBE_ADDR.into(),
            request_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_max_misses: 3,
            connect_max_attempts: 5,
            backoff: BackoffConfig::default(),
            progress_buffer: 1024,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
