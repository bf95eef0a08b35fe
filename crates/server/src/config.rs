//! Server configuration loaded from environment variables.

use pixelforge_proto::codec::DEFAULT_MAX_FRAME_BYTES;
use pixelforge_proto::messages::{DEFAULT_REQUEST_ADDR, DEFAULT_SUBSCRIBE_ADDR};

/// Bind addresses and transport limits for the worker process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Request/response channel bind address.
    pub request_bind: String,
    /// Progress broadcast channel bind address.
    pub subscribe_bind: String,
    /// Root directory scanned for model weight files. Expected to
    /// contain `checkpoints/`, `loras/`, and `vae/` subdirectories.
    pub model_dir: String,
    /// Upper bound on a single wire frame.
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var           | Default          |
    /// |-------------------|------------------|
    /// | `REQUEST_BIND`    | `127.0.0.1:5555` |
    /// | `SUBSCRIBE_BIND`  | `127.0.0.1:5556` |
    /// | `MODEL_DIR`       | `./models`       |
    /// | `MAX_FRAME_BYTES` | `1048576`        |
    pub fn from_env() -> Self {
        let request_bind =
            std::env::var("REQUEST_BIND").unwrap_or_else(|_| DEFAULT_REQUEST_ADDR.into());
        let subscribe_bind =
            std::env::var("SUBSCRIBE_BIND").unwrap_or_else(|_| DEFAULT_SUBSCRIBE_ADDR.into());
        let model_dir = std::env::var("MODEL_DIR").unwrap_or_else(|_| "./models".into());

        let max_frame_bytes: usize = std::env::var("MAX_FRAME_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_FRAME_BYTES.to_string())
            .parse()
            .expect("MAX_FRAME_BYTES must be a valid usize");

        Self {
            request_bind,
            subscribe_bind,
            model_dir,
            max_frame_bytes,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_bind: DEFAULT_REQUEST_ADDR.into(),
            subscribe_bind: DEFAULT_SUBSCRIBE_ADDR.into(),
            model_dir: "./models".into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
