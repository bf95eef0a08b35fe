//! Queue configuration loaded from environment variables.

use std::time::Duration;

/// Tunables for the queue manager.
///
/// All fields have defaults suitable for a single local GPU worker.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of admitted-but-not-terminal jobs. Submissions
    /// beyond this are rejected synchronously (backpressure, never
    /// silent dropping).
    pub max_pending_jobs: usize,
    /// How many terminal jobs stay queryable before garbage collection.
    pub max_retained_jobs: usize,
    /// Hard ceiling on a single job's execution time.
    pub generation_timeout: Duration,
    /// Broadcast buffer capacity for progress events.
    pub event_capacity: usize,
}

impl QueueConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `QUEUE_MAX_PENDING`       | `8`     |
    /// | `QUEUE_MAX_RETAINED`      | `64`    |
    /// | `GENERATION_TIMEOUT_SECS` | `600`   |
    /// | `EVENT_CAPACITY`          | `256`   |
    pub fn from_env() -> Self {
        let max_pending_jobs: usize = std::env::var("QUEUE_MAX_PENDING")
            .unwrap_or_else(|_| "8".into())
            .parse()
            .expect("QUEUE_MAX_PENDING must be a valid usize");

        let max_retained_jobs: usize = std::env::var("QUEUE_MAX_RETAINED")
            .unwrap_or_else(|_| "64".into())
            .parse()
            .expect("QUEUE_MAX_RETAINED must be a valid usize");

        let generation_timeout_secs: u64 = std::env::var("GENERATION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("GENERATION_TIMEOUT_SECS must be a valid u64");

        let event_capacity: usize = std::env::var("EVENT_CAPACITY")
            .unwrap_or_else(|_| "256".into())
            .parse()
            .expect("EVENT_CAPACITY must be a valid usize");

        Self {
            max_pending_jobs,
            max_retained_jobs,
            generation_timeout: Duration::from_secs(generation_timeout_secs),
            event_capacity,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending_jobs: 8,
            max_retained_jobs: 64,
            generation_timeout: Duration::from_secs(600),
            event_capacity: 256,
        }
    }
}
