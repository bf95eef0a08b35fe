/// Job identifiers are process-local and monotonically increasing,
/// starting at 1. They are never reused within a worker lifetime.
pub type JobId = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
