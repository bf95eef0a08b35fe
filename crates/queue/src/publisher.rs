//! Progress broadcast with per-job sequence numbering.
//!
//! Wraps a `tokio::sync::broadcast` channel. Delivery is at-most-once
//! per subscriber: nobody listening means the event is dropped, and a
//! late joiner receives no history; clients resynchronize with a
//! `Status` request. Once a job's terminal event has gone out, no
//! further event for that job id is ever emitted.

use std::collections::{HashMap, HashSet};

use tokio::sync::broadcast;

use pixelforge_core::job::JobStatus;
use pixelforge_core::types::JobId;
use pixelforge_proto::messages::ProgressEvent;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Sequenced progress fan-out for the queue manager.
///
/// Owned by the manager task; only it emits. Subscribers hold plain
/// `broadcast::Receiver`s obtained from [`subscribe`](Self::subscribe)
/// or a cloned [`sender`](Self::sender).
pub struct ProgressPublisher {
    tx: broadcast::Sender<ProgressEvent>,
    sequences: HashMap<JobId, u64>,
    closed: HashSet<JobId>,
}

impl ProgressPublisher {
    /// Create a publisher with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are
    /// dropped and slow receivers observe `RecvError::Lagged`: a gap,
    /// never a reordering.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            sequences: HashMap::new(),
            closed: HashSet::new(),
        }
    }

    /// Clone of the raw sender, for handing `subscribe` access to other
    /// components.
    pub fn sender(&self) -> broadcast::Sender<ProgressEvent> {
        self.tx.clone()
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit a status event for a job, assigning the next sequence
    /// number.
    ///
    /// Events for a job that has already emitted its terminal event are
    /// silently dropped; that terminal event is guaranteed to be the
    /// last one observed for the job id.
    pub fn emit(&mut self, job_id: JobId, status: JobStatus) {
        if self.closed.contains(&job_id) {
            tracing::debug!(job_id, status = status.name(), "Dropping post-terminal event");
            return;
        }

        let sequence = self.sequences.entry(job_id).or_insert(0);
        *sequence += 1;
        let event = ProgressEvent {
            job_id,
            sequence: *sequence,
            status: status.clone(),
        };

        if status.is_terminal() {
            self.closed.insert(job_id);
            self.sequences.remove(&job_id);
        }

        // A send error only means there are zero subscribers right now.
        let _ = self.tx.send(event);
    }

    /// Release bookkeeping for a garbage-collected job.
    pub fn forget(&mut self, job_id: JobId) {
        self.sequences.remove(&job_id);
        self.closed.remove(&job_id);
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
