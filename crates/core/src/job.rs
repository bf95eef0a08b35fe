//! Job lifecycle model: the status variants, the stage set reported
//! while a job runs, and the transition table.
//!
//! Transitions are strictly forward. `Queued -> Running ->
//! {Complete|Failed|Cancelled}`, or `Queued -> Cancelled` directly.
//! Terminal states have no outgoing transitions and no state is ever
//! re-entered. Progress refreshes while running update the `Running`
//! payload in place and are not transitions.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::params::GenerateParams;
use crate::types::{JobId, Timestamp};

/// Pipeline stage reported while a job is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Initializing,
    LoadingModels,
    Encoding,
    Sampling,
    Decoding,
    PostProcessing,
}

impl GenerationStage {
    /// Stages in pipeline order.
    pub const ORDER: [GenerationStage; 6] = [
        GenerationStage::Initializing,
        GenerationStage::LoadingModels,
        GenerationStage::Encoding,
        GenerationStage::Sampling,
        GenerationStage::Decoding,
        GenerationStage::PostProcessing,
    ];

    /// Position of this stage in [`Self::ORDER`].
    pub fn index(self) -> usize {
        Self::ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or_default()
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the FIFO queue.
    Queued,

    /// Currently holding the single generation slot.
    Running {
        stage: GenerationStage,
        /// Completion percentage in `0.0..=100.0`.
        percent: f32,
        /// Estimated seconds remaining, from recent step timings.
        eta_seconds: f32,
    },

    /// Finished successfully; the artifact is on disk.
    Complete {
        artifact_path: String,
        duration_seconds: f32,
    },

    /// Finished with an error. The queue moves on to the next job.
    Failed { error: String },

    /// Cancelled by the client, either before or during execution.
    Cancelled,
}

impl JobStatus {
    /// Whether this state has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }

    /// Short state name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running { .. } => "running",
            JobStatus::Complete { .. } => "complete",
            JobStatus::Failed { .. } => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// A generation job as tracked by the queue manager.
///
/// The manager task is the sole owner; every other component observes
/// jobs through status messages or progress events.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub params: GenerateParams,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub status: JobStatus,
}

impl Job {
    /// Create a freshly queued job.
    pub fn new(id: JobId, params: GenerateParams) -> Self {
        Self {
            id,
            params,
            submitted_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            status: JobStatus::Queued,
        }
    }
}

/// Check whether `from -> to` is a legal lifecycle transition.
pub fn valid_transition(from: &JobStatus, to: &JobStatus) -> bool {
    use JobStatus::*;
    match (from, to) {
        (Queued, Running { .. }) => true,
        (Queued, Cancelled) => true,
        (Running { .. }, Complete { .. }) => true,
        (Running { .. }, Failed { .. }) => true,
        (Running { .. }, Cancelled) => true,
        _ => false,
    }
}

/// Validate a transition, returning an invariant-violation error for
/// illegal ones. Callers are expected to treat a violation as a
/// programming error, not an operational condition.
pub fn validate_transition(from: &JobStatus, to: &JobStatus) -> Result<(), CoreError> {
    if valid_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.name(),
            to: to.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn running() -> JobStatus {
        JobStatus::Running {
            stage: GenerationStage::Sampling,
            percent: 50.0,
            eta_seconds: 3.0,
        }
    }

    fn complete() -> JobStatus {
        JobStatus::Complete {
            artifact_path: "/tmp/out.png".into(),
            duration_seconds: 6.2,
        }
    }

    #[test]
    fn queued_can_start_or_cancel() {
        assert!(valid_transition(&JobStatus::Queued, &running()));
        assert!(valid_transition(&JobStatus::Queued, &JobStatus::Cancelled));
    }

    #[test]
    fn queued_cannot_complete_directly() {
        assert!(!valid_transition(&JobStatus::Queued, &complete()));
        assert!(!valid_transition(
            &JobStatus::Queued,
            &JobStatus::Failed { error: "x".into() }
        ));
    }

    #[test]
    fn running_reaches_every_terminal_state() {
        assert!(valid_transition(&running(), &complete()));
        assert!(valid_transition(
            &running(),
            &JobStatus::Failed { error: "boom".into() }
        ));
        assert!(valid_transition(&running(), &JobStatus::Cancelled));
    }

    #[test]
    fn running_is_not_reentered() {
        assert!(!valid_transition(&running(), &running()));
        assert!(!valid_transition(&running(), &JobStatus::Queued));
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for terminal in [complete(), JobStatus::Failed { error: "e".into() }, JobStatus::Cancelled] {
            assert!(!valid_transition(&terminal, &JobStatus::Queued));
            assert!(!valid_transition(&terminal, &running()));
            assert!(!valid_transition(&terminal, &complete()));
            assert!(!valid_transition(&terminal, &JobStatus::Cancelled));
        }
    }

    #[test]
    fn validate_transition_names_both_states() {
        let err = validate_transition(&complete(), &running()).unwrap_err();
        assert_matches!(
            err,
            CoreError::InvalidTransition { from: "complete", to: "running" }
        );
    }

    #[test]
    fn terminal_flag_matches_variants() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!running().is_terminal());
        assert!(complete().is_terminal());
        assert!(JobStatus::Failed { error: "e".into() }.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let value = serde_json::to_value(&running()).unwrap();
        assert_eq!(value["state"], "running");
        assert_eq!(value["stage"], "sampling");

        let value = serde_json::to_value(&JobStatus::Queued).unwrap();
        assert_eq!(value["state"], "queued");
    }

    #[test]
    fn stage_order_is_the_pipeline_order() {
        assert_eq!(GenerationStage::Initializing.index(), 0);
        assert_eq!(GenerationStage::Sampling.index(), 3);
        assert_eq!(GenerationStage::PostProcessing.index(), 5);
    }
}
