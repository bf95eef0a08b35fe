//! The boundary to the external generation engine.
//!
//! The engine (an SDXL/diffusion deployment) is an opaque collaborator:
//! this crate only drives its progress callback and terminal result.
//! Callback-style reporting is translated into an mpsc channel so the
//! execution task and the queue actor never share state.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pixelforge_core::job::GenerationStage;
use pixelforge_core::params::GenerateParams;
use pixelforge_core::types::JobId;

/// One progress sample from the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineProgress {
    pub stage: GenerationStage,
    /// Current sampling step; 0 outside the sampling stage.
    pub step: u32,
    pub total_steps: u32,
}

/// Errors surfaced by an engine implementation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine endpoint could not be reached.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine honored a cancellation signal at a step boundary.
    #[error("generation interrupted")]
    Interrupted,

    /// Generation failed inside the engine.
    #[error("generation failed: {0}")]
    Generation(String),
}

/// An image-generation backend.
///
/// Implementations report progress through the `progress` sender (a
/// dropped receiver is not an error) and should observe `cancel` at
/// their step boundaries, returning [`EngineError::Interrupted`] when it
/// fires. Cancellation is cooperative: the queue marks the job
/// `Cancelled` regardless of whether the engine honors the signal, and
/// discards whatever the engine eventually returns.
#[async_trait]
pub trait GenerationEngine: Send + Sync + 'static {
    async fn execute(
        &self,
        job_id: JobId,
        params: &GenerateParams,
        progress: mpsc::Sender<EngineProgress>,
        cancel: CancellationToken,
    ) -> Result<String, EngineError>;
}

/// Engine stand-in for development and tests.
///
/// Walks the full stage pipeline with a fixed per-step delay instead of
/// calling a real diffusion service, honoring cancellation at every
/// step boundary. The dev server binary runs on this when no real
/// backend exists.
pub struct SimulatedEngine {
    step_delay: Duration,
    output_dir: String,
}

impl SimulatedEngine {
    pub fn new(step_delay: Duration, output_dir: impl Into<String>) -> Self {
        Self {
            step_delay,
            output_dir: output_dir.into(),
        }
    }

    async fn report(
        progress: &mpsc::Sender<EngineProgress>,
        stage: GenerationStage,
        step: u32,
        total_steps: u32,
    ) {
        // The receiver dropping mid-job only means nobody is listening.
        let _ = progress
            .send(EngineProgress {
                stage,
                step,
                total_steps,
            })
            .await;
    }
}

#[async_trait]
impl GenerationEngine for SimulatedEngine {
    async fn execute(
        &self,
        job_id: JobId,
        params: &GenerateParams,
        progress: mpsc::Sender<EngineProgress>,
        cancel: CancellationToken,
    ) -> Result<String, EngineError> {
        let total_steps = params.steps;

        for stage in GenerationStage::ORDER {
            if cancel.is_cancelled() {
                return Err(EngineError::Interrupted);
            }

            if stage == GenerationStage::Sampling {
                for step in 1..=total_steps {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Interrupted);
                    }
                    tokio::time::sleep(self.step_delay).await;
                    Self::report(&progress, stage, step, total_steps).await;
                }
            } else {
                tokio::time::sleep(self.step_delay).await;
                Self::report(&progress, stage, 0, total_steps).await;
            }
        }

        Ok(format!("{}/{job_id}.png", self.output_dir))
    }
}
