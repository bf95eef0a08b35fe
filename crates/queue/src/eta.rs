//! Progress percentage and ETA estimation.
//!
//! Stage-weighted percent with step interpolation inside the sampling
//! stage, plus a rolling window of observed step durations feeding both
//! the live ETA and the acceptance-time total estimate. Defaults carry
//! the model until real timings accumulate.

use std::collections::VecDeque;
use std::time::Instant;

use pixelforge_core::job::GenerationStage;

use crate::engine::EngineProgress;

/// Share of total work attributed to each stage, summing to 100.
/// Sampling dominates wall-clock time on every observed backend.
fn stage_weight(stage: GenerationStage) -> f32 {
    match stage {
        GenerationStage::Initializing => 2.0,
        GenerationStage::LoadingModels => 10.0,
        GenerationStage::Encoding => 3.0,
        GenerationStage::Sampling => 80.0,
        GenerationStage::Decoding => 4.0,
        GenerationStage::PostProcessing => 1.0,
    }
}

/// Fixed duration estimate for a non-sampling stage, in seconds.
fn stage_default_seconds(stage: GenerationStage) -> f32 {
    match stage {
        GenerationStage::Initializing => 0.5,
        GenerationStage::LoadingModels => 2.0,
        GenerationStage::Encoding => 0.5,
        GenerationStage::Sampling => 0.0, // step-based, never used directly
        GenerationStage::Decoding => 1.0,
        GenerationStage::PostProcessing => 0.5,
    }
}

/// Seconds per sampling step assumed before any history exists.
const DEFAULT_STEP_SECONDS: f32 = 0.5;

/// How many recent step durations to keep.
const STEP_WINDOW: usize = 256;

/// Rolling progress model shared across jobs within one manager.
pub struct ProgressModel {
    step_durations: VecDeque<f32>,
    last_step_at: Option<Instant>,
}

impl ProgressModel {
    pub fn new() -> Self {
        Self {
            step_durations: VecDeque::with_capacity(STEP_WINDOW),
            last_step_at: None,
        }
    }

    /// Reset per-job state at execution start. Step history survives
    /// across jobs; that history is the whole point.
    pub fn start_job(&mut self) {
        self.last_step_at = None;
    }

    /// Record a progress sample, measuring inter-step durations while
    /// sampling.
    pub fn record(&mut self, progress: &EngineProgress) {
        if progress.stage != GenerationStage::Sampling {
            self.last_step_at = None;
            return;
        }
        let now = Instant::now();
        if let Some(previous) = self.last_step_at.replace(now) {
            let seconds = now.duration_since(previous).as_secs_f32();
            if self.step_durations.len() == STEP_WINDOW {
                self.step_durations.pop_front();
            }
            self.step_durations.push_back(seconds);
        }
    }

    /// Average observed step duration, or the default when no history.
    pub fn step_seconds(&self) -> f32 {
        if self.step_durations.is_empty() {
            return DEFAULT_STEP_SECONDS;
        }
        self.step_durations.iter().sum::<f32>() / self.step_durations.len() as f32
    }

    /// Overall completion percentage for a progress sample.
    pub fn percent(&self, progress: &EngineProgress) -> f32 {
        let completed: f32 = GenerationStage::ORDER
            .iter()
            .take(progress.stage.index())
            .map(|s| stage_weight(*s))
            .sum();

        let fraction = if progress.stage == GenerationStage::Sampling && progress.total_steps > 0 {
            progress.step as f32 / progress.total_steps as f32
        } else {
            0.0
        };

        (completed + fraction * stage_weight(progress.stage)).clamp(0.0, 100.0)
    }

    /// Estimated seconds remaining for a progress sample.
    pub fn eta_seconds(&self, progress: &EngineProgress) -> f32 {
        let mut eta = 0.0;

        if progress.stage == GenerationStage::Sampling {
            let remaining = progress.total_steps.saturating_sub(progress.step);
            eta += remaining as f32 * self.step_seconds();
        } else if progress.stage.index() < GenerationStage::Sampling.index() {
            eta += progress.total_steps as f32 * self.step_seconds();
        }

        for stage in GenerationStage::ORDER.iter().skip(progress.stage.index() + 1) {
            eta += stage_default_seconds(*stage);
        }
        eta
    }

    /// Acceptance-time estimate of a job's total duration.
    pub fn estimate_total(&self, steps: u32) -> f32 {
        let overhead: f32 = GenerationStage::ORDER
            .iter()
            .map(|s| stage_default_seconds(*s))
            .sum();
        overhead + steps as f32 * self.step_seconds()
    }
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(stage: GenerationStage, step: u32, total_steps: u32) -> EngineProgress {
        EngineProgress {
            stage,
            step,
            total_steps,
        }
    }

    #[test]
    fn percent_increases_across_stages() {
        let model = ProgressModel::new();
        let mut last = -1.0;
        for stage in GenerationStage::ORDER {
            let p = model.percent(&sample(stage, 0, 30));
            assert!(p >= last, "{stage:?} regressed: {p} < {last}");
            last = p;
        }
    }

    #[test]
    fn sampling_interpolates_by_step() {
        let model = ProgressModel::new();
        let start = model.percent(&sample(GenerationStage::Sampling, 0, 30));
        let mid = model.percent(&sample(GenerationStage::Sampling, 15, 30));
        let done = model.percent(&sample(GenerationStage::Sampling, 30, 30));
        assert_eq!(start, 15.0);
        assert_eq!(mid, 55.0);
        assert_eq!(done, 95.0);
    }

    #[test]
    fn percent_is_clamped() {
        let model = ProgressModel::new();
        // Step overshoot must not push percent past 100.
        let p = model.percent(&sample(GenerationStage::Sampling, 90, 30));
        assert!(p <= 100.0);
    }

    #[test]
    fn eta_shrinks_as_steps_complete() {
        let model = ProgressModel::new();
        let early = model.eta_seconds(&sample(GenerationStage::Sampling, 5, 30));
        let late = model.eta_seconds(&sample(GenerationStage::Sampling, 25, 30));
        assert!(late < early);
    }

    #[test]
    fn default_step_duration_until_history_exists() {
        let model = ProgressModel::new();
        assert_eq!(model.step_seconds(), DEFAULT_STEP_SECONDS);
    }

    #[test]
    fn estimate_total_scales_with_steps() {
        let model = ProgressModel::new();
        assert!(model.estimate_total(60) > model.estimate_total(10));
    }

    #[test]
    fn record_measures_inter_step_durations() {
        let mut model = ProgressModel::new();
        model.start_job();
        model.record(&sample(GenerationStage::Sampling, 1, 3));
        model.record(&sample(GenerationStage::Sampling, 2, 3));
        // One interval between two samples.
        assert_eq!(model.step_durations.len(), 1);
        // Leaving the sampling stage resets the interval anchor.
        model.record(&sample(GenerationStage::Decoding, 0, 3));
        model.record(&sample(GenerationStage::Sampling, 1, 3));
        assert_eq!(model.step_durations.len(), 1);
    }
}
