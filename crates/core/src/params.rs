//! Generation request parameters and boundary validation.
//!
//! Validation runs at the request boundary; the queue only ever sees
//! parameters that already passed it.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LEN: usize = 2000;

/// Maximum model (and LoRA) name length.
pub const MAX_MODEL_NAME_LEN: usize = 256;

/// Sampling step bounds.
pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 200;

/// Classifier-free-guidance scale upper bound.
pub const MAX_CFG_SCALE: f32 = 30.0;

/// Output dimension bounds in pixels.
pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 4096;

/// Parameters of a generation request.
///
/// Opaque to the queue and transport layers; only [`validate_params`]
/// and the engine look inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub prompt: String,
    pub model: String,
    /// Optional LoRA adapter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora: Option<String>,
    /// Output size as `(width, height)` in pixels.
    pub size: (u32, u32),
    pub steps: u32,
    pub cfg_scale: f32,
}

/// Validate request parameters.
///
/// Rules:
/// - Prompt must be non-empty and at most [`MAX_PROMPT_LEN`] characters.
/// - Model name must be non-empty and at most [`MAX_MODEL_NAME_LEN`].
/// - A LoRA name, when present, must be non-empty and bounded likewise.
/// - Steps must be within [`MIN_STEPS`]..=[`MAX_STEPS`].
/// - `cfg_scale` must be finite and within `0.0..=`[`MAX_CFG_SCALE`].
/// - Both dimensions must be within [`MIN_DIMENSION`]..=[`MAX_DIMENSION`].
pub fn validate_params(params: &GenerateParams) -> Result<(), CoreError> {
    if params.prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".into()));
    }
    if params.prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "Prompt must not exceed {MAX_PROMPT_LEN} characters"
        )));
    }
    if params.model.is_empty() {
        return Err(CoreError::Validation("Model name must not be empty".into()));
    }
    if params.model.len() > MAX_MODEL_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Model name must not exceed {MAX_MODEL_NAME_LEN} characters"
        )));
    }
    if let Some(lora) = &params.lora {
        if lora.is_empty() {
            return Err(CoreError::Validation(
                "LoRA name must not be empty when present".into(),
            ));
        }
        if lora.len() > MAX_MODEL_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "LoRA name must not exceed {MAX_MODEL_NAME_LEN} characters"
            )));
        }
    }
    if !(MIN_STEPS..=MAX_STEPS).contains(&params.steps) {
        return Err(CoreError::Validation(format!(
            "Steps must be between {MIN_STEPS} and {MAX_STEPS}"
        )));
    }
    if !params.cfg_scale.is_finite() || params.cfg_scale < 0.0 || params.cfg_scale > MAX_CFG_SCALE {
        return Err(CoreError::Validation(format!(
            "cfg_scale must be between 0 and {MAX_CFG_SCALE}"
        )));
    }
    let (width, height) = params.size;
    for dim in [width, height] {
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&dim) {
            return Err(CoreError::Validation(format!(
                "Dimensions must be between {MIN_DIMENSION} and {MAX_DIMENSION} pixels"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> GenerateParams {
        GenerateParams {
            prompt: "16-bit knight sprite, side view".into(),
            model: "sdxl-base".into(),
            lora: None,
            size: (1024, 1024),
            steps: 30,
            cfg_scale: 7.5,
        }
    }

    #[test]
    fn valid_params_pass() {
        assert!(validate_params(&base()).is_ok());
    }

    #[test]
    fn empty_prompt_rejected() {
        let mut p = base();
        p.prompt = "   ".into();
        assert!(validate_params(&p).is_err());
    }

    #[test]
    fn oversized_prompt_rejected() {
        let mut p = base();
        p.prompt = "a".repeat(MAX_PROMPT_LEN + 1);
        assert!(validate_params(&p).is_err());
    }

    #[test]
    fn empty_model_rejected() {
        let mut p = base();
        p.model = String::new();
        assert!(validate_params(&p).is_err());
    }

    #[test]
    fn empty_lora_rejected_but_absent_lora_ok() {
        let mut p = base();
        p.lora = Some(String::new());
        assert!(validate_params(&p).is_err());
        p.lora = Some("pixelart".into());
        assert!(validate_params(&p).is_ok());
    }

    #[test]
    fn step_bounds_enforced() {
        let mut p = base();
        p.steps = 0;
        assert!(validate_params(&p).is_err());
        p.steps = MAX_STEPS + 1;
        assert!(validate_params(&p).is_err());
        p.steps = MAX_STEPS;
        assert!(validate_params(&p).is_ok());
    }

    #[test]
    fn cfg_scale_bounds_enforced() {
        let mut p = base();
        p.cfg_scale = -0.1;
        assert!(validate_params(&p).is_err());
        p.cfg_scale = MAX_CFG_SCALE + 1.0;
        assert!(validate_params(&p).is_err());
        p.cfg_scale = f32::NAN;
        assert!(validate_params(&p).is_err());
    }

    #[test]
    fn dimension_bounds_enforced() {
        let mut p = base();
        p.size = (MIN_DIMENSION - 1, 1024);
        assert!(validate_params(&p).is_err());
        p.size = (1024, MAX_DIMENSION + 1);
        assert!(validate_params(&p).is_err());
        p.size = (MIN_DIMENSION, MAX_DIMENSION);
        assert!(validate_params(&p).is_ok());
    }
}
