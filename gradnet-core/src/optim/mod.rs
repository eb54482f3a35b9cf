//! Gradient-based optimizers over a [`Runtime`]'s trainable set.
//!
//! An optimizer never walks the graph itself: after one or more `backward`
//! calls it reads each trainable tensor's accumulated gradient, divides by
//! `max(1, acc_steps)` to average, optionally clips, and updates the
//! parameter data in place. Callers `reset_grad` between optimizer steps.

use serde::{Deserialize, Serialize};

use crate::error::GradNetError;
use crate::runtime::Runtime;
use crate::tensor::Scalar;

mod adam;
mod fixed;

pub use adam::Adam;
pub use fixed::Fixed;

/// Common update interface. `step` applies one update from the gradients
/// currently accumulated in the runtime; it does not reset them.
pub trait Optimizer {
    fn step(&mut self, runtime: &mut Runtime) -> Result<(), GradNetError>;

    /// Symmetric per-element clip bound applied to averaged gradients.
    /// `None` disables clipping.
    fn set_grad_clip(&mut self, clip: Option<Scalar>);

    fn config(&self) -> OptimizerConfig;
}

/// Serialized optimizer settings, the external trainer's wire format:
/// `{name: "Fixed"|"Adam", params: {camelCase hyper-parameters}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub name: String,
    #[serde(default)]
    pub params: OptimizerParams,
}

/// Hyper-parameter block of [`OptimizerConfig`]. Absent fields fall back to
/// the named optimizer's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta1: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta2: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_clip: Option<Scalar>,
}

impl OptimizerConfig {
    pub fn from_json(json: &str) -> Result<Self, GradNetError> {
        serde_json::from_str(json)
            .map_err(|e| GradNetError::ConfigurationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, GradNetError> {
        serde_json::to_string(self)
            .map_err(|e| GradNetError::ConfigurationError(e.to_string()))
    }

    /// Instantiates the named optimizer, validating every provided value.
    pub fn build(&self) -> Result<Box<dyn Optimizer>, GradNetError> {
        let p = &self.params;
        if let Some(clip) = p.grad_clip {
            if clip <= 0.0 {
                return Err(GradNetError::ConfigurationError(format!(
                    "gradClip must be positive, got {clip}"
                )));
            }
        }

        let mut optimizer: Box<dyn Optimizer> = match self.name.as_str() {
            "Fixed" => Box::new(Fixed::new(
                p.learning_rate.unwrap_or(fixed::DEFAULT_LEARNING_RATE),
            )?),
            "Adam" => Box::new(Adam::new(
                p.learning_rate.unwrap_or(adam::DEFAULT_LEARNING_RATE),
                p.beta1.unwrap_or(adam::DEFAULT_BETA1),
                p.beta2.unwrap_or(adam::DEFAULT_BETA2),
                p.eps.unwrap_or(adam::DEFAULT_EPS),
            )?),
            other => {
                return Err(GradNetError::ConfigurationError(format!(
                    "unknown optimizer '{other}'"
                )))
            }
        };
        optimizer.set_grad_clip(p.grad_clip);
        Ok(optimizer)
    }
}

/// Symmetric clip to `[-limit, limit]` when a limit is set.
pub(crate) fn clip(g: Scalar, limit: Option<Scalar>) -> Scalar {
    match limit {
        Some(c) => g.clamp(-c, c),
        None => g,
    }
}
