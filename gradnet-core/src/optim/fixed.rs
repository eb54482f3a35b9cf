//! Fixed-rate SGD: `w -= lr · ḡ` with ḡ the clip-bounded average of the
//! gradients accumulated since the last `reset_grad`.

use crate::error::GradNetError;
use crate::runtime::Runtime;
use crate::tensor::Scalar;

use super::{clip, Optimizer, OptimizerConfig, OptimizerParams};

pub(super) const DEFAULT_LEARNING_RATE: Scalar = 0.1;

#[derive(Debug, Clone)]
pub struct Fixed {
    learning_rate: Scalar,
    grad_clip: Option<Scalar>,
}

impl Fixed {
    pub fn new(learning_rate: Scalar) -> Result<Self, GradNetError> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(GradNetError::ConfigurationError(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        Ok(Fixed {
            learning_rate,
            grad_clip: None,
        })
    }

    pub fn learning_rate(&self) -> Scalar {
        self.learning_rate
    }
}

impl Optimizer for Fixed {
    fn step(&mut self, runtime: &mut Runtime) -> Result<(), GradNetError> {
        let n = runtime.acc_steps().max(1) as Scalar;
        for id in runtime.trainable().to_vec() {
            let (data, grad) = runtime.param_update(id)?;
            for (w, &g) in data.iter_mut().zip(grad) {
                *w -= self.learning_rate * clip(g / n, self.grad_clip);
            }
        }
        Ok(())
    }

    fn set_grad_clip(&mut self, grad_clip: Option<Scalar>) {
        self.grad_clip = grad_clip;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig {
            name: "Fixed".to_string(),
            params: OptimizerParams {
                learning_rate: Some(self.learning_rate),
                grad_clip: self.grad_clip,
                ..OptimizerParams::default()
            },
        }
    }
}

#[cfg(test)]
#[path = "fixed_test.rs"]
mod tests;
