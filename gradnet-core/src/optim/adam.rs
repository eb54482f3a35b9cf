//! Adam with bias correction. First and second moment buffers are kept per
//! trainable tensor id, sized lazily on the first step so a runtime swap with
//! matching shapes keeps its momentum.

use std::collections::HashMap;

use crate::error::GradNetError;
use crate::runtime::Runtime;
use crate::tensor::Scalar;

use super::{clip, Optimizer, OptimizerConfig, OptimizerParams};

pub(super) const DEFAULT_LEARNING_RATE: Scalar = 0.1;
pub(super) const DEFAULT_BETA1: Scalar = 0.9;
pub(super) const DEFAULT_BETA2: Scalar = 0.999;
pub(super) const DEFAULT_EPS: Scalar = 1.0e-8;

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: Scalar,
    beta1: Scalar,
    beta2: Scalar,
    eps: Scalar,
    grad_clip: Option<Scalar>,
    /// First moment per trainable tensor id.
    m: HashMap<usize, Vec<Scalar>>,
    /// Second raw moment per trainable tensor id.
    v: HashMap<usize, Vec<Scalar>>,
    /// 1-based step counter for bias correction.
    step_number: u64,
}

impl Adam {
    pub fn new(
        learning_rate: Scalar,
        beta1: Scalar,
        beta2: Scalar,
        eps: Scalar,
    ) -> Result<Self, GradNetError> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(GradNetError::ConfigurationError(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        if !(0.0..1.0).contains(&beta1) {
            return Err(GradNetError::ConfigurationError(format!(
                "beta1 must be in [0, 1), got {beta1}"
            )));
        }
        if !(0.0..1.0).contains(&beta2) {
            return Err(GradNetError::ConfigurationError(format!(
                "beta2 must be in [0, 1), got {beta2}"
            )));
        }
        if eps <= 0.0 || !eps.is_finite() {
            return Err(GradNetError::ConfigurationError(format!(
                "eps must be positive, got {eps}"
            )));
        }
        Ok(Adam {
            learning_rate,
            beta1,
            beta2,
            eps,
            grad_clip: None,
            m: HashMap::new(),
            v: HashMap::new(),
            step_number: 1,
        })
    }

    /// Drops the moment buffers and restarts bias correction.
    pub fn reset_state(&mut self) {
        self.m.clear();
        self.v.clear();
        self.step_number = 1;
    }
}

impl Optimizer for Adam {
    fn step(&mut self, runtime: &mut Runtime) -> Result<(), GradNetError> {
        let n = runtime.acc_steps().max(1) as Scalar;
        let t = self.step_number as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        for id in runtime.trainable().to_vec() {
            let (data, grad) = runtime.param_update(id)?;
            let m = self
                .m
                .entry(id)
                .or_insert_with(|| vec![0.0; data.len()]);
            let v = self
                .v
                .entry(id)
                .or_insert_with(|| vec![0.0; data.len()]);
            if m.len() != data.len() || v.len() != data.len() {
                return Err(GradNetError::ConfigurationError(format!(
                    "optimizer state for tensor {} sized {}, parameter has {}",
                    id,
                    m.len(),
                    data.len()
                )));
            }

            for i in 0..data.len() {
                let g = clip(grad[i] / n, self.grad_clip);
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                data[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.eps);
            }
        }

        self.step_number += 1;
        Ok(())
    }

    fn set_grad_clip(&mut self, grad_clip: Option<Scalar>) {
        self.grad_clip = grad_clip;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig {
            name: "Adam".to_string(),
            params: OptimizerParams {
                learning_rate: Some(self.learning_rate),
                beta1: Some(self.beta1),
                beta2: Some(self.beta2),
                eps: Some(self.eps),
                grad_clip: self.grad_clip,
            },
        }
    }
}

#[cfg(test)]
#[path = "adam_test.rs"]
mod tests;
