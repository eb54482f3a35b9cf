//! Activation kernels: relu, leaky relu, sigmoid, inverted dropout and
//! softmax.

use rand::Rng;

use crate::error::GradNetError;
use crate::runtime::Runtime;
use crate::tensor::Scalar;

use super::stable_softmax;

/// Fixed negative slope of the leaky relu.
const LEAKY_SLOPE: Scalar = 0.01;

/// Fixed Bernoulli keep probability of the dropout op. Kept activations are
/// scaled by `1/keep` so the expected output matches the un-dropped input.
const DROPOUT_KEEP: Scalar = 0.5;

impl Runtime {
    pub(crate) fn forward_relu(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let (shape, data) = {
            let x = self.tensor(x_id)?;
            let data = x
                .data
                .iter()
                .map(|&v| if v > 0.0 { v } else { 0.0 })
                .collect();
            (x.shape.clone(), data)
        };
        self.write_output(out_id, shape, data)
    }

    pub(crate) fn backward_relu(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let dx = {
            let x = self.tensor(x_id)?;
            let y = self.tensor(out_id)?;
            x.data
                .iter()
                .zip(&y.grad)
                .map(|(&v, &g)| if v > 0.0 { g } else { 0.0 })
                .collect::<Vec<_>>()
        };
        self.add_grad(x_id, &dx)
    }

    pub(crate) fn forward_leaky_relu(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let x = self.tensor(x_id)?;
            let data = x
                .data
                .iter()
                .map(|&v| if v > 0.0 { v } else { LEAKY_SLOPE * v })
                .collect();
            (x.shape.clone(), data)
        };
        self.write_output(out_id, shape, data)
    }

    pub(crate) fn backward_leaky_relu(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let dx = {
            let x = self.tensor(x_id)?;
            let y = self.tensor(out_id)?;
            x.data
                .iter()
                .zip(&y.grad)
                .map(|(&v, &g)| if v > 0.0 { g } else { LEAKY_SLOPE * g })
                .collect::<Vec<_>>()
        };
        self.add_grad(x_id, &dx)
    }

    pub(crate) fn forward_sigmoid(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let x = self.tensor(x_id)?;
            let data = x.data.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect();
            (x.shape.clone(), data)
        };
        self.write_output(out_id, shape, data)
    }

    pub(crate) fn backward_sigmoid(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        // dx += dy · y · (1 - y), reading back the forward output
        let dx = {
            let y = self.tensor(out_id)?;
            y.data
                .iter()
                .zip(&y.grad)
                .map(|(&y_i, &g)| g * y_i * (1.0 - y_i))
                .collect::<Vec<_>>()
        };
        self.add_grad(x_id, &dx)
    }

    /// Per-element Bernoulli keep; the only non-deterministic op in the
    /// vocabulary. A fresh mask is drawn on every call.
    pub(crate) fn forward_dropout(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let scale = 1.0 / DROPOUT_KEEP;
        let (shape, data) = {
            let x = self
                .tensors
                .get(x_id)
                .ok_or(GradNetError::UnknownTensor { id: x_id })?;
            let rng = &mut self.rng;
            let data = x
                .data
                .iter()
                .map(|&v| {
                    if rng.gen_bool(DROPOUT_KEEP) {
                        v * scale
                    } else {
                        0.0
                    }
                })
                .collect();
            (x.shape.clone(), data)
        };
        self.write_output(out_id, shape, data)
    }

    /// The mask is reconstructed from the forward pair: `y/x` where the input
    /// was non-zero, else 0 (dropped) or 1 (zero passed through).
    pub(crate) fn backward_dropout(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let dx = {
            let x = self.tensor(x_id)?;
            let y = self.tensor(out_id)?;
            x.data
                .iter()
                .zip(y.data.iter().zip(&y.grad))
                .map(|(&xv, (&yv, &g))| {
                    let mask = if xv != 0.0 {
                        yv / xv
                    } else if yv == 0.0 {
                        0.0
                    } else {
                        1.0
                    };
                    g * mask
                })
                .collect::<Vec<_>>()
        };
        self.add_grad(x_id, &dx)
    }

    /// Max-subtracted softmax, row-wise for rank 2 and over the whole buffer
    /// otherwise.
    pub(crate) fn forward_softmax(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let x = self.tensor(x_id)?;
            if x.rank() == 2 {
                let dim = x.shape[1];
                let mut out = Vec::with_capacity(x.data.len());
                if dim > 0 {
                    for row in x.data.chunks(dim) {
                        out.extend(stable_softmax(row));
                    }
                }
                (x.shape.clone(), out)
            } else {
                (x.shape.clone(), stable_softmax(&x.data))
            }
        };
        self.write_output(out_id, shape, data)
    }

    /// Full Jacobian: `dx_i += Σ_j dy_j · y_j · (δ_ij − y_i)`.
    pub(crate) fn backward_softmax(
        &mut self,
        x_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let dx = {
            let y = self.tensor(out_id)?;
            let mut dx = vec![0.0; y.data.len()];

            let dim = if y.rank() == 2 { y.shape[1] } else { y.data.len() };
            if dim > 0 {
                for r in 0..y.data.len() / dim {
                    let row_start = r * dim;
                    for i in 0..dim {
                        let y_i = y.data[row_start + i];
                        let mut grad = 0.0;
                        for j in 0..dim {
                            let delta = if i == j { 1.0 } else { 0.0 };
                            let y_j = y.data[row_start + j];
                            grad += y.grad[row_start + j] * y_j * (delta - y_i);
                        }
                        dx[row_start + i] = grad;
                    }
                }
            }
            dx
        };
        self.add_grad(x_id, &dx)
    }
}

#[cfg(test)]
#[path = "activation_test.rs"]
mod tests;
