//! Loss and reduction kernels: MSE, MAE, mean, cross-entropy over
//! probabilities, and the fused softmax + cross-entropy variants over raw
//! logits.
//!
//! Rank-2 losses reduce per row and emit an un-batch-averaged rank-1 `[B]`
//! result; graphs insert an explicit `mean` op to fully reduce. Degenerate
//! inputs (empty buffers, mismatched class counts) yield explicit zero losses
//! instead of raising, so training can run through degenerate batches.

use crate::error::GradNetError;
use crate::runtime::Runtime;
use crate::tensor::Scalar;

use super::{one_hot_index, stable_softmax, EPS};

impl Runtime {
    /// Rank 0: `0.5·x²`. Rank 1: mean of squares. Rank 2 `[B,N]`: per-row
    /// mean of squares, shape `[B]`.
    pub(crate) fn forward_mse(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let (shape, data) = {
            let x = self.tensor(x_id)?;
            if x.data.is_empty() {
                (vec![], vec![0.0])
            } else if x.rank() == 0 {
                let v = x.data[0];
                (vec![], vec![0.5 * v * v])
            } else if x.rank() == 2 {
                let batch = x.shape[0];
                let dim = x.shape[1];
                let mut out = vec![0.0; batch];
                for (b, row) in x.data.chunks(dim.max(1)).enumerate().take(batch) {
                    let sum: Scalar = row.iter().map(|&v| v * v).sum();
                    out[b] = if dim > 0 { sum / dim as Scalar } else { 0.0 };
                }
                (vec![batch], out)
            } else {
                let sum: Scalar = x.data.iter().map(|&v| v * v).sum();
                (vec![], vec![sum / x.data.len() as Scalar])
            }
        };
        self.write_output(out_id, shape, data)
    }

    pub(crate) fn backward_mse(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let dx = {
            let x = self.tensor(x_id)?;
            let y = self.tensor(out_id)?;
            let size = x.data.len();
            let mut dx = vec![0.0; size];

            if size == 0 {
                dx
            } else if x.rank() == 0 {
                let grad_out = y.grad.first().copied().unwrap_or(0.0);
                dx[0] = grad_out * x.data[0];
                dx
            } else if x.rank() == 2 {
                let batch = x.shape[0];
                let dim = x.shape[1];
                for b in 0..batch {
                    let grad_out = y.grad.get(b).copied().unwrap_or(0.0);
                    let scale = if dim > 0 {
                        (2.0 / dim as Scalar) * grad_out
                    } else {
                        0.0
                    };
                    let start = b * dim;
                    for i in 0..dim {
                        dx[start + i] = scale * x.data[start + i];
                    }
                }
                dx
            } else {
                let grad_out = y.grad.first().copied().unwrap_or(0.0);
                let scale = (2.0 / size as Scalar) * grad_out;
                for (d, &v) in dx.iter_mut().zip(&x.data) {
                    *d = scale * v;
                }
                dx
            }
        };
        self.add_grad(x_id, &dx)
    }

    /// Rank 0: `0.5·|x|`. Rank 1: mean of absolutes. Rank 2 `[B,N]`: per-row
    /// mean of absolutes, shape `[B]`.
    pub(crate) fn forward_mae(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let (shape, data) = {
            let x = self.tensor(x_id)?;
            if x.data.is_empty() {
                (vec![], vec![0.0])
            } else if x.rank() == 0 {
                (vec![], vec![0.5 * x.data[0].abs()])
            } else if x.rank() == 2 {
                let batch = x.shape[0];
                let dim = x.shape[1];
                let mut out = vec![0.0; batch];
                for (b, row) in x.data.chunks(dim.max(1)).enumerate().take(batch) {
                    let sum: Scalar = row.iter().map(|&v| v.abs()).sum();
                    out[b] = if dim > 0 { sum / dim as Scalar } else { 0.0 };
                }
                (vec![batch], out)
            } else {
                let sum: Scalar = x.data.iter().map(|&v| v.abs()).sum();
                (vec![], vec![sum / x.data.len() as Scalar])
            }
        };
        self.write_output(out_id, shape, data)
    }

    pub(crate) fn backward_mae(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let dx = {
            let x = self.tensor(x_id)?;
            let y = self.tensor(out_id)?;
            let size = x.data.len();
            let mut dx = vec![0.0; size];

            if size == 0 {
                dx
            } else if x.rank() == 0 {
                let grad_out = y.grad.first().copied().unwrap_or(0.0);
                dx[0] = grad_out * 0.5 * sign(x.data[0]);
                dx
            } else if x.rank() == 2 {
                let batch = x.shape[0];
                let dim = x.shape[1];
                for b in 0..batch {
                    let grad_out = y.grad.get(b).copied().unwrap_or(0.0);
                    let scale = if dim > 0 {
                        grad_out / dim as Scalar
                    } else {
                        0.0
                    };
                    let start = b * dim;
                    for i in 0..dim {
                        dx[start + i] = scale * sign(x.data[start + i]);
                    }
                }
                dx
            } else {
                let grad_out = y.grad.first().copied().unwrap_or(0.0);
                let scale = grad_out / size as Scalar;
                for (d, &v) in dx.iter_mut().zip(&x.data) {
                    *d = scale * sign(v);
                }
                dx
            }
        };
        self.add_grad(x_id, &dx)
    }

    /// Arithmetic mean of a non-empty rank-1 tensor, emitted as rank 0.
    pub(crate) fn forward_mean(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let mean = {
            let x = self.tensor(x_id)?;
            if x.rank() != 1 || x.data.is_empty() {
                return Err(GradNetError::mismatch("mean", &[1], &[x.rank()]));
            }
            x.data.iter().sum::<Scalar>() / x.data.len() as Scalar
        };
        self.write_output(out_id, vec![], vec![mean])
    }

    pub(crate) fn backward_mean(&mut self, x_id: usize, out_id: usize) -> Result<(), GradNetError> {
        let dx = {
            let x = self.tensor(x_id)?;
            let y = self.tensor(out_id)?;
            if x.rank() != 1 || x.data.is_empty() {
                return Err(GradNetError::mismatch("mean", &[1], &[x.rank()]));
            }
            let grad_out = y.grad.first().copied().unwrap_or(0.0);
            vec![grad_out / x.data.len() as Scalar; x.data.len()]
        };
        self.add_grad(x_id, &dx)
    }

    /// Cross-entropy over probabilities. A one-hot target row takes the fast
    /// path `-log(p_active + ε)`; otherwise the dense `-Σ t·log(p + ε)`.
    pub(crate) fn forward_cross_entropy(
        &mut self,
        pred_id: usize,
        target_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let pred = self.tensor(pred_id)?;
            let target = self.tensor(target_id)?;
            let classes = pred.data.len();

            if classes == 0 || classes != target.data.len() {
                log::warn!(
                    "CE over {} prediction(s) and {} target(s), emitting zero loss",
                    classes,
                    target.data.len()
                );
                (vec![], vec![0.0])
            } else if pred.rank() == 2 && target.rank() == 2 {
                let batch = pred.shape[0];
                let dim = pred.shape[1];
                if target.shape != pred.shape {
                    return Err(GradNetError::mismatch("CE", &pred.shape, &target.shape));
                }
                let mut out = vec![0.0; batch];
                for b in 0..batch {
                    let start = b * dim;
                    let p_row = &pred.data[start..start + dim];
                    let t_row = &target.data[start..start + dim];
                    out[b] = cross_entropy_row(p_row, t_row);
                }
                (vec![batch], out)
            } else {
                (vec![], vec![cross_entropy_row(&pred.data, &target.data)])
            }
        };
        self.write_output(out_id, shape, data)
    }

    /// `dp += -dy · t / (p + ε)`; the target tensor gets no gradient.
    pub(crate) fn backward_cross_entropy(
        &mut self,
        pred_id: usize,
        target_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let dp = {
            let pred = self.tensor(pred_id)?;
            let target = self.tensor(target_id)?;
            let y = self.tensor(out_id)?;
            let classes = pred.data.len();

            if classes == 0 || classes != target.data.len() {
                return Ok(());
            }

            let mut dp = vec![0.0; classes];
            if pred.rank() == 2 && target.rank() == 2 {
                let batch = pred.shape[0];
                let dim = pred.shape[1];
                if target.shape != pred.shape {
                    return Err(GradNetError::mismatch("CE", &pred.shape, &target.shape));
                }
                for b in 0..batch {
                    let grad_out = y.grad.get(b).copied().unwrap_or(0.0);
                    let start = b * dim;
                    for i in 0..dim {
                        let p = pred.data[start + i];
                        let t = target.data[start + i];
                        dp[start + i] = -grad_out * (t / (p + EPS));
                    }
                }
            } else {
                let grad_out = y.grad.first().copied().unwrap_or(0.0);
                for i in 0..classes {
                    dp[i] = -grad_out * (target.data[i] / (pred.data[i] + EPS));
                }
            }
            dp
        };
        self.add_grad(pred_id, &dp)
    }

    /// Fused stable softmax + cross-entropy from raw logits and a dense or
    /// one-hot target; the softmax is never materialized as a tensor.
    pub(crate) fn forward_softmax_ce_logits(
        &mut self,
        logits_id: usize,
        target_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let logits = self.tensor(logits_id)?;
            let target = self.tensor(target_id)?;
            let classes = logits.data.len();

            if classes == 0 || classes != target.data.len() {
                log::warn!(
                    "softmax_ce_logits over {} logit(s) and {} target(s), emitting zero loss",
                    classes,
                    target.data.len()
                );
                (vec![], vec![0.0])
            } else if logits.rank() == 2 && target.rank() == 2 {
                let batch = logits.shape[0];
                let dim = logits.shape[1];
                if target.shape != logits.shape {
                    return Err(GradNetError::mismatch(
                        "softmax_ce_logits",
                        &logits.shape,
                        &target.shape,
                    ));
                }
                let mut out = vec![0.0; batch];
                for b in 0..batch {
                    let start = b * dim;
                    out[b] = ce_logits_row(
                        &logits.data[start..start + dim],
                        &target.data[start..start + dim],
                    );
                }
                (vec![batch], out)
            } else {
                (vec![], vec![ce_logits_row(&logits.data, &target.data)])
            }
        };
        self.write_output(out_id, shape, data)
    }

    /// The softmax Jacobian collapses: `dz += dy · (softmax(z) − t)`.
    pub(crate) fn backward_softmax_ce_logits(
        &mut self,
        logits_id: usize,
        target_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let dz = {
            let logits = self.tensor(logits_id)?;
            let target = self.tensor(target_id)?;
            let y = self.tensor(out_id)?;
            let classes = logits.data.len();

            if classes == 0 || classes != target.data.len() {
                return Ok(());
            }

            let mut dz = vec![0.0; classes];
            if logits.rank() == 2 && target.rank() == 2 {
                let batch = logits.shape[0];
                let dim = logits.shape[1];
                if target.shape != logits.shape {
                    return Err(GradNetError::mismatch(
                        "softmax_ce_logits",
                        &logits.shape,
                        &target.shape,
                    ));
                }
                for b in 0..batch {
                    let start = b * dim;
                    let probs = stable_softmax(&logits.data[start..start + dim]);
                    let grad_out = y.grad.get(b).copied().unwrap_or(0.0);
                    for i in 0..dim {
                        dz[start + i] = grad_out * (probs[i] - target.data[start + i]);
                    }
                }
            } else {
                let probs = stable_softmax(&logits.data);
                let grad_out = y.grad.first().copied().unwrap_or(0.0);
                for i in 0..classes {
                    dz[i] = grad_out * (probs[i] - target.data[i]);
                }
            }
            dz
        };
        self.add_grad(logits_id, &dz)
    }

    /// Fused softmax + cross-entropy where the target is an integer class
    /// index: `loss = -log(softmax(logits)[label] + ε)`.
    pub(crate) fn forward_softmax_ce_logits_label_int(
        &mut self,
        logits_id: usize,
        target_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let logits = self.tensor(logits_id)?;
            let target = self.tensor(target_id)?;

            if logits.data.is_empty() {
                (vec![], vec![0.0])
            } else if logits.rank() == 2 {
                let batch = logits.shape[0];
                let dim = logits.shape[1];
                if target.rank() != 1 || target.shape[0] != batch {
                    return Err(GradNetError::mismatch(
                        "softmax_ce_logits_label_int",
                        &[batch],
                        &target.shape,
                    ));
                }
                let mut out = vec![0.0; batch];
                for b in 0..batch {
                    let start = b * dim;
                    let probs = stable_softmax(&logits.data[start..start + dim]);
                    out[b] = label_loss(&probs, target.data[b]);
                }
                (vec![batch], out)
            } else {
                let probs = stable_softmax(&logits.data);
                let label = target.data.first().copied().unwrap_or(0.0);
                (vec![], vec![label_loss(&probs, label)])
            }
        };
        self.write_output(out_id, shape, data)
    }

    /// `dz += dy · (softmax(z) − onehot(label))`; an out-of-range label
    /// contributes the plain softmax term.
    pub(crate) fn backward_softmax_ce_logits_label_int(
        &mut self,
        logits_id: usize,
        target_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let dz = {
            let logits = self.tensor(logits_id)?;
            let target = self.tensor(target_id)?;
            let y = self.tensor(out_id)?;

            if logits.data.is_empty() {
                return Ok(());
            }

            let mut dz = vec![0.0; logits.data.len()];
            if logits.rank() == 2 {
                let batch = logits.shape[0];
                let dim = logits.shape[1];
                if target.rank() != 1 || target.shape[0] != batch {
                    return Err(GradNetError::mismatch(
                        "softmax_ce_logits_label_int",
                        &[batch],
                        &target.shape,
                    ));
                }
                for b in 0..batch {
                    let start = b * dim;
                    let probs = stable_softmax(&logits.data[start..start + dim]);
                    let grad_out = y.grad.get(b).copied().unwrap_or(0.0);
                    let label = target.data[b] as i64;
                    for i in 0..dim {
                        let hot = if i as i64 == label { 1.0 } else { 0.0 };
                        dz[start + i] = grad_out * (probs[i] - hot);
                    }
                }
            } else {
                let probs = stable_softmax(&logits.data);
                let grad_out = y.grad.first().copied().unwrap_or(0.0);
                let label = target.data.first().copied().unwrap_or(0.0) as i64;
                for (i, dz_i) in dz.iter_mut().enumerate() {
                    let hot = if i as i64 == label { 1.0 } else { 0.0 };
                    *dz_i = grad_out * (probs[i] - hot);
                }
            }
            dz
        };
        self.add_grad(logits_id, &dz)
    }
}

/// One row of probability cross-entropy, with the one-hot fast path.
fn cross_entropy_row(pred: &[Scalar], target: &[Scalar]) -> Scalar {
    if let Some(active) = one_hot_index(target) {
        let p = pred.get(active).copied().unwrap_or(0.0);
        return -(p + EPS).ln();
    }

    let mut loss = 0.0;
    for (&p, &t) in pred.iter().zip(target) {
        loss += t * (p + EPS).ln();
    }
    -loss
}

/// One row of fused softmax + cross-entropy against a dense target. Only
/// positive target entries contribute.
fn ce_logits_row(logits: &[Scalar], target: &[Scalar]) -> Scalar {
    let probs = stable_softmax(logits);
    let mut loss = 0.0;
    for (&p, &t) in probs.iter().zip(target) {
        if t > 0.0 {
            loss += -t * (p + EPS).ln();
        }
    }
    loss
}

/// `-log(p[label] + ε)`, or 0 when the label falls outside the row.
fn label_loss(probs: &[Scalar], label: Scalar) -> Scalar {
    let idx = label as i64;
    if idx >= 0 && (idx as usize) < probs.len() {
        -(probs[idx as usize] + EPS).ln()
    } else {
        0.0
    }
}

/// Sign with an exact zero at zero, the MAE subgradient convention.
fn sign(v: Scalar) -> Scalar {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
#[path = "loss_test.rs"]
mod tests;
