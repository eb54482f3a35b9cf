//! Forward/backward kernel pairs, one module per op family. Each kernel
//! reads its inputs immutably, computes into a local buffer, then writes the
//! output record or accumulates into input gradients; that keeps gradient
//! accumulation correct even when one tensor feeds both operands of an op.

use crate::tensor::Scalar;

pub(crate) mod activation;
pub(crate) mod elementwise;
pub(crate) mod linalg;
pub(crate) mod loss;

/// Epsilon guard for logarithms of probabilities.
pub(super) const EPS: Scalar = 1.0e-12;

/// Max-subtracted softmax over one row. A zero exponent sum (possible only
/// for degenerate input) yields an all-zero row instead of a division by
/// zero, so training can run through degenerate batches.
pub(super) fn stable_softmax(row: &[Scalar]) -> Vec<Scalar> {
    let mut out = vec![0.0; row.len()];
    if row.is_empty() {
        return out;
    }

    let max = row.iter().cloned().fold(row[0], Scalar::max);
    let mut sum = 0.0;
    for (o, &x) in out.iter_mut().zip(row) {
        *o = (x - max).exp();
        sum += *o;
    }

    let inv_sum = if sum == 0.0 { 0.0 } else { 1.0 / sum };
    for o in &mut out {
        *o *= inv_sum;
    }
    out
}

/// Detects a one-hot target row: exactly one entry above 0.5, everything
/// else numerically zero. Returns the active index.
pub(super) fn one_hot_index(target: &[Scalar]) -> Option<usize> {
    let mut active = None;
    for (i, &v) in target.iter().enumerate() {
        if v > 0.5 {
            if active.is_some() {
                return None;
            }
            active = Some(i);
        } else if v.abs() > 1.0e-9 {
            return None;
        }
    }
    active
}
