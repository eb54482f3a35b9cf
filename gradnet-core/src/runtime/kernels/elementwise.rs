//! Elementwise add/sub, including the `[B,N] ± [N]` row-broadcast layout used
//! for bias terms in batched dense layers.

use crate::error::GradNetError;
use crate::runtime::Runtime;
use crate::tensor::Scalar;

impl Runtime {
    pub(crate) fn forward_add(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        self.forward_add_sub(a_id, b_id, out_id, "add", |x, y| x + y)
    }

    pub(crate) fn forward_sub(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        self.forward_add_sub(a_id, b_id, out_id, "sub", |x, y| x - y)
    }

    fn forward_add_sub(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
        operation: &str,
        combine: impl Fn(Scalar, Scalar) -> Scalar,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let a = self.tensor(a_id)?;
            let b = self.tensor(b_id)?;

            if a.rank() == 2 && b.rank() == 1 {
                let batch = a.shape[0];
                let dim = a.shape[1];
                if b.shape[0] != dim {
                    return Err(GradNetError::mismatch(operation, &a.shape, &b.shape));
                }
                let mut out = vec![0.0; batch * dim];
                for row in 0..batch {
                    let start = row * dim;
                    for i in 0..dim {
                        out[start + i] = combine(a.data[start + i], b.data[i]);
                    }
                }
                (vec![batch, dim], out)
            } else {
                if a.data.len() != b.data.len() {
                    return Err(GradNetError::mismatch(
                        operation,
                        &[a.data.len()],
                        &[b.data.len()],
                    ));
                }
                let out = a
                    .data
                    .iter()
                    .zip(&b.data)
                    .map(|(&x, &y)| combine(x, y))
                    .collect();
                (a.shape.clone(), out)
            }
        };

        self.write_output(out_id, shape, data)
    }

    pub(crate) fn backward_add(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        self.backward_add_sub(a_id, b_id, out_id, "add", 1.0)
    }

    pub(crate) fn backward_sub(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        self.backward_add_sub(a_id, b_id, out_id, "sub", -1.0)
    }

    /// `b_sign` is the adjoint sign of the right operand: +1 for add, -1 for
    /// sub. Broadcast rows sum their gradients back into the rank-1 operand.
    fn backward_add_sub(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
        operation: &str,
        b_sign: Scalar,
    ) -> Result<(), GradNetError> {
        let (da, db) = {
            let a = self.tensor(a_id)?;
            let b = self.tensor(b_id)?;
            let c = self.tensor(out_id)?;

            let mut da = vec![0.0; a.data.len()];
            let mut db = vec![0.0; b.data.len()];

            if a.rank() == 2 && b.rank() == 1 {
                let batch = a.shape[0];
                let dim = a.shape[1];
                if b.shape[0] != dim {
                    return Err(GradNetError::mismatch(operation, &a.shape, &b.shape));
                }
                for row in 0..batch {
                    let start = row * dim;
                    for i in 0..dim {
                        let g = c.grad[start + i];
                        da[start + i] += g;
                        db[i] += b_sign * g;
                    }
                }
            } else {
                if c.grad.len() != da.len() || c.grad.len() != db.len() {
                    return Err(GradNetError::mismatch(
                        operation,
                        &[da.len()],
                        &[c.grad.len()],
                    ));
                }
                for (i, &g) in c.grad.iter().enumerate() {
                    da[i] += g;
                    db[i] += b_sign * g;
                }
            }

            (da, db)
        };

        self.add_grad(a_id, &da)?;
        self.add_grad(b_id, &db)
    }
}

#[cfg(test)]
#[path = "elementwise_test.rs"]
mod tests;
