//! Matrix product and dot product kernels.
//!
//! `matmul` supports exactly two layouts: rank-2 × rank-1 (matrix-vector)
//! and rank-2 `[B,D]` × rank-2 `[D,N]` (batched). `dot` reduces two
//! equal-length buffers to a scalar.

use crate::error::GradNetError;
use crate::runtime::Runtime;

impl Runtime {
    pub(crate) fn forward_matmul(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (shape, data) = {
            let a = self.tensor(a_id)?;
            let b = self.tensor(b_id)?;

            if a.rank() != 2 {
                return Err(GradNetError::mismatch("matmul lhs rank", &[2], &[a.rank()]));
            }
            let m = a.shape[0];
            let n = a.shape[1];

            match b.rank() {
                1 => {
                    if b.shape[0] != n {
                        return Err(GradNetError::mismatch("matmul", &a.shape, &b.shape));
                    }
                    let mut out = vec![0.0; m];
                    for i in 0..m {
                        let mut sum = 0.0;
                        for k in 0..n {
                            sum += a.data[i * n + k] * b.data[k];
                        }
                        out[i] = sum;
                    }
                    (vec![m], out)
                }
                2 => {
                    let out_dim = b.shape[1];
                    if b.shape[0] != n {
                        return Err(GradNetError::mismatch("matmul", &a.shape, &b.shape));
                    }
                    let mut out = vec![0.0; m * out_dim];
                    for row in 0..m {
                        let a_row = row * n;
                        let c_row = row * out_dim;
                        for d in 0..n {
                            let a_val = a.data[a_row + d];
                            let b_row = d * out_dim;
                            for col in 0..out_dim {
                                out[c_row + col] += a_val * b.data[b_row + col];
                            }
                        }
                    }
                    (vec![m, out_dim], out)
                }
                rank => {
                    return Err(GradNetError::mismatch("matmul rhs rank", &[1, 2], &[rank]))
                }
            }
        };

        self.write_output(out_id, shape, data)
    }

    pub(crate) fn backward_matmul(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (da, db) = {
            let a = self.tensor(a_id)?;
            let b = self.tensor(b_id)?;
            let c = self.tensor(out_id)?;

            if a.rank() != 2 {
                return Err(GradNetError::mismatch("matmul lhs rank", &[2], &[a.rank()]));
            }
            let m = a.shape[0];
            let n = a.shape[1];
            let mut da = vec![0.0; a.data.len()];
            let mut db = vec![0.0; b.data.len()];

            match b.rank() {
                1 => {
                    if c.grad.len() != m {
                        return Err(GradNetError::mismatch("matmul", &[m], &[c.grad.len()]));
                    }
                    // dA += outer(dC, B); dB += Aᵗ·dC
                    for i in 0..m {
                        let grad_c = c.grad[i];
                        for k in 0..n {
                            da[i * n + k] += grad_c * b.data[k];
                            db[k] += grad_c * a.data[i * n + k];
                        }
                    }
                }
                2 => {
                    let out_dim = b.shape[1];
                    if b.shape[0] != n {
                        return Err(GradNetError::mismatch("matmul", &a.shape, &b.shape));
                    }
                    if c.grad.len() != m * out_dim {
                        return Err(GradNetError::mismatch(
                            "matmul",
                            &[m * out_dim],
                            &[c.grad.len()],
                        ));
                    }
                    for row in 0..m {
                        let a_row = row * n;
                        let c_row = row * out_dim;
                        for d in 0..n {
                            let a_val = a.data[a_row + d];
                            let b_row = d * out_dim;
                            for col in 0..out_dim {
                                let grad_c = c.grad[c_row + col];
                                da[a_row + d] += grad_c * b.data[b_row + col];
                                db[b_row + col] += a_val * grad_c;
                            }
                        }
                    }
                }
                rank => {
                    return Err(GradNetError::mismatch("matmul rhs rank", &[1, 2], &[rank]))
                }
            }

            (da, db)
        };

        self.add_grad(a_id, &da)?;
        self.add_grad(b_id, &db)
    }

    pub(crate) fn forward_dot(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let sum = {
            let a = self.tensor(a_id)?;
            let b = self.tensor(b_id)?;
            if a.data.len() != b.data.len() {
                return Err(GradNetError::mismatch(
                    "dot",
                    &[a.data.len()],
                    &[b.data.len()],
                ));
            }
            a.data.iter().zip(&b.data).map(|(&x, &y)| x * y).sum()
        };

        self.write_output(out_id, vec![], vec![sum])
    }

    pub(crate) fn backward_dot(
        &mut self,
        a_id: usize,
        b_id: usize,
        out_id: usize,
    ) -> Result<(), GradNetError> {
        let (da, db) = {
            let a = self.tensor(a_id)?;
            let b = self.tensor(b_id)?;
            let grad_out = self.tensor(out_id)?.grad.first().copied().unwrap_or(0.0);

            let da: Vec<_> = b.data.iter().map(|&y| grad_out * y).collect();
            let db: Vec<_> = a.data.iter().map(|&x| grad_out * x).collect();
            (da, db)
        };

        self.add_grad(a_id, &da)?;
        self.add_grad(b_id, &db)
    }
}

#[cfg(test)]
#[path = "linalg_test.rs"]
mod tests;
