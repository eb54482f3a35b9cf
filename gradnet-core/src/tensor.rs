use serde::{Deserialize, Serialize};

use crate::error::GradNetError;

/// Element type used by every buffer in the runtime.
///
/// The reference implementation computes in double precision; gradients are
/// also checked against finite differences, which wants the headroom.
pub type Scalar = f64;

/// Role tag of a tensor inside a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorKind {
    Input,
    Target,
    Param,
    Intermediate,
    Loss,
}

/// Number of elements implied by a shape. Rank 0 (and degenerate shapes)
/// still occupy one slot, so buffers are never empty.
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product::<usize>().max(1)
}

/// One entry of the interpreter's tensor table: numeric buffer, gradient
/// buffer, shape and role. No behavior beyond invariant upkeep.
///
/// Invariant: `data.len() == grad.len() == numel(&shape)` at all times.
/// Shape, kind and id are immutable after graph construction except that
/// kernels may rewrite an output's shape together with its data.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRecord {
    pub id: usize,
    pub name: String,
    pub kind: TensorKind,
    pub shape: Vec<usize>,
    pub data: Vec<Scalar>,
    pub grad: Vec<Scalar>,
}

impl TensorRecord {
    /// Builds a record, zero-filling `data` when none is supplied and always
    /// starting `grad` at zero.
    pub fn new(
        id: usize,
        kind: TensorKind,
        name: String,
        shape: Vec<usize>,
        data: Option<Vec<Scalar>>,
    ) -> Result<Self, GradNetError> {
        let size = numel(&shape);
        let data = match data {
            Some(d) => {
                if d.len() != size {
                    return Err(GradNetError::mismatch("tensor load", &[size], &[d.len()]));
                }
                d
            }
            None => vec![0.0; size],
        };

        Ok(TensorRecord {
            id,
            name,
            kind,
            shape,
            data,
            grad: vec![0.0; size],
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Rewrites shape and data from a forward kernel, keeping the gradient
    /// buffer sized in step. Existing grad contents survive when the length
    /// is unchanged; `backward` re-zeroes what it needs anyway.
    pub(crate) fn set_output(&mut self, shape: Vec<usize>, data: Vec<Scalar>) {
        debug_assert_eq!(numel(&shape), data.len());
        self.shape = shape;
        self.data = data;
        if self.grad.len() != self.data.len() {
            self.grad = vec![0.0; self.data.len()];
        }
    }

    pub(crate) fn zero_grad(&mut self) {
        if self.grad.len() != self.data.len() {
            self.grad = vec![0.0; self.data.len()];
        } else {
            self.grad.iter_mut().for_each(|g| *g = 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numel_counts_elements_and_never_zero() {
        assert_eq!(numel(&[]), 1);
        assert_eq!(numel(&[4]), 4);
        assert_eq!(numel(&[2, 3]), 6);
        assert_eq!(numel(&[0]), 1);
    }

    #[test]
    fn new_zero_fills_and_sizes_grad() {
        let t = TensorRecord::new(0, TensorKind::Param, String::new(), vec![2, 2], None).unwrap();
        assert_eq!(t.data, vec![0.0; 4]);
        assert_eq!(t.grad, vec![0.0; 4]);
    }

    #[test]
    fn new_rejects_wrong_data_length() {
        let err = TensorRecord::new(
            0,
            TensorKind::Input,
            String::new(),
            vec![3],
            Some(vec![1.0, 2.0]),
        )
        .unwrap_err();
        assert!(matches!(err, GradNetError::DimensionMismatch { .. }));
    }

    #[test]
    fn set_output_keeps_grad_length_in_step() {
        let mut t = TensorRecord::new(0, TensorKind::Intermediate, String::new(), vec![2], None)
            .unwrap();
        t.set_output(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.grad.len(), 4);
        t.set_output(vec![], vec![7.0]);
        assert_eq!(t.grad.len(), 1);
    }
}
