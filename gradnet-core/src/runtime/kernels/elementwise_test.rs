use crate::error::GradNetError;
use crate::graph::{GraphDef, TensorDef};
use crate::runtime::Runtime;
use crate::tensor::{Scalar, TensorKind};

fn runtime(tensors: &[(&[usize], &[Scalar])]) -> Runtime {
    let defs = tensors
        .iter()
        .enumerate()
        .map(|(id, (shape, data))| TensorDef {
            id,
            kind: TensorKind::Intermediate,
            name: None,
            shape: shape.to_vec(),
            data: if data.is_empty() {
                None
            } else {
                Some(data.to_vec())
            },
        })
        .collect();
    Runtime::from_graph(&GraphDef {
        tensors: defs,
        ops: vec![],
        loss: None,
        output: None,
        trainable: vec![],
    })
    .unwrap()
}

fn seed_grad(rt: &mut Runtime, id: usize, grad: &[Scalar]) {
    rt.tensor_mut(id).unwrap().grad = grad.to_vec();
}

#[test]
fn elementwise_add_and_sub() {
    let mut rt = runtime(&[
        (&[3], &[1.0, 2.0, 3.0]),
        (&[3], &[10.0, 20.0, 30.0]),
        (&[3], &[]),
    ]);
    rt.forward_add(0, 1, 2).unwrap();
    assert_eq!(rt.data(2).unwrap(), &[11.0, 22.0, 33.0]);
    rt.forward_sub(0, 1, 2).unwrap();
    assert_eq!(rt.data(2).unwrap(), &[-9.0, -18.0, -27.0]);
}

#[test]
fn row_broadcast_add() {
    // [2,2] + [2] bias
    let mut rt = runtime(&[
        (&[2, 2], &[1.0, 2.0, 3.0, 4.0]),
        (&[2], &[10.0, 20.0]),
        (&[2, 2], &[]),
    ]);
    rt.forward_add(0, 1, 2).unwrap();
    assert_eq!(rt.shape(2).unwrap(), &[2, 2]);
    assert_eq!(rt.data(2).unwrap(), &[11.0, 22.0, 13.0, 24.0]);
}

#[test]
fn broadcast_backward_sums_rows() {
    let mut rt = runtime(&[
        (&[2, 2], &[1.0, 2.0, 3.0, 4.0]),
        (&[2], &[10.0, 20.0]),
        (&[2, 2], &[]),
    ]);
    rt.forward_add(0, 1, 2).unwrap();
    seed_grad(&mut rt, 2, &[1.0, 2.0, 3.0, 4.0]);
    rt.backward_add(0, 1, 2).unwrap();

    assert_eq!(rt.grad(0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(rt.grad(1).unwrap(), &[4.0, 6.0]);
}

#[test]
fn sub_backward_negates_rhs() {
    let mut rt = runtime(&[
        (&[2], &[5.0, 5.0]),
        (&[2], &[1.0, 1.0]),
        (&[2], &[]),
    ]);
    rt.forward_sub(0, 1, 2).unwrap();
    seed_grad(&mut rt, 2, &[1.0, 2.0]);
    rt.backward_sub(0, 1, 2).unwrap();

    assert_eq!(rt.grad(0).unwrap(), &[1.0, 2.0]);
    assert_eq!(rt.grad(1).unwrap(), &[-1.0, -2.0]);
}

#[test]
fn shared_operand_accumulates_both_sides() {
    // x + x: both adjoints land on the same tensor.
    let mut rt = runtime(&[(&[2], &[1.0, 2.0]), (&[2], &[])]);
    rt.forward_add(0, 0, 1).unwrap();
    assert_eq!(rt.data(1).unwrap(), &[2.0, 4.0]);

    seed_grad(&mut rt, 1, &[1.0, 1.0]);
    rt.backward_add(0, 0, 1).unwrap();
    assert_eq!(rt.grad(0).unwrap(), &[2.0, 2.0]);
}

#[test]
fn length_mismatch_rejected() {
    let mut rt = runtime(&[(&[2], &[0.0; 2]), (&[3], &[0.0; 3]), (&[3], &[])]);
    let err = rt.forward_add(0, 1, 2).unwrap_err();
    assert!(matches!(err, GradNetError::DimensionMismatch { .. }));

    let err = rt.forward_sub(0, 1, 2).unwrap_err();
    assert!(matches!(err, GradNetError::DimensionMismatch { .. }));
}

#[test]
fn broadcast_dim_mismatch_rejected() {
    let mut rt = runtime(&[
        (&[2, 3], &[0.0; 6]),
        (&[2], &[0.0; 2]),
        (&[2, 3], &[]),
    ]);
    let err = rt.forward_add(0, 1, 2).unwrap_err();
    assert!(matches!(err, GradNetError::DimensionMismatch { .. }));
}
