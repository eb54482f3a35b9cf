use gradnet_core::{GraphDef, OpDef, Scalar, TensorDef, TensorKind};

// Builders shared by the integration suites. allow(dead_code) because each
// test crate compiles its own copy and not all of them use every helper.

#[allow(dead_code)]
pub fn tensor(id: usize, kind: TensorKind, shape: &[usize], data: &[Scalar]) -> TensorDef {
    TensorDef {
        id,
        kind,
        name: None,
        shape: shape.to_vec(),
        data: if data.is_empty() {
            None
        } else {
            Some(data.to_vec())
        },
    }
}

#[allow(dead_code)]
pub fn op(id: usize, tag: &str, inputs: &[usize], output: usize) -> OpDef {
    OpDef {
        id,
        op: tag.to_string(),
        inputs: inputs.to_vec(),
        output,
    }
}

#[allow(dead_code)]
pub fn graph(
    tensors: Vec<TensorDef>,
    ops: Vec<OpDef>,
    loss: Option<usize>,
    output: Option<usize>,
    trainable: Vec<usize>,
) -> GraphDef {
    GraphDef {
        tensors,
        ops,
        loss,
        output,
        trainable,
    }
}
