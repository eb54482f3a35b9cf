//! Serialized graph IR: tensor definitions, op records in evaluation order,
//! role pointers and the trainable id set, plus the weights-snapshot format.
//!
//! The IR carries no dependency edges; the builder emits a valid forward
//! order and `backward` replays it in exact reverse.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GradNetError;
use crate::tensor::{Scalar, TensorKind};

/// Closed op vocabulary. Tags are resolved once at graph-load time, so an
/// out-of-vocabulary op is a load-time [`GradNetError::UnsupportedOperation`]
/// rather than a per-call string match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Matmul,
    Add,
    Sub,
    Dot,
    Dropout,
    Sigmoid,
    Relu,
    LeakyRelu,
    Mse,
    Mae,
    Mean,
    Softmax,
    CrossEntropy,
    SoftmaxCeLogits,
    SoftmaxCeLogitsLabelInt,
}

impl OpKind {
    pub fn from_tag(tag: &str) -> Result<Self, GradNetError> {
        Ok(match tag {
            "matmul" => OpKind::Matmul,
            "add" => OpKind::Add,
            "sub" => OpKind::Sub,
            "dot" => OpKind::Dot,
            "dropout" => OpKind::Dropout,
            "sig" => OpKind::Sigmoid,
            "relu" | "ReLU" => OpKind::Relu,
            "LReLU" => OpKind::LeakyRelu,
            "MSE" => OpKind::Mse,
            "MAE" => OpKind::Mae,
            "mean" => OpKind::Mean,
            "softmax" => OpKind::Softmax,
            "CE" => OpKind::CrossEntropy,
            "softmax_ce_logits" => OpKind::SoftmaxCeLogits,
            "softmax_ce_logits_label_int" => OpKind::SoftmaxCeLogitsLabelInt,
            other => return Err(GradNetError::UnsupportedOperation(other.to_string())),
        })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            OpKind::Matmul => "matmul",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Dot => "dot",
            OpKind::Dropout => "dropout",
            OpKind::Sigmoid => "sig",
            OpKind::Relu => "relu",
            OpKind::LeakyRelu => "LReLU",
            OpKind::Mse => "MSE",
            OpKind::Mae => "MAE",
            OpKind::Mean => "mean",
            OpKind::Softmax => "softmax",
            OpKind::CrossEntropy => "CE",
            OpKind::SoftmaxCeLogits => "softmax_ce_logits",
            OpKind::SoftmaxCeLogitsLabelInt => "softmax_ce_logits_label_int",
        }
    }

    /// Number of input tensor ids the op record must carry.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::Matmul
            | OpKind::Add
            | OpKind::Sub
            | OpKind::Dot
            | OpKind::CrossEntropy
            | OpKind::SoftmaxCeLogits
            | OpKind::SoftmaxCeLogitsLabelInt => 2,
            OpKind::Dropout
            | OpKind::Sigmoid
            | OpKind::Relu
            | OpKind::LeakyRelu
            | OpKind::Mse
            | OpKind::Mae
            | OpKind::Mean
            | OpKind::Softmax => 1,
        }
    }
}

/// One tensor definition in the serialized IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDef {
    pub id: usize,
    pub kind: TensorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub shape: Vec<usize>,
    /// Explicit initial data; zero-filled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Scalar>>,
}

/// One operation record: tag, ordered input ids (1 or 2), one output id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDef {
    pub id: usize,
    pub op: String,
    pub inputs: Vec<usize>,
    pub output: usize,
}

/// The serialized graph: tensor table, op list in evaluation order, role
/// pointers and trainable set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub tensors: Vec<TensorDef>,
    pub ops: Vec<OpDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trainable: Vec<usize>,
}

impl GraphDef {
    pub fn from_json(json: &str) -> Result<Self, GradNetError> {
        serde_json::from_str(json).map_err(|e| GradNetError::InvalidGraph {
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, GradNetError> {
        serde_json::to_string(self).map_err(|e| GradNetError::InvalidGraph {
            message: e.to_string(),
        })
    }
}

/// Snapshot of trainable tensors: `{tensors: {id: {data, shape}}}`.
/// serde_json writes the integer keys as JSON strings and reads them back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsSnapshot {
    pub tensors: BTreeMap<usize, WeightEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub data: Vec<Scalar>,
    pub shape: Vec<usize>,
}

impl WeightsSnapshot {
    pub fn from_json(json: &str) -> Result<Self, GradNetError> {
        serde_json::from_str(json).map_err(|e| GradNetError::InvalidGraph {
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, GradNetError> {
        serde_json::to_string(self).map_err(|e| GradNetError::InvalidGraph {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
