//! Core of the GradNet training substrate: a serializable computational-graph
//! IR, an interpreter that runs forward evaluation and reverse-mode autodiff
//! over it, and gradient-based optimizers that consume the result.
//!
//! The IR is produced by an external builder and carries tensors, an ordered
//! op list and designated roles (input, target, output, loss, trainable set).
//! [`Runtime`] owns one mutable tensor table built from the IR; every training
//! step is `set_input`/`set_target` → `reset_grad` → `forward` → `backward` →
//! optimizer `step`.

pub mod error;
pub mod graph;
pub mod optim;
pub mod runtime;
pub mod stats;
pub mod tensor;

pub use error::GradNetError;
pub use graph::{GraphDef, OpDef, OpKind, TensorDef, WeightEntry, WeightsSnapshot};
pub use optim::{Adam, Fixed, Optimizer, OptimizerConfig, OptimizerParams};
pub use runtime::Runtime;
pub use stats::RunStats;
pub use tensor::{numel, Scalar, TensorKind, TensorRecord};
