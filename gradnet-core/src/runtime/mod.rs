//! The graph interpreter: owns the mutable tensor table built from the IR and
//! replays the op list forward and in exact reverse for autodiff.

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::GradNetError;
use crate::graph::{GraphDef, OpKind, WeightEntry, WeightsSnapshot};
use crate::stats::RunStats;
use crate::tensor::{Scalar, TensorKind, TensorRecord};

pub(crate) mod kernels;

/// An op record with its tag already resolved to a kernel pair.
#[derive(Debug, Clone)]
pub(crate) struct Op {
    pub kind: OpKind,
    pub inputs: Vec<usize>,
    pub output: usize,
}

/// Runtime interpreter over a loaded graph.
///
/// The tensor table, op list and role pointers are exclusively owned; there
/// is no sharing across graphs and no concurrent mutation. All compute is
/// single-threaded and synchronous.
#[derive(Debug)]
pub struct Runtime {
    tensors: Vec<TensorRecord>,
    ops: Vec<Op>,
    input_id: Option<usize>,
    target_id: Option<usize>,
    output_id: Option<usize>,
    loss_id: Option<usize>,
    trainable: Vec<usize>,
    /// Backward calls since the last `reset_grad`; optimizers averaging
    /// accumulated gradients divide by `max(1, acc_steps)`.
    acc_steps: u32,
    rng: StdRng,
    stats: RunStats,
}

impl Runtime {
    /// Builds the interpreter from a graph definition. Data buffers come from
    /// the IR or are zero-filled; gradient buffers always start at zero.
    pub fn from_graph(def: &GraphDef) -> Result<Self, GradNetError> {
        Self::build(def, None)
    }

    /// Same, pre-seeding parameters from a prior weights snapshot. A snapshot
    /// entry is merged only on exact id+shape match; otherwise the graph's
    /// own initial data is kept.
    pub fn from_graph_with_weights(
        def: &GraphDef,
        weights: &WeightsSnapshot,
    ) -> Result<Self, GradNetError> {
        Self::build(def, Some(weights))
    }

    fn build(def: &GraphDef, weights: Option<&WeightsSnapshot>) -> Result<Self, GradNetError> {
        let n = def.tensors.len();
        let mut slots: Vec<Option<TensorRecord>> = (0..n).map(|_| None).collect();
        let mut input_id = None;
        let mut target_id = None;

        for t in &def.tensors {
            if t.id >= n {
                return Err(GradNetError::InvalidGraph {
                    message: format!("tensor ids must be dense 0..{}, found id {}", n, t.id),
                });
            }
            if slots[t.id].is_some() {
                return Err(GradNetError::InvalidGraph {
                    message: format!("duplicate tensor id {}", t.id),
                });
            }

            let mut rec = TensorRecord::new(
                t.id,
                t.kind,
                t.name.clone().unwrap_or_default(),
                t.shape.clone(),
                t.data.clone(),
            )?;

            if rec.kind == TensorKind::Param {
                if let Some(snapshot) = weights {
                    if let Some(entry) = snapshot.tensors.get(&t.id) {
                        if entry.shape == rec.shape {
                            rec.data = entry.data.clone();
                        } else {
                            log::warn!(
                                "weights snapshot for tensor {} has shape {:?}, graph expects {:?}; keeping graph data",
                                t.id, entry.shape, rec.shape
                            );
                        }
                    }
                }
            }

            // Last occurrence wins, matching the loader this format comes from.
            match rec.kind {
                TensorKind::Input => input_id = Some(rec.id),
                TensorKind::Target => target_id = Some(rec.id),
                _ => {}
            }

            slots[t.id] = Some(rec);
        }

        let tensors = slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| slot.ok_or(GradNetError::UnknownTensor { id }))
            .collect::<Result<Vec<_>, _>>()?;

        for role_id in [def.loss, def.output].into_iter().flatten() {
            if role_id >= n {
                return Err(GradNetError::UnknownTensor { id: role_id });
            }
        }
        for &id in &def.trainable {
            if id >= n {
                return Err(GradNetError::UnknownTensor { id });
            }
        }

        let mut ops = Vec::with_capacity(def.ops.len());
        for o in &def.ops {
            let kind = OpKind::from_tag(&o.op)?;
            if o.inputs.len() != kind.arity() {
                return Err(GradNetError::InvalidGraph {
                    message: format!(
                        "op '{}' expects {} input(s), got {}",
                        o.op,
                        kind.arity(),
                        o.inputs.len()
                    ),
                });
            }
            for &id in o.inputs.iter().chain(std::iter::once(&o.output)) {
                if id >= n {
                    return Err(GradNetError::UnknownTensor { id });
                }
            }
            ops.push(Op {
                kind,
                inputs: o.inputs.clone(),
                output: o.output,
            });
        }

        debug!(
            "loaded graph: {} tensors, {} ops, {} trainable",
            n,
            ops.len(),
            def.trainable.len()
        );

        Ok(Runtime {
            tensors,
            ops,
            input_id,
            target_id,
            output_id: def.output,
            loss_id: def.loss,
            trainable: def.trainable.clone(),
            acc_steps: 0,
            rng: StdRng::from_entropy(),
            stats: RunStats::new(),
        })
    }

    /// Reseeds the dropout RNG; every other computation is deterministic.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn tensor(&self, id: usize) -> Result<&TensorRecord, GradNetError> {
        self.tensors.get(id).ok_or(GradNetError::UnknownTensor { id })
    }

    pub(crate) fn tensor_mut(&mut self, id: usize) -> Result<&mut TensorRecord, GradNetError> {
        self.tensors
            .get_mut(id)
            .ok_or(GradNetError::UnknownTensor { id })
    }

    pub fn shape(&self, id: usize) -> Result<&[usize], GradNetError> {
        Ok(&self.tensor(id)?.shape)
    }

    pub fn data(&self, id: usize) -> Result<&[Scalar], GradNetError> {
        Ok(&self.tensor(id)?.data)
    }

    pub fn grad(&self, id: usize) -> Result<&[Scalar], GradNetError> {
        Ok(&self.tensor(id)?.grad)
    }

    pub fn trainable(&self) -> &[usize] {
        &self.trainable
    }

    pub fn acc_steps(&self) -> u32 {
        self.acc_steps
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    fn role(&self, role: &str, id: Option<usize>) -> Result<usize, GradNetError> {
        id.ok_or_else(|| GradNetError::MissingRole {
            role: role.to_string(),
        })
    }

    /// Replaces the input tensor's data. The buffer length is fixed by the
    /// graph; anything else is a `DimensionMismatch`.
    pub fn set_input(&mut self, x: &[Scalar]) -> Result<(), GradNetError> {
        let id = self.role("input", self.input_id)?;
        Self::fill_data(&mut self.tensors[id], "set_input", x)
    }

    /// Replaces the target tensor's data, same length rule as `set_input`.
    pub fn set_target(&mut self, y: &[Scalar]) -> Result<(), GradNetError> {
        let id = self.role("target", self.target_id)?;
        Self::fill_data(&mut self.tensors[id], "set_target", y)
    }

    fn fill_data(
        tensor: &mut TensorRecord,
        operation: &str,
        values: &[Scalar],
    ) -> Result<(), GradNetError> {
        if tensor.data.len() != values.len() {
            return Err(GradNetError::mismatch(
                operation,
                &[tensor.data.len()],
                &[values.len()],
            ));
        }
        tensor.data.copy_from_slice(values);
        Ok(())
    }

    /// Loss tensor data; rank-2 losses leave one un-batch-averaged entry per
    /// row (the graph inserts an explicit `mean` op to fully reduce).
    pub fn loss(&self) -> Result<&[Scalar], GradNetError> {
        let id = self.role("loss", self.loss_id)?;
        Ok(&self.tensors[id].data)
    }

    /// Scalar training error: the mean over the loss buffer.
    pub fn error(&self) -> Result<Scalar, GradNetError> {
        let loss = self.loss()?;
        if loss.len() > 1 {
            Ok(loss.iter().sum::<Scalar>() / loss.len() as Scalar)
        } else {
            Ok(loss.first().copied().unwrap_or(0.0))
        }
    }

    pub fn output(&self) -> Result<Vec<Scalar>, GradNetError> {
        let id = self.role("output", self.output_id)?;
        Ok(self.tensors[id].data.clone())
    }

    /// `set_input` + `forward` + `output` in one call.
    pub fn predict(&mut self, x: &[Scalar]) -> Result<Vec<Scalar>, GradNetError> {
        self.set_input(x)?;
        self.forward()?;
        self.output()
    }

    /// Zeroes every tensor's gradient and restarts gradient accumulation.
    pub fn reset_grad(&mut self) {
        for t in &mut self.tensors {
            t.zero_grad();
        }
        self.acc_steps = 0;
    }

    /// Replays the op list in stored order, dispatching each record to its
    /// forward kernel. Output shape and data are rewritten per op.
    pub fn forward(&mut self) -> Result<(), GradNetError> {
        trace!("forward pass over {} ops", self.ops.len());
        for i in 0..self.ops.len() {
            let op = self.ops[i].clone();
            self.stats.op_invocations += 1;
            self.dispatch_forward(&op)?;
        }
        self.stats.forward_passes += 1;
        Ok(())
    }

    /// Reverse-mode pass: zero the gradient of every non-parameter tensor
    /// (parameters keep accumulating across calls), seed the loss gradient
    /// with 1.0 per element, then replay the op list in exact reverse with
    /// each backward kernel adding into its inputs' gradients.
    pub fn backward(&mut self) -> Result<(), GradNetError> {
        let loss_id = self.role("loss", self.loss_id)?;
        trace!("backward pass over {} ops", self.ops.len());

        for t in &mut self.tensors {
            if t.kind != TensorKind::Param {
                t.zero_grad();
            }
        }

        let loss = &mut self.tensors[loss_id];
        loss.grad = vec![1.0; loss.data.len()];

        for i in (0..self.ops.len()).rev() {
            let op = self.ops[i].clone();
            self.stats.op_invocations += 1;
            self.dispatch_backward(&op)?;
        }

        self.acc_steps += 1;
        self.stats.backward_passes += 1;
        Ok(())
    }

    /// Snapshot of the trainable tensors in the external wire format.
    pub fn weights_snapshot(&self) -> WeightsSnapshot {
        let mut snapshot = WeightsSnapshot::default();
        for &id in &self.trainable {
            if let Some(t) = self.tensors.get(id) {
                snapshot.tensors.insert(
                    id,
                    WeightEntry {
                        data: t.data.clone(),
                        shape: t.shape.clone(),
                    },
                );
            }
        }
        snapshot
    }

    /// Split borrow for optimizers: mutable parameter data, immutable grad.
    pub(crate) fn param_update(
        &mut self,
        id: usize,
    ) -> Result<(&mut [Scalar], &[Scalar]), GradNetError> {
        let t = self
            .tensors
            .get_mut(id)
            .ok_or(GradNetError::UnknownTensor { id })?;
        Ok((&mut t.data, &t.grad))
    }

    /// Accumulates a gradient contribution into a tensor. Kernels always add,
    /// never assign: a tensor may feed multiple ops.
    pub(crate) fn add_grad(&mut self, id: usize, contrib: &[Scalar]) -> Result<(), GradNetError> {
        let t = self.tensor_mut(id)?;
        if t.grad.len() != contrib.len() {
            return Err(GradNetError::mismatch(
                "gradient accumulation",
                &[t.grad.len()],
                &[contrib.len()],
            ));
        }
        for (g, c) in t.grad.iter_mut().zip(contrib) {
            *g += *c;
        }
        Ok(())
    }

    pub(crate) fn write_output(
        &mut self,
        id: usize,
        shape: Vec<usize>,
        data: Vec<Scalar>,
    ) -> Result<(), GradNetError> {
        self.tensor_mut(id)?.set_output(shape, data);
        Ok(())
    }

    fn dispatch_forward(&mut self, op: &Op) -> Result<(), GradNetError> {
        let out = op.output;
        let a = op.inputs[0];
        match op.kind {
            OpKind::Matmul => self.forward_matmul(a, op.inputs[1], out),
            OpKind::Add => self.forward_add(a, op.inputs[1], out),
            OpKind::Sub => self.forward_sub(a, op.inputs[1], out),
            OpKind::Dot => self.forward_dot(a, op.inputs[1], out),
            OpKind::Dropout => self.forward_dropout(a, out),
            OpKind::Sigmoid => self.forward_sigmoid(a, out),
            OpKind::Relu => self.forward_relu(a, out),
            OpKind::LeakyRelu => self.forward_leaky_relu(a, out),
            OpKind::Mse => self.forward_mse(a, out),
            OpKind::Mae => self.forward_mae(a, out),
            OpKind::Mean => self.forward_mean(a, out),
            OpKind::Softmax => self.forward_softmax(a, out),
            OpKind::CrossEntropy => self.forward_cross_entropy(a, op.inputs[1], out),
            OpKind::SoftmaxCeLogits => self.forward_softmax_ce_logits(a, op.inputs[1], out),
            OpKind::SoftmaxCeLogitsLabelInt => {
                self.forward_softmax_ce_logits_label_int(a, op.inputs[1], out)
            }
        }
    }

    fn dispatch_backward(&mut self, op: &Op) -> Result<(), GradNetError> {
        let out = op.output;
        let a = op.inputs[0];
        match op.kind {
            OpKind::Matmul => self.backward_matmul(a, op.inputs[1], out),
            OpKind::Add => self.backward_add(a, op.inputs[1], out),
            OpKind::Sub => self.backward_sub(a, op.inputs[1], out),
            OpKind::Dot => self.backward_dot(a, op.inputs[1], out),
            OpKind::Dropout => self.backward_dropout(a, out),
            OpKind::Sigmoid => self.backward_sigmoid(a, out),
            OpKind::Relu => self.backward_relu(a, out),
            OpKind::LeakyRelu => self.backward_leaky_relu(a, out),
            OpKind::Mse => self.backward_mse(a, out),
            OpKind::Mae => self.backward_mae(a, out),
            OpKind::Mean => self.backward_mean(a, out),
            OpKind::Softmax => self.backward_softmax(a, out),
            OpKind::CrossEntropy => self.backward_cross_entropy(a, op.inputs[1], out),
            OpKind::SoftmaxCeLogits => self.backward_softmax_ce_logits(a, op.inputs[1], out),
            OpKind::SoftmaxCeLogitsLabelInt => {
                self.backward_softmax_ce_logits_label_int(a, op.inputs[1], out)
            }
        }
    }
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
