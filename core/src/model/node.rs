use crate::internal::*;
use crate::model::TensorId;
use crate::ops::OpKind;
use itertools::Itertools;

/// Handle of an operator node in its graph; unique and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "n{}", self.0)
    }
}

/// An operator node: an operation, its ordered operand lists, and the
/// operator-level neighbourhood mirroring the tensor-level edges.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    op: OpKind,
    inputs: TVec<TensorId>,
    outputs: TVec<TensorId>,
    predecessors: TVec<NodeId>,
    successors: TVec<NodeId>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        op: OpKind,
        inputs: TVec<TensorId>,
        outputs: TVec<TensorId>,
    ) -> Node {
        Node { id, op, inputs, outputs, predecessors: tvec!(), successors: tvec!() }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &OpKind {
        &self.op
    }

    pub(crate) fn op_mut(&mut self) -> &mut OpKind {
        &mut self.op
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn predecessors(&self) -> &[NodeId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    pub(crate) fn add_predecessor(&mut self, node: NodeId) {
        if !self.predecessors.contains(&node) {
            self.predecessors.push(node);
        }
    }

    pub(crate) fn add_successor(&mut self, node: NodeId) {
        if !self.successors.contains(&node) {
            self.successors.push(node);
        }
    }

    pub(crate) fn remove_predecessor(&mut self, node: NodeId) {
        self.predecessors.retain(|n| *n != node);
    }

    pub(crate) fn remove_successor(&mut self, node: NodeId) {
        self.successors.retain(|n| *n != node);
    }

    /// Rewrite every input slot holding `old` to `new`.
    pub(crate) fn replace_input(&mut self, old: TensorId, new: TensorId) {
        for slot in self.inputs.iter_mut() {
            if *slot == old {
                *slot = new;
            }
        }
    }

    /// Rewrite one input slot.
    pub(crate) fn set_input(&mut self, slot: usize, tensor: TensorId) {
        self.inputs[slot] = tensor;
    }
}

impl fmt::Display for Node {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} {}({}) -> ({})",
            self.id,
            self.op,
            self.inputs.iter().join(", "),
            self.outputs.iter().join(", ")
        )
    }
}
