use crate::internal::*;
use crate::memory::ArenaAllocator;
use crate::model::{order, Node, NodeId, Tensor, TensorId};
use crate::ops::OpKind;
use crate::runtime::{Blob, CpuRuntime, Device, Runtime};
use itertools::Itertools;
use std::collections::HashMap;

/// A computation graph: the single owner of its tensors and operator nodes.
///
/// Tensors and nodes are created through the graph and addressed by stable
/// id handles. Insertion wires both edge levels at once: tensor-level
/// producer/consumer links and the mirroring operator-level
/// predecessor/successor links. Rewrites mutate both levels together and
/// invalidate the sort flag.
///
/// The intended lifecycle is: build, [`Graph::shape_infer`],
/// [`Graph::optimize`], [`Graph::data_malloc`], then hand the graph over to
/// an executor.
#[derive(Debug)]
pub struct Graph {
    runtime: Arc<dyn Runtime>,
    tensors: Vec<Tensor>,
    nodes: Vec<Node>,
    sorted: bool,
    allocator: ArenaAllocator,
    next_uid: u64,
}

impl Graph {
    pub fn new(runtime: Arc<dyn Runtime>) -> Graph {
        Graph {
            allocator: ArenaAllocator::new(runtime.clone()),
            runtime,
            tensors: vec![],
            nodes: vec![],
            sorted: false,
            next_uid: 0,
        }
    }

    /// A graph over the default host runtime.
    pub fn cpu() -> Graph {
        Graph::new(Arc::new(CpuRuntime))
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn device(&self) -> Device {
        self.runtime.device()
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn allocator(&self) -> &ArenaAllocator {
        &self.allocator
    }

    fn fresh_uid(&mut self) -> u64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    // tensors

    /// Create a tensor owned by this graph.
    pub fn add_tensor(&mut self, shape: impl Into<Shape>, datum_type: DatumType) -> TensorId {
        let uid = self.fresh_uid();
        let tensor = Tensor::new(TensorId(uid), uid, shape.into(), datum_type, self.device());
        let id = tensor.guid();
        self.tensors.push(tensor);
        id
    }

    /// Take a detached tensor out of this graph, keeping its identities, so
    /// another graph can adopt it.
    pub fn detach_tensor(&mut self, id: TensorId) -> CulvertResult<Tensor> {
        let ix = self.tensor_ix(id)?;
        let tensor = &self.tensors[ix];
        ensure!(
            tensor.source().is_none() && tensor.targets().is_empty(),
            "detaching {} while it is still wired",
            tensor
        );
        Ok(self.tensors.remove(ix))
    }

    /// Adopt a tensor created for another graph on the same device.
    pub fn adopt_tensor(&mut self, tensor: Tensor) -> CulvertResult<TensorId> {
        ensure!(
            tensor.device() == self.device(),
            "adopting a tensor on {} into a graph on {}",
            tensor.device(),
            self.device()
        );
        ensure!(
            tensor.source().is_none() && tensor.targets().is_empty(),
            "adopting {} while it is still wired to its previous graph",
            tensor
        );
        ensure!(
            self.tensors.iter().all(|t| t.guid() != tensor.guid()),
            "a tensor with guid {} already lives here",
            tensor.guid()
        );
        ensure!(
            self.tensors.iter().all(|t| t.fuid() != tensor.fuid()),
            "a tensor with fuid {} already lives here",
            tensor.fuid()
        );
        self.next_uid = self.next_uid.max(tensor.guid().0 + 1).max(tensor.fuid() + 1);
        let id = tensor.guid();
        self.tensors.push(tensor);
        Ok(id)
    }

    pub fn tensor(&self, id: TensorId) -> CulvertResult<&Tensor> {
        self.tensors
            .iter()
            .find(|t| t.guid() == id)
            .with_context(|| format!("no tensor {} in this graph", id))
    }

    pub(crate) fn tensor_mut(&mut self, id: TensorId) -> CulvertResult<&mut Tensor> {
        self.tensors
            .iter_mut()
            .find(|t| t.guid() == id)
            .with_context(|| format!("no tensor {} in this graph", id))
    }

    /// Find a tensor by its functional identity.
    pub fn tensor_by_fuid(&self, fuid: u64) -> Option<&Tensor> {
        self.tensors.iter().find(|t| t.fuid() == fuid)
    }

    fn tensor_by_fuid_mut(&mut self, fuid: u64) -> Option<&mut Tensor> {
        self.tensors.iter_mut().find(|t| t.fuid() == fuid)
    }

    fn tensor_ix(&self, id: TensorId) -> CulvertResult<usize> {
        self.tensors
            .iter()
            .position(|t| t.guid() == id)
            .with_context(|| format!("no tensor {} in this graph", id))
    }

    fn has_tensor(&self, id: TensorId) -> bool {
        self.tensors.iter().any(|t| t.guid() == id)
    }

    /// Remove a tensor no live node references anymore.
    pub(crate) fn remove_tensor(&mut self, id: TensorId) -> CulvertResult<()> {
        ensure!(
            self.nodes
                .iter()
                .all(|n| !n.inputs().contains(&id) && !n.outputs().contains(&id)),
            "removing {} while a node still references it",
            id
        );
        let ix = self.tensor_ix(id)?;
        self.tensors.remove(ix);
        Ok(())
    }

    /// Tensors produced outside the graph: no source node.
    pub fn input_tensors(&self) -> Vec<TensorId> {
        self.tensors.iter().filter(|t| t.source().is_none()).map(|t| t.guid()).collect()
    }

    /// Tensors nothing in the graph consumes.
    pub fn output_tensors(&self) -> Vec<TensorId> {
        self.tensors.iter().filter(|t| t.targets().is_empty()).map(|t| t.guid()).collect()
    }

    // nodes

    /// Insert an operator node over existing tensors, wiring tensor-level
    /// and operator-level edges both ways.
    pub fn add_node(
        &mut self,
        op: impl Into<OpKind>,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> CulvertResult<NodeId> {
        let op = op.into();
        op.check_arity(inputs.len(), outputs.len())?;
        for id in inputs.iter().chain(outputs) {
            ensure!(self.has_tensor(*id), "operand {} is not a tensor of this graph", id);
        }
        for id in outputs {
            ensure!(
                self.tensor(*id)?.source().is_none(),
                "tensor {} already has a producer",
                id
            );
        }
        let node_id = NodeId(self.fresh_uid());
        self.sorted = false;
        self.nodes.push(Node::new(node_id, op, inputs.into(), outputs.into()));
        for &input in inputs {
            let source = {
                let tensor = self.tensor_mut(input)?;
                tensor.add_target(node_id);
                tensor.source()
            };
            if let Some(source) = source {
                self.node_mut(source)?.add_successor(node_id);
                self.node_mut(node_id)?.add_predecessor(source);
            }
        }
        for &output in outputs {
            let targets: TVec<NodeId> = {
                let tensor = self.tensor_mut(output)?;
                tensor.set_source(node_id);
                tensor.targets().iter().copied().collect()
            };
            for succ in targets {
                self.node_mut(node_id)?.add_successor(succ);
                self.node_mut(succ)?.add_predecessor(node_id);
            }
        }
        Ok(node_id)
    }

    pub fn node(&self, id: NodeId) -> CulvertResult<&Node> {
        self.nodes
            .iter()
            .find(|n| n.id() == id)
            .with_context(|| format!("no node {} in this graph", id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> CulvertResult<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|n| n.id() == id)
            .with_context(|| format!("no node {} in this graph", id))
    }

    fn has_node(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id() == id)
    }

    /// Remove a node from the node list. The caller has already rerouted
    /// every edge around it.
    pub(crate) fn remove_node(&mut self, id: NodeId) {
        self.nodes.retain(|n| n.id() != id);
        self.sorted = false;
    }

    // passes

    /// Check the structural invariants of the bipartite graph: no isolated
    /// tensor, membership of every cross-reference, reciprocation of both
    /// edge levels, operator edges backed by tensor edges, fuid uniqueness.
    pub fn check_valid(&self) -> CulvertResult<()> {
        for tensor in &self.tensors {
            ensure!(
                tensor.source().is_some() || !tensor.targets().is_empty(),
                "isolated tensor {}",
                tensor
            );
            if let Some(source) = tensor.source() {
                ensure!(self.has_node(source), "{} sourced by foreign node {}", tensor, source);
                ensure!(
                    self.node(source)?.outputs().contains(&tensor.guid()),
                    "{} is not an output of its source {}",
                    tensor,
                    source
                );
                for &target in tensor.targets() {
                    ensure!(
                        self.node(source)?.successors().contains(&target),
                        "tensor edge {} -> {} not mirrored as a successor of {}",
                        tensor.guid(),
                        target,
                        source
                    );
                    ensure!(
                        self.node(target)?.predecessors().contains(&source),
                        "tensor edge {} -> {} not mirrored as a predecessor of {}",
                        tensor.guid(),
                        source,
                        target
                    );
                }
            }
            for &target in tensor.targets() {
                ensure!(self.has_node(target), "{} targeted by foreign node {}", tensor, target);
                ensure!(
                    self.node(target)?.inputs().contains(&tensor.guid()),
                    "{} is not an input of its target {}",
                    tensor,
                    target
                );
            }
        }
        for node in &self.nodes {
            for input in node.inputs() {
                ensure!(self.has_tensor(*input), "{} reads foreign tensor {}", node, input);
                ensure!(
                    self.tensor(*input)?.targets().contains(&node.id()),
                    "{} reads {} without being one of its targets",
                    node,
                    input
                );
            }
            for output in node.outputs() {
                ensure!(self.has_tensor(*output), "{} writes foreign tensor {}", node, output);
                ensure!(
                    self.tensor(*output)?.source() == Some(node.id()),
                    "{} writes {} without being its source",
                    node,
                    output
                );
            }
            for pred in node.predecessors() {
                ensure!(self.has_node(*pred), "{} preceded by foreign node {}", node, pred);
                ensure!(
                    node.inputs()
                        .iter()
                        .any(|t| self.tensor(*t).map(|t| t.source() == Some(*pred)).unwrap_or(false)),
                    "predecessor edge {} -> {} not backed by any tensor",
                    pred,
                    node.id()
                );
            }
            for succ in node.successors() {
                ensure!(self.has_node(*succ), "{} succeeded by foreign node {}", node, succ);
                ensure!(
                    node.outputs()
                        .iter()
                        .any(|t| self.tensor(*t).map(|t| t.targets().contains(succ)).unwrap_or(false)),
                    "successor edge {} -> {} not backed by any tensor",
                    node.id(),
                    succ
                );
            }
        }
        let dups = self.tensors.iter().map(|t| t.fuid()).duplicates().collect_vec();
        ensure!(dups.is_empty(), "duplicate tensor fuid(s): {:?}", dups);
        Ok(())
    }

    /// Reorder the node list topologically. Errors on a cycle, leaving the
    /// list untouched. Idempotent once sorted.
    pub fn topo_sort(&mut self) -> CulvertResult<()> {
        if self.sorted {
            return Ok(());
        }
        let order = order::eval_order(self)?;
        let position: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(ix, id)| (*id, ix)).collect();
        self.nodes.sort_by_key(|n| position[&n.id()]);
        self.sorted = true;
        debug!("topo sort: {}", order.iter().join(" "));
        Ok(())
    }

    /// Propagate shapes forward through the graph.
    ///
    /// Sorts first if needed, then asks each operation for its output shapes
    /// and updates, by fuid, every output tensor whose stored shape differs.
    pub fn shape_infer(&mut self) -> CulvertResult<()> {
        if !self.sorted {
            self.topo_sort()?;
        }
        for ix in 0..self.nodes.len() {
            let (label, input_shapes, output_ids) = {
                let node = &self.nodes[ix];
                let shapes = node
                    .inputs()
                    .iter()
                    .map(|t| Ok(self.tensor(*t)?.shape().iter().copied().collect()))
                    .collect::<CulvertResult<TVec<Shape>>>()?;
                (node.to_string(), shapes, node.outputs().iter().copied().collect::<TVec<_>>())
            };
            let inferred = self.nodes[ix]
                .op_mut()
                .infer_shapes(&input_shapes)
                .ok_or_else(|| format_err!("shape inference failed for {}", label))?;
            ensure!(
                inferred.len() == output_ids.len(),
                "{} inferred {} shapes for {} outputs",
                label,
                inferred.len(),
                output_ids.len()
            );
            for (tensor_id, new_shape) in output_ids.iter().zip(inferred) {
                let fuid = self.tensor(*tensor_id)?.fuid();
                let tensor = self
                    .tensor_by_fuid_mut(fuid)
                    .with_context(|| format!("no tensor with fuid {}", fuid))?;
                if tensor.shape() != new_shape.as_slice() {
                    tensor.set_shape(new_shape);
                }
            }
        }
        Ok(())
    }

    /// Simplify the graph with the rewrite passes, run to fixpoint.
    pub fn optimize(&mut self) -> CulvertResult<()> {
        crate::optim::optimize(self)
    }

    /// Plan one arena slot per tensor, realize the arena, and bind every
    /// tensor to its offset.
    ///
    /// All offsets are collected before realization: realizing freezes the
    /// plan, so no allocation may happen after it.
    pub fn data_malloc(&mut self) -> CulvertResult<()> {
        self.topo_sort()?;
        if self.tensors.is_empty() {
            return Ok(());
        }
        let bytes = self.tensors.iter().map(|t| t.bytes()).collect::<Vec<_>>();
        let mut offsets = Vec::with_capacity(bytes.len());
        for b in bytes {
            offsets.push(self.allocator.alloc(b)?);
        }
        let buffer = self.allocator.realize()?;
        for (tensor, offset) in self.tensors.iter_mut().zip(offsets) {
            tensor.set_blob(Blob::new(buffer.clone(), offset));
        }
        debug!(
            "planned {} tensors: used {} bytes, peak {} bytes",
            self.tensors.len(),
            self.allocator.used(),
            self.allocator.peak()
        );
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "graph tensors:")?;
        for tensor in &self.tensors {
            writeln!(fmt, "  {}", tensor)?;
        }
        writeln!(fmt, "graph nodes:")?;
        for node in &self.nodes {
            writeln!(
                fmt,
                "  {} | pred {} | succ {}",
                node,
                node.predecessors().iter().join(" "),
                node.successors().iter().join(" ")
            )?;
        }
        Ok(())
    }
}
