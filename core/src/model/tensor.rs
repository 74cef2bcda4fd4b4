use crate::internal::*;
use crate::model::NodeId;
use crate::runtime::{Blob, Device};
use itertools::Itertools;

/// Handle of a tensor in its graph, doubling as the tensor's guid: unique
/// within the graph and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u64);

impl fmt::Display for TensorId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "t{}", self.0)
    }
}

/// A tensor: a shape, an element type, and its wiring into the graph.
///
/// Besides the guid, a tensor carries a functional identity (`fuid`) that
/// survives shape edits; shape inference uses it to find the tensor to
/// update in place.
#[derive(Debug, Clone)]
pub struct Tensor {
    guid: TensorId,
    fuid: u64,
    shape: Shape,
    datum_type: DatumType,
    device: Device,
    source: Option<NodeId>,
    targets: TVec<NodeId>,
    blob: Option<Blob>,
}

impl Tensor {
    pub(crate) fn new(
        guid: TensorId,
        fuid: u64,
        shape: Shape,
        datum_type: DatumType,
        device: Device,
    ) -> Tensor {
        Tensor { guid, fuid, shape, datum_type, device, source: None, targets: tvec!(), blob: None }
    }

    pub fn guid(&self) -> TensorId {
        self.guid
    }

    pub fn fuid(&self) -> u64 {
        self.fuid
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn datum_type(&self) -> DatumType {
        self.datum_type
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// The node producing this tensor, if any.
    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    /// The nodes consuming this tensor.
    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    /// The arena view this tensor is bound to, once planned.
    pub fn blob(&self) -> Option<&Blob> {
        self.blob.as_ref()
    }

    /// Bytes needed to store the tensor contiguously, row-major.
    pub fn bytes(&self) -> usize {
        self.datum_type.size_of() * self.shape.iter().product::<usize>()
    }

    pub(crate) fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    pub(crate) fn set_source(&mut self, node: NodeId) {
        self.source = Some(node);
    }

    pub(crate) fn add_target(&mut self, node: NodeId) {
        if !self.targets.contains(&node) {
            self.targets.push(node);
        }
    }

    pub(crate) fn remove_target(&mut self, node: NodeId) {
        self.targets.retain(|t| *t != node);
    }

    pub(crate) fn set_blob(&mut self, blob: Blob) {
        self.blob = Some(blob);
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} {} [{}], fuid {}",
            self.guid,
            self.datum_type,
            self.shape.iter().join(","),
            self.fuid
        )?;
        if let Some(source) = self.source {
            write!(fmt, ", source {}", source)?;
        }
        if !self.targets.is_empty() {
            write!(fmt, ", targets {}", self.targets.iter().join(" "))?;
        }
        Ok(())
    }
}
