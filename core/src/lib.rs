//! # culvert-core
//!
//! A small CPU-targeted inference-graph core. culvert owns an in-memory
//! computation graph of tensors and operator nodes, checks its structural
//! invariants, propagates tensor shapes forward, simplifies the graph with a
//! fixed set of peephole rewrites, and plans every tensor into one
//! contiguous arena that is allocated exactly once, right before execution.
//!
//! Kernels and the runtime that executes scheduled operators live elsewhere;
//! this crate stops at a graph whose tensors are all bound to offsets inside
//! a single realized buffer.
//!
//! ## Example
//!
//! ```
//! use culvert_core::prelude::*;
//!
//! let mut graph = Graph::cpu();
//! let a = graph.add_tensor(tvec![8, 4], DatumType::F32);
//! let b = graph.add_tensor(tvec![8, 5], DatumType::F32);
//! let a_t = graph.add_tensor(tvec![4, 8], DatumType::F32);
//! let out = graph.add_tensor(tvec![4, 5], DatumType::F32);
//! graph.add_node(Transpose::new(tvec![1, 0]), &[a], &[a_t])?;
//! graph.add_node(MatMul::new(false, false), &[a_t, b], &[out])?;
//!
//! graph.shape_infer()?;
//! // the transpose is absorbed into the matmul as an implicit transposition
//! graph.optimize()?;
//! // one backing buffer for the whole graph, each tensor bound at an offset
//! graph.data_malloc()?;
//!
//! assert!(graph.check_valid().is_ok());
//! assert_eq!(graph.tensor(out)?.shape(), &[4, 5]);
//! # Ok::<(), CulvertError>(())
//! ```

#[macro_use]
extern crate log;

pub mod broadcast;
pub mod internal;
pub mod memory;
pub mod model;
pub mod ops;
pub mod optim;
pub mod runtime;
pub mod shape;

pub mod prelude {
    pub use crate::memory::ArenaAllocator;
    pub use crate::model::{Graph, Node, NodeId, Tensor, TensorId};
    pub use crate::ops::{MatMul, OpKind, Opaque, Transpose};
    pub use crate::runtime::{Blob, Buffer, CpuRuntime, Device, Runtime};
    pub use culvert_data::prelude::*;
}
