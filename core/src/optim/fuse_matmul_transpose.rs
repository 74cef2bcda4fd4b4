//! Absorption of a last-two-axes transpose into a matmul operand flag.

use crate::internal::*;
use crate::model::{Graph, NodeId};
use crate::ops::OpKind;

/// Fold the first eligible feeding transpose into its matmul's implicit
/// transposition flag. Returns `true` when one was folded.
pub(super) fn rewrite_once(graph: &mut Graph) -> CulvertResult<bool> {
    let Some((matmul, slot, transpose)) = find_candidate(graph) else {
        return Ok(false);
    };
    apply(graph, matmul, slot, transpose)?;
    Ok(true)
}

fn find_candidate(graph: &Graph) -> Option<(NodeId, usize, NodeId)> {
    for node in graph.nodes() {
        if !matches!(node.op(), OpKind::MatMul(_)) {
            continue;
        }
        // a tensor read twice by the matmul cannot be folded slot-wise
        if node.inputs()[0] == node.inputs()[1] {
            continue;
        }
        for slot in 0..2 {
            let Ok(tensor) = graph.tensor(node.inputs()[slot]) else { continue };
            let Some(source) = tensor.source() else { continue };
            let Ok(source_node) = graph.node(source) else { continue };
            let OpKind::Transpose(transpose) = source_node.op() else { continue };
            // the transposed tensor must feed this matmul and nothing else
            if tensor.targets().len() != 1 || tensor.targets()[0] != node.id() {
                continue;
            }
            if tensor.rank() < 2 || !transpose.swaps_only_last_two() {
                continue;
            }
            return Some((node.id(), slot, source));
        }
    }
    None
}

fn apply(graph: &mut Graph, matmul: NodeId, slot: usize, transpose: NodeId) -> CulvertResult<()> {
    debug!("fuse-matmul-transpose: {} into slot {} of {}", graph.node(transpose)?, slot, graph.node(matmul)?);
    let transposed = graph.node(matmul)?.inputs()[slot];
    let bypass = graph.node(transpose)?.inputs()[0];
    let bypass_source = graph.tensor(bypass)?.source();

    match graph.node_mut(matmul)?.op_mut() {
        OpKind::MatMul(op) => {
            if slot == 0 {
                op.trans_a = !op.trans_a;
            } else {
                op.trans_b = !op.trans_b;
            }
        }
        _ => bail!("fuse-matmul-transpose aimed at non-matmul node {}", matmul),
    }
    // the matmul reads the transpose's input directly
    graph.node_mut(matmul)?.set_input(slot, bypass);
    graph.tensor_mut(bypass)?.add_target(matmul);
    graph.tensor_mut(bypass)?.remove_target(transpose);
    graph.tensor_mut(transposed)?.remove_target(matmul);
    graph.node_mut(matmul)?.remove_predecessor(transpose);
    if let Some(source) = bypass_source {
        graph.node_mut(source)?.remove_successor(transpose);
        graph.node_mut(source)?.add_successor(matmul);
        graph.node_mut(matmul)?.add_predecessor(source);
    }
    graph.remove_node(transpose);
    graph.remove_tensor(transposed)?;
    Ok(())
}
