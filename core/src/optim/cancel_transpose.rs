//! Elimination of transpose pairs composing to the identity.

use crate::internal::*;
use crate::model::{Graph, NodeId};
use crate::ops::OpKind;

/// Bypass and drop the first transpose whose single successor is its
/// inverse transpose. Returns `true` when a pair was dropped.
pub(super) fn rewrite_once(graph: &mut Graph) -> CulvertResult<bool> {
    let Some((first, second)) = find_inverse_pair(graph) else {
        return Ok(false);
    };
    apply(graph, first, second)?;
    Ok(true)
}

fn find_inverse_pair(graph: &Graph) -> Option<(NodeId, NodeId)> {
    for node in graph.nodes() {
        let OpKind::Transpose(perm) = node.op() else { continue };
        if node.successors().len() != 1 {
            continue;
        }
        let succ_id = node.successors()[0];
        let Ok(succ) = graph.node(succ_id) else { continue };
        let OpKind::Transpose(succ_perm) = succ.op() else { continue };
        if perm.is_inverse_of(succ_perm) {
            return Some((node.id(), succ_id));
        }
    }
    None
}

fn apply(graph: &mut Graph, first: NodeId, second: NodeId) -> CulvertResult<()> {
    debug!("cancel-transpose: {} then {}", graph.node(first)?, graph.node(second)?);
    let input = graph.node(first)?.inputs()[0];
    let intermediate = graph.node(first)?.outputs()[0];
    let output = graph.node(second)?.outputs()[0];
    let source = graph.tensor(input)?.source();
    let consumers: TVec<NodeId> = graph.tensor(output)?.targets().iter().copied().collect();

    // everything reading the pair's output now reads its input
    for &consumer in &consumers {
        graph.node_mut(consumer)?.replace_input(output, input);
        graph.tensor_mut(input)?.add_target(consumer);
    }
    graph.tensor_mut(input)?.remove_target(first);
    // the input's producer, when there is one, precedes the consumers directly
    if let Some(source) = source {
        graph.node_mut(source)?.remove_successor(first);
        for &consumer in &consumers {
            graph.node_mut(source)?.add_successor(consumer);
            graph.node_mut(consumer)?.add_predecessor(source);
        }
    }
    for &consumer in &consumers {
        graph.node_mut(consumer)?.remove_predecessor(second);
    }
    graph.remove_node(first);
    graph.remove_node(second);
    graph.remove_tensor(intermediate)?;
    graph.remove_tensor(output)?;
    Ok(())
}
