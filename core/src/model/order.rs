//! Evaluation order for graph nodes.

use crate::internal::*;
use crate::model::{Graph, NodeId};
use std::collections::{HashMap, VecDeque};

/// Compute a topological order over all nodes with Kahn's algorithm.
///
/// In-degrees are counted off the successor edges; the ready queue is
/// seeded, and later fed, in current node-list order, so the result is a
/// deterministic function of insertion order. A cycle leaves some node
/// forever above zero in-degree and reports as an error.
pub fn eval_order(graph: &Graph) -> CulvertResult<Vec<NodeId>> {
    let nodes = graph.nodes();
    let index_of: HashMap<NodeId, usize> =
        nodes.iter().enumerate().map(|(ix, n)| (n.id(), ix)).collect();
    let mut in_degree = vec![0usize; nodes.len()];
    for node in nodes {
        for succ in node.successors() {
            let succ_ix = *index_of
                .get(succ)
                .with_context(|| format!("successor {} of {} is not in the graph", succ, node))?;
            in_degree[succ_ix] += 1;
        }
    }
    let mut queue: VecDeque<usize> =
        (0..nodes.len()).filter(|&ix| in_degree[ix] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(ix) = queue.pop_front() {
        order.push(nodes[ix].id());
        for succ in nodes[ix].successors() {
            let succ_ix = index_of[succ];
            in_degree[succ_ix] -= 1;
            if in_degree[succ_ix] == 0 {
                queue.push_back(succ_ix);
            }
        }
    }
    if order.len() != nodes.len() {
        debug!("loop detected: only {} of {} nodes orderable", order.len(), nodes.len());
        bail!("graph contains a cycle: only {} of {} nodes orderable", order.len(), nodes.len());
    }
    Ok(order)
}
