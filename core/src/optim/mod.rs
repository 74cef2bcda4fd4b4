//! Graph rewriting: a small closed set of peephole simplifications.
//!
//! Each pass scans the node list from the top, applies the first match, and
//! rescans from the top until a full scan changes nothing. Every successful
//! application removes at least one node, so the fixpoint is reached in at
//! most as many applications as there are nodes.

mod cancel_transpose;
mod fuse_matmul_transpose;

use crate::internal::*;
use crate::model::Graph;

/// Run every rewrite pass to fixpoint, in order.
pub fn optimize(graph: &mut Graph) -> CulvertResult<()> {
    run_to_fixpoint(graph, "cancel-transpose", cancel_transpose::rewrite_once)?;
    run_to_fixpoint(graph, "fuse-matmul-transpose", fuse_matmul_transpose::rewrite_once)?;
    Ok(())
}

fn run_to_fixpoint(
    graph: &mut Graph,
    name: &str,
    rule: fn(&mut Graph) -> CulvertResult<bool>,
) -> CulvertResult<()> {
    let mut applications = 0usize;
    while rule(graph)? {
        applications += 1;
    }
    if applications > 0 {
        debug!("{}: {} application(s)", name, applications);
    }
    Ok(())
}
