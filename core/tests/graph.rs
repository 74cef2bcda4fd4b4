//! End-to-end pipeline tests: build, infer, simplify, plan.

use culvert_core::prelude::*;

fn relu() -> Opaque {
    Opaque::elementwise("Relu")
}

/// X -> Transpose -> Y -> inverse Transpose -> Z -> Relu -> out collapses to
/// X -> Relu -> out.
#[test]
fn inverse_transposes_cancel() {
    let mut graph = Graph::cpu();
    let x = graph.add_tensor(tvec![2, 3, 4], DatumType::F32);
    let y = graph.add_tensor(tvec![3, 2, 4], DatumType::F32);
    let z = graph.add_tensor(tvec![2, 3, 4], DatumType::F32);
    let out = graph.add_tensor(tvec![2, 3, 4], DatumType::F32);
    graph.add_node(Transpose::new(tvec![1, 0, 2]), &[x], &[y]).unwrap();
    graph.add_node(Transpose::new(tvec![1, 0, 2]), &[y], &[z]).unwrap();
    let activation = graph.add_node(relu(), &[z], &[out]).unwrap();

    graph.shape_infer().unwrap();
    graph.optimize().unwrap();
    graph.check_valid().unwrap();

    assert_eq!(graph.nodes().len(), 1);
    assert_eq!(graph.tensors().len(), 2);
    assert!(graph.tensor(y).is_err());
    assert!(graph.tensor(z).is_err());
    let activation = graph.node(activation).unwrap();
    assert_eq!(activation.inputs(), &[x]);
    assert_eq!(graph.tensor(x).unwrap().targets(), &[activation.id()]);
    graph.shape_infer().unwrap();
    assert_eq!(graph.tensor(out).unwrap().shape(), &[2, 3, 4]);
}

/// A transpose of the last two axes feeding only a matmul folds into the
/// matmul's implicit-transposition flag.
#[test]
fn transpose_folds_into_matmul() {
    let mut graph = Graph::cpu();
    let a = graph.add_tensor(tvec![8, 4], DatumType::F32);
    let b = graph.add_tensor(tvec![8, 5], DatumType::F32);
    let a_t = graph.add_tensor(tvec![4, 8], DatumType::F32);
    let out = graph.add_tensor(tvec![4, 5], DatumType::F32);
    graph.add_node(Transpose::new(tvec![1, 0]), &[a], &[a_t]).unwrap();
    let matmul = graph.add_node(MatMul::new(false, false), &[a_t, b], &[out]).unwrap();

    graph.optimize().unwrap();
    graph.check_valid().unwrap();

    assert_eq!(graph.nodes().len(), 1);
    assert!(graph.tensor(a_t).is_err());
    let node = graph.node(matmul).unwrap();
    assert_eq!(node.inputs(), &[a, b]);
    let op = node.op().as_matmul().unwrap();
    assert!(op.trans_a);
    assert!(!op.trans_b);

    graph.shape_infer().unwrap();
    assert_eq!(graph.tensor(out).unwrap().shape(), &[4, 5]);
    assert_eq!(graph.node(matmul).unwrap().op().as_matmul().unwrap().mnk(), (4, 5, 8));
}

/// A transpose with more than one consumer stays put.
#[test]
fn shared_transpose_is_not_folded() {
    let mut graph = Graph::cpu();
    let a = graph.add_tensor(tvec![8, 4], DatumType::F32);
    let b = graph.add_tensor(tvec![8, 5], DatumType::F32);
    let a_t = graph.add_tensor(tvec![4, 8], DatumType::F32);
    let out = graph.add_tensor(tvec![4, 5], DatumType::F32);
    let side = graph.add_tensor(tvec![4, 8], DatumType::F32);
    graph.add_node(Transpose::new(tvec![1, 0]), &[a], &[a_t]).unwrap();
    graph.add_node(MatMul::new(false, false), &[a_t, b], &[out]).unwrap();
    graph.add_node(relu(), &[a_t], &[side]).unwrap();

    graph.optimize().unwrap();
    graph.check_valid().unwrap();
    assert_eq!(graph.nodes().len(), 3);
    assert!(graph.tensor(a_t).is_ok());
}

/// A transpose that moves more than the last two axes stays put.
#[test]
fn general_permutation_is_not_folded() {
    let mut graph = Graph::cpu();
    let a = graph.add_tensor(tvec![5, 4, 8], DatumType::F32);
    let b = graph.add_tensor(tvec![4, 8, 6], DatumType::F32);
    let a_p = graph.add_tensor(tvec![4, 8, 5], DatumType::F32);
    let out = graph.add_tensor(tvec![4, 8, 6], DatumType::F32);
    graph.add_node(Transpose::new(tvec![1, 2, 0]), &[a], &[a_p]).unwrap();
    graph.add_node(MatMul::new(false, false), &[a_p, b], &[out]).unwrap();

    graph.optimize().unwrap();
    graph.check_valid().unwrap();
    assert_eq!(graph.nodes().len(), 2);
}

/// Optimization reaches a fixpoint: a second run is a no-op.
#[test]
fn optimize_is_idempotent() {
    let mut graph = Graph::cpu();
    let x = graph.add_tensor(tvec![2, 3, 4], DatumType::F32);
    let y = graph.add_tensor(tvec![3, 2, 4], DatumType::F32);
    let z = graph.add_tensor(tvec![2, 3, 4], DatumType::F32);
    let b = graph.add_tensor(tvec![4, 6], DatumType::F32);
    let b_t = graph.add_tensor(tvec![6, 4], DatumType::F32);
    let out = graph.add_tensor(tvec![2, 3, 6], DatumType::F32);
    graph.add_node(Transpose::new(tvec![1, 0, 2]), &[x], &[y]).unwrap();
    graph.add_node(Transpose::new(tvec![1, 0, 2]), &[y], &[z]).unwrap();
    graph.add_node(Transpose::new(tvec![1, 0]), &[b_t], &[b]).unwrap();
    graph.add_node(MatMul::new(false, false), &[z, b], &[out]).unwrap();

    graph.optimize().unwrap();
    graph.check_valid().unwrap();
    let nodes: Vec<String> = graph.nodes().iter().map(|n| n.to_string()).collect();
    let tensors = graph.tensors().len();

    graph.optimize().unwrap();
    let again: Vec<String> = graph.nodes().iter().map(|n| n.to_string()).collect();
    assert_eq!(nodes, again);
    assert_eq!(graph.tensors().len(), tensors);
}

/// Chained inverse pairs collapse fully: four transposes down to none.
#[test]
fn transpose_chains_collapse() {
    let mut graph = Graph::cpu();
    let x = graph.add_tensor(tvec![2, 3, 4], DatumType::F32);
    let shapes = [tvec![4, 2, 3], tvec![2, 3, 4], tvec![4, 2, 3], tvec![2, 3, 4]];
    let perms = [tvec![2, 0, 1], tvec![1, 2, 0], tvec![2, 0, 1], tvec![1, 2, 0]];
    let mut last = x;
    for (shape, perm) in shapes.into_iter().zip(perms) {
        let next = graph.add_tensor(shape, DatumType::F32);
        graph.add_node(Transpose::new(perm), &[last], &[next]).unwrap();
        last = next;
    }
    let out = graph.add_tensor(tvec![2, 3, 4], DatumType::F32);
    let sink = graph.add_node(relu(), &[last], &[out]).unwrap();

    graph.optimize().unwrap();
    graph.check_valid().unwrap();
    assert_eq!(graph.nodes().len(), 1);
    assert_eq!(graph.node(sink).unwrap().inputs(), &[x]);
}

/// Cancelling a pair between a producer and a consumer reroutes the
/// operator edge across the gap.
#[test]
fn cancelled_pair_between_producer_and_consumer() {
    let mut graph = Graph::cpu();
    let input = graph.add_tensor(tvec![2, 3], DatumType::F32);
    let x = graph.add_tensor(tvec![2, 3], DatumType::F32);
    let y = graph.add_tensor(tvec![3, 2], DatumType::F32);
    let z = graph.add_tensor(tvec![2, 3], DatumType::F32);
    let out = graph.add_tensor(tvec![2, 3], DatumType::F32);
    let producer = graph.add_node(Opaque::elementwise("Neg"), &[input], &[x]).unwrap();
    graph.add_node(Transpose::new(tvec![1, 0]), &[x], &[y]).unwrap();
    graph.add_node(Transpose::new(tvec![1, 0]), &[y], &[z]).unwrap();
    let consumer = graph.add_node(relu(), &[z], &[out]).unwrap();

    graph.optimize().unwrap();
    graph.check_valid().unwrap();

    assert_eq!(graph.nodes().len(), 2);
    assert_eq!(graph.node(consumer).unwrap().inputs(), &[x]);
    assert_eq!(graph.node(producer).unwrap().successors(), &[consumer]);
    assert_eq!(graph.node(consumer).unwrap().predecessors(), &[producer]);
    graph.topo_sort().unwrap();
    let order: Vec<NodeId> = graph.nodes().iter().map(|n| n.id()).collect();
    assert_eq!(order, vec![producer, consumer]);
}

/// Full pipeline: infer, simplify, then plan one arena for everything.
#[test]
fn infer_optimize_and_plan() {
    let mut graph = Graph::cpu();
    let a = graph.add_tensor(tvec![1, 3, 4, 5], DatumType::F32);
    let b = graph.add_tensor(tvec![2, 1, 5, 6], DatumType::F32);
    let c = graph.add_tensor(Shape::new(), DatumType::F32);
    let c_t = graph.add_tensor(Shape::new(), DatumType::F32);
    let c_back = graph.add_tensor(Shape::new(), DatumType::F32);
    let out = graph.add_tensor(Shape::new(), DatumType::F32);
    graph.add_node(MatMul::new(false, false), &[a, b], &[c]).unwrap();
    graph.add_node(Transpose::new(tvec![0, 1, 3, 2]), &[c], &[c_t]).unwrap();
    graph.add_node(Transpose::new(tvec![0, 1, 3, 2]), &[c_t], &[c_back]).unwrap();
    graph.add_node(relu(), &[c_back], &[out]).unwrap();

    graph.shape_infer().unwrap();
    assert_eq!(graph.tensor(c).unwrap().shape(), &[2, 3, 4, 6]);

    graph.optimize().unwrap();
    graph.check_valid().unwrap();
    assert_eq!(graph.nodes().len(), 2);

    graph.shape_infer().unwrap();
    assert_eq!(graph.tensor(out).unwrap().shape(), &[2, 3, 4, 6]);

    graph.data_malloc().unwrap();
    let peak = graph.allocator().peak();
    let mut claims: Vec<(usize, usize)> = graph
        .tensors()
        .iter()
        .map(|t| (t.blob().unwrap().offset(), t.bytes()))
        .collect();
    claims.sort();
    for window in claims.windows(2) {
        assert!(window[0].0 + window[0].1 <= window[1].0, "overlapping tensors");
    }
    let (last_offset, last_bytes) = *claims.last().unwrap();
    assert!(last_offset + last_bytes <= peak);
}
