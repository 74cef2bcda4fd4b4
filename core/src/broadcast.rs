//! N-way tensor shape broadcast.

use crate::internal::*;

/// Computes a shape, if any, to which all shapes can be broadcast, per the
/// ONNX bidirectional rule: align at the rightmost axis, missing axes count
/// as 1, and each axis must either agree or be 1 on all but one side.
pub fn multi_broadcast(shapes: &[impl AsRef<[usize]>]) -> Option<Shape> {
    let len = shapes.iter().map(|shape| shape.as_ref().len()).max()?;
    let mut shape: Shape = tvec!();
    for i in 0..len {
        let mut wanted_size = 1;
        for s in shapes {
            let s = s.as_ref();
            let dim = if i < s.len() { s[s.len() - i - 1] } else { 1 };
            if dim != 1 {
                if wanted_size != 1 && dim != wanted_size {
                    return None;
                }
                wanted_size = dim;
            }
        }
        shape.push(wanted_size);
    }
    shape.reverse();
    Some(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn onnx_1() {
        assert_eq!(multi_broadcast(&[tvec![2, 3, 4, 5], tvec![]]), Some(tvec![2, 3, 4, 5]))
    }

    #[test]
    fn onnx_2() {
        assert_eq!(multi_broadcast(&[tvec![2, 3, 4, 5], tvec![5]]), Some(tvec![2, 3, 4, 5]))
    }

    #[test]
    fn onnx_3() {
        assert_eq!(multi_broadcast(&[tvec![4, 5], tvec![2, 3, 4, 5]]), Some(tvec![2, 3, 4, 5]))
    }

    #[test]
    fn onnx_4() {
        assert_eq!(multi_broadcast(&[tvec![1, 4, 5], tvec![2, 3, 4, 1]]), Some(tvec![2, 3, 4, 5]))
    }

    #[test]
    fn onnx_5() {
        assert_eq!(multi_broadcast(&[tvec![3, 4, 5], tvec![2, 1, 1, 1]]), Some(tvec![2, 3, 4, 5]))
    }

    #[test]
    fn mismatch() {
        assert_eq!(multi_broadcast(&[tvec![2, 3], tvec![3, 3]]), None)
    }

    #[test]
    fn self_broadcast_is_identity() {
        let shape: Shape = tvec![2, 3, 4];
        assert_eq!(multi_broadcast(&[shape.clone(), shape.clone()]), Some(shape));
    }

    fn shape() -> impl Strategy<Value = Vec<usize>> {
        proptest::collection::vec(1usize..4, 0..4)
    }

    proptest! {
        #[test]
        fn commutative(a in shape(), b in shape()) {
            prop_assert_eq!(
                multi_broadcast(&[a.clone(), b.clone()]),
                multi_broadcast(&[b, a])
            );
        }
    }
}
