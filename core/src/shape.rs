//! Axis normalization and row-major index arithmetic, shared by kernels and
//! operator implementations.

use crate::internal::*;

/// Normalize a possibly-negative axis against a rank.
///
/// Accepts `-rank..=rank-1`, counting negative axes from the back.
pub fn real_axis(axis: isize, rank: usize) -> CulvertResult<usize> {
    ensure!(rank >= 1, "axis normalization against rank 0");
    ensure!(
        axis >= -(rank as isize) && axis <= rank as isize - 1,
        "axis {} out of range for rank {}",
        axis,
        rank
    );
    if axis < 0 {
        Ok((axis + rank as isize) as usize)
    } else {
        Ok(axis as usize)
    }
}

/// Row-major strides for a shape, in elements.
pub fn natural_strides(shape: &[usize]) -> Shape {
    let mut strides: Shape = shape.iter().map(|_| 1).collect();
    for ix in (0..shape.len().saturating_sub(1)).rev() {
        strides[ix] = strides[ix + 1] * shape[ix + 1];
    }
    strides
}

/// Decompose a row-major flat offset into one index per axis.
pub fn locate_index(mut flat: usize, shape: &[usize]) -> Shape {
    let mut index: Shape = tvec!(0; shape.len());
    for (ix, dim) in shape.iter().enumerate().rev() {
        index[ix] = flat % dim;
        flat /= dim;
    }
    index
}

/// Recombine a multi-axis index into a flat offset under the given strides.
///
/// Each index is wrapped to its extent first, so a broadcast read can pass
/// the consumer-side index together with producer-side shape and strides.
pub fn delocate_index(index: &[usize], shape: &[usize], strides: &[usize]) -> CulvertResult<usize> {
    ensure!(
        index.len() == shape.len() && shape.len() == strides.len(),
        "index rank {}, shape rank {} and stride rank {} differ",
        index.len(),
        shape.len(),
        strides.len()
    );
    Ok(index
        .iter()
        .zip(shape)
        .zip(strides)
        .map(|((ix, dim), stride)| (ix % dim) * stride)
        .sum())
}
