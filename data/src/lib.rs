//! Shared vocabulary types for the culvert crates.
//!
//! Everything here is deliberately small: the `TVec` small-vector alias used
//! for shapes and operand lists, the `Shape` alias, the element-type tag, and
//! the common error aliases. Heavier machinery lives in `culvert-core`.

#[macro_use]
mod macros;

mod datum;

pub use anyhow;
pub use datum::DatumType;

/// A SmallVec instantiation with 4 embeddable values.
///
/// Used about everywhere in culvert, for node operands, edge lists and
/// tensor dimensions.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

/// A tensor shape: one extent per axis, outermost first, row-major.
pub type Shape = TVec<usize>;

/// The error type used across the culvert crates.
pub type CulvertError = anyhow::Error;

/// The result type used across the culvert crates.
pub type CulvertResult<T> = anyhow::Result<T>;

pub mod prelude {
    pub use crate::datum::DatumType;
    pub use crate::tvec;
    pub use crate::{CulvertError, CulvertResult, Shape, TVec};
}

pub mod internal {
    pub use crate::prelude::*;
    pub use anyhow::{anyhow, bail, ensure, format_err, Context};
    pub use smallvec as culvert_smallvec;
}
