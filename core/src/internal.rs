//! Flat re-exports for use inside the crate: `use crate::internal::*;`.

pub use crate::prelude::*;
pub use culvert_data::internal::*;
pub use std::fmt;
pub use std::sync::Arc;
