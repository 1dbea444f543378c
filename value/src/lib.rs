//! Value types which flow through a lazyflow graph: N-dimensional [`Array`]s of a
//! fixed [`DType`], and [`Scalar`] parameters.

pub use array::{Array, Element};
pub use dtype::DType;
pub use scalar::{Scalar, ScalarType};

mod array;
mod dtype;
mod scalar;
