//! Lazyflow is a lazy, demand-driven dataflow engine for N-dimensional array data.
//!
//! Operators are connected slot-to-slot in a [`Graph`]. Reading a region of an output
//! slot pulls exactly the upstream regions needed to compute it, and reporting a region
//! of a source as dirty invalidates exactly the downstream regions which depend on it.
//! The [`OpBlockedCache`] operator caches results in fixed-size blocks, so that
//! repeated and overlapping reads only compute each block once.

pub use lf_cache::{CacheBuilder, CacheConfig, CacheStats, OpBlockedCache};
pub use lf_cache as cache;
pub use lf_error as error;
pub use lf_graph::{
    Context, Direction, Executor, Graph, Metadata, Operator, OperatorId, Schema, SlotKind,
    SlotRef, SlotSpec, Slots, Value,
};
pub use lf_region as region;
pub use lf_value as value;

pub mod ops;
pub mod source;
