//! A lazy, demand-driven dataflow graph.
//!
//! A [`Graph`] holds [`Operator`]s whose slots are connected to each other. Nothing is
//! computed until a consumer [`Graph::read`]s a [`lf_region::Region`] of some slot, at
//! which point exactly the regions needed to produce it are requested upstream. When the
//! data behind a slot changes, [`Graph::notify_dirty`] propagates the affected regions
//! downstream so that any cached result can be discarded.

pub use context::Context;
pub use executor::Executor;
pub use graph::Graph;
pub use operator::{Operator, Slots};
pub use slot::{Direction, Metadata, OperatorId, Schema, SlotKind, SlotRef, SlotSpec, Value};

mod context;
mod dirty;
mod executor;
mod graph;
mod operator;
mod slot;
mod topology;
