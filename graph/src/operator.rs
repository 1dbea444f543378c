use std::collections::BTreeMap;

use async_trait::async_trait;
use safecast::TryCastFrom;

use lf_error::*;
use lf_region::Region;
use lf_value::{Array, Scalar};

use super::context::Context;
use super::slot::{Metadata, OperatorId, Schema};
use super::topology::Topology;

/// A node of a lazy dataflow graph.
///
/// An operator declares a fixed [`Schema`] of input and output slots. The graph calls
/// [`Operator::setup_metadata`] whenever the metadata of its inputs may have changed, and
/// [`Operator::compute`] only when some consumer requests a region of one of its outputs.
#[async_trait]
pub trait Operator: Send + Sync + 'static {
    /// The name of this operator, for logging.
    fn name(&self) -> &str;

    /// The slots of this operator.
    fn schema(&self) -> &Schema;

    /// Derive the [`Metadata`] of each computed output from the metadata of the inputs.
    ///
    /// This is only called when every required input is ready. It must not perform any
    /// computation on array data. An output which is left out of the result is not ready.
    fn setup_metadata(&self, slots: &Slots) -> LFResult<BTreeMap<String, Metadata>>;

    /// Compute the given bounded `region` of the given `output`.
    ///
    /// The result must have exactly the shape of `region` and the [`lf_value::DType`] of
    /// the output's metadata.
    async fn compute(&self, cxt: &Context, output: &str, region: &Region) -> LFResult<Array>;

    /// Map a dirty `region` of the given `input` to the dirty regions of this operator's
    /// outputs.
    ///
    /// By default, every computed output is dirty in the projection of `region` onto its
    /// axes (so a dirty scalar parameter makes every output entirely dirty).
    fn propagate_dirty(
        &self,
        slots: &Slots,
        input: &str,
        region: &Region,
    ) -> LFResult<Vec<(String, Region)>> {
        let _ = input;

        Ok(slots
            .outputs()
            .map(|(name, meta)| (name.to_string(), region.project(meta.tags())))
            .collect())
    }

    /// Discard any derived state, e.g. because the metadata of an output has changed.
    fn reset(&self) {}
}

/// A read-only view of the slots of one operator.
pub struct Slots<'a> {
    topology: &'a Topology,
    op: OperatorId,
}

impl<'a> Slots<'a> {
    pub(crate) fn new(topology: &'a Topology, op: OperatorId) -> Self {
        Self { topology, op }
    }

    /// The ID of the operator whose slots these are.
    pub fn operator(&self) -> OperatorId {
        self.op
    }

    /// The [`Metadata`] of the array carried by the named slot.
    pub fn metadata(&self, name: &str) -> LFResult<Metadata> {
        self.topology.metadata(&self.op.slot(name))
    }

    /// The value of the named scalar slot, or its default.
    pub fn scalar<T: TryCastFrom<Scalar>>(&self, name: &str) -> LFResult<T> {
        self.topology.scalar(&self.op.slot(name))
    }

    /// Return `true` if the named slot has a value, a default, or a ready upstream.
    pub fn is_ready(&self, name: &str) -> bool {
        self.topology.is_ready(&self.op.slot(name))
    }

    /// Iterate over the outputs which this operator computes itself and which are ready.
    pub fn outputs(&self) -> impl Iterator<Item = (&'a str, &'a Metadata)> {
        self.topology
            .node(self.op)
            .into_iter()
            .flat_map(|node| node.slots.iter())
            .filter(|(_, state)| state.is_computed())
            .filter_map(|(name, state)| state.meta.as_ref().map(|meta| (name.as_str(), meta)))
    }
}
