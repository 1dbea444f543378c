use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use log::trace;
use safecast::TryCastFrom;
use tokio::sync::OwnedRwLockReadGuard;

use lf_error::*;
use lf_region::{Region, Shape};
use lf_value::{Array, Scalar};

use super::executor::Executor;
use super::operator::Slots;
use super::slot::{Direction, Metadata, OperatorId, SlotRef, Value};
use super::topology::{Source, Topology};

/// A consistent view of the graph, held for the duration of one request.
pub(crate) type Snapshot = Arc<OwnedRwLockReadGuard<Topology>>;

/// The context of a call to [`crate::Operator::compute`].
#[derive(Clone)]
pub struct Context {
    snapshot: Snapshot,
    executor: Executor,
    op: OperatorId,
}

impl Context {
    pub(crate) fn new(snapshot: Snapshot, executor: Executor, op: OperatorId) -> Self {
        Self {
            snapshot,
            executor,
            op,
        }
    }

    /// The ID of the operator being computed.
    pub fn operator(&self) -> OperatorId {
        self.op
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// A read-only view of the slots of the operator being computed.
    pub fn slots(&self) -> Slots<'_> {
        Slots::new(&self.snapshot, self.op)
    }

    /// The [`Metadata`] of the named slot.
    pub fn metadata(&self, name: &str) -> LFResult<Metadata> {
        self.slots().metadata(name)
    }

    /// The value of the named scalar input, or its default.
    pub fn scalar<T: TryCastFrom<Scalar>>(&self, name: &str) -> LFResult<T> {
        self.slots().scalar(name)
    }

    /// Request the given `region` of the named input.
    ///
    /// The returned future does not borrow this `Context`, so it can be spawned.
    pub fn read(&self, input: &str, region: Region) -> BoxFuture<'static, LFResult<Array>> {
        let slot = self.op.slot(input);

        match self.snapshot.slot(&slot) {
            Ok(state) if state.spec.direction() == Direction::Input => {
                read_slot(self.snapshot.clone(), self.executor.clone(), slot, region)
            }
            Ok(_) => future::ready(Err(bad_request!(
                "an operator can only read from its own inputs, not {slot}"
            )))
            .boxed(),
            Err(cause) => future::ready(Err(cause)).boxed(),
        }
    }
}

/// Resolve the given `region` of `slot` by following its upstream chain to a static value
/// or a computed output.
pub(crate) fn read_slot(
    snapshot: Snapshot,
    executor: Executor,
    slot: SlotRef,
    region: Region,
) -> BoxFuture<'static, LFResult<Array>> {
    async move {
        let topology: &Topology = &snapshot;

        match topology.source(&slot)? {
            Source::Computed(output) => {
                let meta = topology
                    .slot(&output)?
                    .meta
                    .clone()
                    .ok_or_else(|| not_ready!("{output} is not ready"))?;

                let region = region.resolve(meta.shape())?;
                let dims = region.dims_usize()?;
                let op = topology.node(output.operator())?.op.clone();

                trace!("compute {region} of {output} ({})", op.name());

                let cxt = Context::new(snapshot.clone(), executor, output.operator());
                let array = op
                    .compute(&cxt, output.name(), &region)
                    .await
                    .map_err(|cause| {
                        let name = op.name();
                        cause.consume(format!("while computing {region} of {output} ({name})"))
                    })?;

                if array.shape() != dims.as_slice() || array.dtype() != meta.dtype() {
                    return Err(internal!(
                        "{} computed {array:?} for {region} of {output}, \
                        expected {} with shape {dims:?}",
                        op.name(),
                        meta.dtype(),
                    ));
                }

                Ok(array)
            }
            Source::Value(Value::Array(tags, array)) => {
                let dims = array.shape().iter().map(|dim| *dim as u64).collect();
                let shape = Shape::new(tags.clone(), dims)?;
                let region = region.resolve(&shape)?;
                let offset = region.offset_within(&Region::of(&shape))?;
                array.extract(&offset, &region.dims_usize()?)
            }
            Source::Value(Value::Scalar(scalar)) => Err(type_mismatch!(
                "cannot read a region of {slot}, which carries the scalar {scalar}"
            )),
            Source::Default(scalar) => Err(type_mismatch!(
                "cannot read a region of {slot}, which defaults to the scalar {scalar}"
            )),
            Source::Missing(input) => Err(not_ready!("{input} has no value or connection")),
        }
    }
    .boxed()
}
