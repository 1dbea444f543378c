use std::sync::Arc;

use log::{debug, info};
use tokio::sync::RwLock;

use lf_error::*;
use lf_region::{AxisTags, Region};
use lf_value::{Array, Scalar};

use super::context::{read_slot, Snapshot};
use super::dirty;
use super::executor::Executor;
use super::operator::Operator;
use super::slot::{Metadata, OperatorId, SlotRef, Value};
use super::topology::Topology;

/// A lazy dataflow graph.
///
/// Cloning a `Graph` produces a new handle to the same graph. Structural changes
/// (adding and removing operators, connecting slots, assigning values) are atomic: either
/// the change and the resulting metadata refresh succeed together, or the graph is left
/// unchanged.
#[derive(Clone)]
pub struct Graph {
    topology: Arc<RwLock<Topology>>,
    executor: Executor,
}

impl Graph {
    /// Construct a new, empty `Graph` whose computations run on the given [`Executor`].
    pub fn new(executor: Executor) -> Self {
        Self {
            topology: Arc::new(RwLock::new(Topology::default())),
            executor,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Add a top-level operator to this graph.
    pub async fn add_operator<O: Operator>(&self, op: Arc<O>) -> LFResult<OperatorId> {
        self.insert(op, None).await
    }

    /// Add an operator as a child of the composite operator `parent`.
    pub async fn add_child<O: Operator>(
        &self,
        parent: OperatorId,
        op: Arc<O>,
    ) -> LFResult<OperatorId> {
        self.insert(op, Some(parent)).await
    }

    async fn insert(
        &self,
        op: Arc<dyn Operator>,
        parent: Option<OperatorId>,
    ) -> LFResult<OperatorId> {
        self.mutate(move |topology| {
            let id = topology.insert(op, parent)?;
            let slots = topology
                .node(id)?
                .slots
                .keys()
                .map(|name| id.slot(name))
                .collect::<Vec<_>>();

            // nothing reads from a new operator yet, so there is nothing to mark dirty
            Ok((id, slots, vec![]))
        })
        .await
    }

    /// Remove an operator and all of its children from this graph.
    ///
    /// Slots which were connected to the removed operator lose their connection.
    pub async fn remove_operator(&self, id: OperatorId) -> LFResult<()> {
        self.mutate(move |topology| {
            let orphans = topology.remove(id)?;
            Ok(((), orphans.clone(), orphans))
        })
        .await
    }

    /// The IDs of every operator in this graph.
    pub async fn operators(&self) -> Vec<OperatorId> {
        self.topology.read().await.ids().collect()
    }

    /// The IDs of the children of the given composite operator.
    pub async fn children(&self, id: OperatorId) -> LFResult<Vec<OperatorId>> {
        let topology = self.topology.read().await;
        let node = topology.node(id)?;
        Ok(node.children.iter().copied().collect())
    }

    /// Connect the slot `target` to read from `upstream`.
    ///
    /// An input may read from any output, or from an input of its operator's parent.
    /// An output may read from an output of one of its operator's children.
    pub async fn connect(&self, target: SlotRef, upstream: SlotRef) -> LFResult<()> {
        self.mutate(move |topology| {
            topology.connect(&target, &upstream)?;
            Ok(((), vec![target.clone()], vec![target]))
        })
        .await
    }

    /// Remove the connection or value of the given `target` slot.
    pub async fn disconnect(&self, target: SlotRef) -> LFResult<()> {
        self.mutate(move |topology| {
            topology.disconnect(&target)?;
            Ok(((), vec![target.clone()], vec![target]))
        })
        .await
    }

    /// Assign a static `value` to the given input slot.
    pub async fn set_value<V: Into<Value>>(&self, target: SlotRef, value: V) -> LFResult<()> {
        let value = value.into();

        self.mutate(move |topology| {
            topology.set_value(&target, value)?;
            Ok(((), vec![target.clone()], vec![target]))
        })
        .await
    }

    /// Assign a static scalar parameter to the given input slot.
    pub async fn set_scalar<S: Into<Scalar>>(&self, target: SlotRef, scalar: S) -> LFResult<()> {
        self.set_value(target, Value::Scalar(scalar.into())).await
    }

    /// Assign a static array to the given input slot.
    pub async fn set_array(&self, target: SlotRef, tags: AxisTags, array: Array) -> LFResult<()> {
        self.set_value(target, Value::array(tags, array)?).await
    }

    /// The [`Metadata`] of the array carried by the given slot.
    pub async fn metadata(&self, slot: &SlotRef) -> LFResult<Metadata> {
        self.topology.read().await.metadata(slot)
    }

    /// Return `true` if the given slot has a value or a ready upstream.
    pub async fn is_ready(&self, slot: &SlotRef) -> bool {
        self.topology.read().await.is_ready(slot)
    }

    /// Read the given `region` of a slot, computing whatever is needed to produce it.
    ///
    /// Structural changes wait until every read in progress completes.
    pub async fn read(&self, slot: &SlotRef, region: Region) -> LFResult<Array> {
        let snapshot: Snapshot = Arc::new(self.topology.clone().read_owned().await);
        debug!("read {region} of {slot}");
        read_slot(snapshot, self.executor.clone(), slot.clone(), region).await
    }

    /// Report that the given `region` of a slot has changed, e.g. because the data behind a
    /// source operator was modified.
    ///
    /// This must not be called from within [`Operator::compute`].
    pub async fn notify_dirty(&self, slot: &SlotRef, region: Region) -> LFResult<()> {
        let topology = self.topology.read().await;
        topology.slot(slot)?;
        dirty::propagate(&topology, [(slot.clone(), region)])
    }

    /// Apply a structural change to a copy of the topology, refresh the metadata of the
    /// slots it reports as changed, propagate the resulting dirty regions, and commit the
    /// copy only if all three succeed.
    async fn mutate<T, F>(&self, mutation: F) -> LFResult<T>
    where
        F: FnOnce(&mut Topology) -> LFResult<(T, Vec<SlotRef>, Vec<SlotRef>)>,
    {
        let mut guard = self.topology.write().await;
        let mut topology = guard.clone();

        let (result, changed, dirty) = mutation(&mut topology)?;
        let reconfigured = topology.refresh(changed)?;

        let dirty = dirty
            .into_iter()
            .filter(|slot| topology.slot(slot).is_ok())
            .map(|slot| {
                let tags = topology
                    .metadata(&slot)
                    .map(|meta| meta.tags().clone())
                    .unwrap_or_default();

                (slot, Region::all(tags))
            })
            .collect::<Vec<_>>();

        dirty::propagate(&topology, dirty)?;

        *guard = topology;

        for id in reconfigured {
            if let Ok(node) = guard.node(id) {
                info!("the output metadata of {} ({id}) changed", node.op.name());
                node.op.reset();
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use lf_region::{Axis, Shape};
    use lf_value::{DType, ScalarType};

    use super::*;
    use crate::{Context, Schema, SlotSpec, Slots};

    /// Emits `offset + y * width + x` at every coordinate of a 2-D domain.
    struct Ramp {
        schema: Schema,
        shape: Shape,
        fail: bool,
        computed: AtomicUsize,
    }

    impl Ramp {
        fn new(y: u64, x: u64) -> Arc<Self> {
            Arc::new(Self {
                schema: Schema::new([
                    SlotSpec::scalar("Offset", ScalarType::Float).with_default(0.),
                    SlotSpec::output("Output"),
                ])
                .expect("schema"),
                shape: Shape::from_pairs([(Axis::Y, y), (Axis::X, x)]).expect("shape"),
                fail: false,
                computed: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            let mut ramp = Arc::into_inner(Self::new(4, 4)).expect("ramp");
            ramp.fail = true;
            Arc::new(ramp)
        }
    }

    #[async_trait]
    impl Operator for Ramp {
        fn name(&self) -> &str {
            "Ramp"
        }

        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn setup_metadata(&self, _slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
            let meta = Metadata::new(DType::F64, self.shape.clone());
            Ok(BTreeMap::from([("Output".to_string(), meta)]))
        }

        async fn compute(&self, cxt: &Context, _output: &str, region: &Region) -> LFResult<Array> {
            self.computed.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                return Err(LFError::upstream("the ramp is broken"));
            }

            let offset = cxt.scalar::<f64>("Offset")?;
            let width = self.shape.dims()[1];
            let (ys, xs) = match region.bounds().collect::<Vec<_>>().as_slice() {
                [Some(ys), Some(xs)] => ((*ys).clone(), (*xs).clone()),
                _ => return Err(bad_request!("unbounded region {region}")),
            };

            let dims = region.dims_usize()?;
            let data = ys
                .flat_map(|y| xs.clone().map(move |x| offset + (y * width + x) as f64))
                .collect::<Vec<f64>>();

            Array::from_vec(&dims, data)
        }
    }

    /// Doubles its input and records the dirty regions it sees.
    struct Double {
        schema: Schema,
        dirty: Mutex<Vec<Region>>,
        resets: AtomicUsize,
    }

    impl Double {
        fn new() -> Arc<Self> {
            Self::with_input(SlotSpec::input("Input"))
        }

        fn with_input(input: SlotSpec) -> Arc<Self> {
            Arc::new(Self {
                schema: Schema::new([input, SlotSpec::output("Output")]).expect("schema"),
                dirty: Mutex::new(Vec::new()),
                resets: AtomicUsize::new(0),
            })
        }

        fn dirty(&self) -> Vec<Region> {
            self.dirty.lock().expect("dirty").clone()
        }
    }

    #[async_trait]
    impl Operator for Double {
        fn name(&self) -> &str {
            "Double"
        }

        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn setup_metadata(&self, slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
            let meta = slots.metadata("Input")?;
            Ok(BTreeMap::from([("Output".to_string(), meta)]))
        }

        async fn compute(&self, cxt: &Context, _output: &str, region: &Region) -> LFResult<Array> {
            let input = cxt.read("Input", region.clone()).await?;
            Ok(input.map_f64(|n| n * 2.))
        }

        fn propagate_dirty(
            &self,
            _slots: &Slots,
            _input: &str,
            region: &Region,
        ) -> LFResult<Vec<(String, Region)>> {
            self.dirty.lock().expect("dirty").push(region.clone());
            Ok(vec![("Output".to_string(), region.clone())])
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Scales its input by `Gain`, but refuses to map a dirty `Gain` onto its output.
    struct Strict {
        schema: Schema,
    }

    impl Strict {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                schema: Schema::new([
                    SlotSpec::input("Input"),
                    SlotSpec::scalar("Gain", ScalarType::Float).with_default(1.),
                    SlotSpec::output("Output"),
                ])
                .expect("schema"),
            })
        }
    }

    #[async_trait]
    impl Operator for Strict {
        fn name(&self) -> &str {
            "Strict"
        }

        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn setup_metadata(&self, slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
            let meta = slots.metadata("Input")?;
            Ok(BTreeMap::from([("Output".to_string(), meta)]))
        }

        async fn compute(&self, cxt: &Context, _output: &str, region: &Region) -> LFResult<Array> {
            let gain = cxt.scalar::<f64>("Gain")?;
            let input = cxt.read("Input", region.clone()).await?;
            Ok(input.map_f64(|n| n * gain))
        }

        fn propagate_dirty(
            &self,
            _slots: &Slots,
            input: &str,
            region: &Region,
        ) -> LFResult<Vec<(String, Region)>> {
            if input == "Gain" {
                Err(bad_request!("Strict cannot map a dirty {input}"))
            } else {
                Ok(vec![("Output".to_string(), region.clone())])
            }
        }
    }

    /// A composite which forwards its input through a child [`Double`].
    struct Wrapper {
        schema: Schema,
    }

    #[async_trait]
    impl Operator for Wrapper {
        fn name(&self) -> &str {
            "Wrapper"
        }

        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn setup_metadata(&self, _slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
            Ok(BTreeMap::new())
        }

        async fn compute(&self, _cxt: &Context, output: &str, _region: &Region) -> LFResult<Array> {
            Err(bad_request!("Wrapper does not compute {output} itself"))
        }
    }

    fn graph() -> Graph {
        Graph::new(Executor::current().expect("executor"))
    }

    fn region(y: std::ops::Range<u64>, x: std::ops::Range<u64>) -> Region {
        Region::from_pairs([(Axis::Y, y), (Axis::X, x)]).expect("region")
    }

    #[tokio::test]
    async fn test_read_through_chain() {
        let graph = graph();
        let ramp = graph.add_operator(Ramp::new(4, 5)).await.expect("ramp");
        let double = graph.add_operator(Double::new()).await.expect("double");

        assert!(!graph.is_ready(&double.slot("Output")).await);

        graph
            .connect(double.slot("Input"), ramp.slot("Output"))
            .await
            .expect("connect");

        let meta = graph.metadata(&double.slot("Output")).await.expect("meta");
        assert_eq!(meta.shape().dims(), &[4, 5]);

        let array = graph
            .read(&double.slot("Output"), region(1..3, 2..4))
            .await
            .expect("read");

        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.to_f64_vec(), vec![14., 16., 24., 26.]);

        graph.set_scalar(ramp.slot("Offset"), 1.).await.expect("offset");

        let array = graph
            .read(&double.slot("Output"), region(0..1, 0..1))
            .await
            .expect("read");

        assert_eq!(array.to_f64_vec(), vec![2.]);
    }

    #[tokio::test]
    async fn test_read_errors() {
        let graph = graph();
        let ramp = graph.add_operator(Ramp::new(4, 4)).await.expect("ramp");
        let double = graph.add_operator(Double::new()).await.expect("double");

        let err = graph
            .read(&double.slot("Output"), region(0..1, 0..1))
            .await
            .expect_err("not ready");

        assert_eq!(err.code(), ErrorType::NotReady);

        graph
            .connect(double.slot("Input"), ramp.slot("Output"))
            .await
            .expect("connect");

        let err = graph
            .read(&double.slot("Output"), region(0..5, 0..1))
            .await
            .expect_err("out of bounds");

        assert_eq!(err.code(), ErrorType::RegionOutOfBounds);

        let err = graph
            .set_scalar(ramp.slot("Offset"), true)
            .await
            .expect_err("wrong type");

        assert_eq!(err.code(), ErrorType::TypeMismatch);

        let err = graph
            .read(&ramp.slot("Offset"), region(0..1, 0..1))
            .await
            .expect_err("default scalar");

        assert_eq!(err.code(), ErrorType::TypeMismatch);

        graph.set_scalar(ramp.slot("Offset"), 2.).await.expect("offset");

        let err = graph
            .read(&ramp.slot("Offset"), region(0..1, 0..1))
            .await
            .expect_err("assigned scalar");

        assert_eq!(err.code(), ErrorType::TypeMismatch);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_reported() {
        let graph = graph();
        let ramp = graph.add_operator(Ramp::failing()).await.expect("ramp");
        let double = graph.add_operator(Double::new()).await.expect("double");

        graph
            .connect(double.slot("Input"), ramp.slot("Output"))
            .await
            .expect("connect");

        let err = graph
            .read(&double.slot("Output"), region(0..2, 0..2))
            .await
            .expect_err("failure");

        assert_eq!(err.code(), ErrorType::UpstreamComputeFailure);
        assert_eq!(err.message(), "the ramp is broken");
        assert_eq!(err.stack().len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_leaves_graph_unchanged() {
        let graph = graph();
        let a = graph.add_operator(Double::new()).await.expect("a");
        let b = graph.add_operator(Double::new()).await.expect("b");
        let ramp = graph.add_operator(Ramp::new(2, 2)).await.expect("ramp");

        graph.connect(a.slot("Input"), ramp.slot("Output")).await.expect("connect");
        graph.connect(b.slot("Input"), a.slot("Output")).await.expect("connect");

        let err = graph
            .connect(a.slot("Input"), b.slot("Output"))
            .await
            .expect_err("cycle");

        assert_eq!(err.code(), ErrorType::CycleDetected);

        let array = graph
            .read(&b.slot("Output"), region(0..1, 0..2))
            .await
            .expect("read");

        assert_eq!(array.to_f64_vec(), vec![0., 4.]);
    }

    #[tokio::test]
    async fn test_dirty_propagation() {
        let graph = graph();
        let ramp = graph.add_operator(Ramp::new(8, 8)).await.expect("ramp");
        let double = Double::new();
        let id = graph.add_operator(double.clone()).await.expect("double");

        graph.connect(id.slot("Input"), ramp.slot("Output")).await.expect("connect");
        assert_eq!(double.resets.load(Ordering::SeqCst), 1);

        let all = Region::all("yx".parse().expect("tags"));
        assert_eq!(double.dirty(), vec![all]);

        graph
            .notify_dirty(&ramp.slot("Output"), region(2..4, 0..8))
            .await
            .expect("notify");

        assert_eq!(double.dirty().last(), Some(&region(2..4, 0..8)));

        // a new value with the same metadata dirties the output without a reset
        graph.set_scalar(ramp.slot("Offset"), 3.).await.expect("offset");
        assert_eq!(double.dirty().len(), 3);
        assert_eq!(double.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_composite_forwarding() {
        let graph = graph();
        let ramp = graph.add_operator(Ramp::new(2, 3)).await.expect("ramp");

        let wrapper = Arc::new(Wrapper {
            schema: Schema::new([SlotSpec::input("Input"), SlotSpec::output("Output")])
                .expect("schema"),
        });

        let parent = graph.add_operator(wrapper).await.expect("wrapper");
        let child = graph.add_child(parent, Double::new()).await.expect("child");
        assert_eq!(graph.children(parent).await.expect("children"), vec![child]);

        graph.connect(child.slot("Input"), parent.slot("Input")).await.expect("forward input");
        graph.connect(parent.slot("Output"), child.slot("Output")).await.expect("forward output");
        graph.connect(parent.slot("Input"), ramp.slot("Output")).await.expect("connect");

        let array = graph
            .read(&parent.slot("Output"), Region::all("yx".parse().expect("tags")))
            .await
            .expect("read");

        assert_eq!(array.to_f64_vec(), vec![0., 2., 4., 6., 8., 10.]);

        let err = graph
            .connect(child.slot("Input"), ramp.slot("Offset"))
            .await
            .expect_err("not a parent");

        assert_eq!(err.code(), ErrorType::BadRequest);

        graph.remove_operator(parent).await.expect("remove");
        assert_eq!(graph.operators().await, vec![ramp]);
    }

    #[tokio::test]
    async fn test_static_array_input() {
        let graph = graph();
        let double = graph.add_operator(Double::new()).await.expect("double");

        let array = Array::from_vec(&[2, 2], vec![1u16, 2, 3, 4]).expect("array");
        graph
            .set_array(double.slot("Input"), "yx".parse().expect("tags"), array)
            .await
            .expect("set");

        let meta = graph.metadata(&double.slot("Output")).await.expect("meta");
        assert_eq!(meta.dtype(), DType::U16);

        let array = graph
            .read(&double.slot("Output"), region(1..2, 0..2))
            .await
            .expect("read");

        assert_eq!(array.to_f64_vec(), vec![6., 8.]);
    }

    #[tokio::test]
    async fn test_connect_type_mismatch_leaves_graph_unchanged() {
        let graph = graph();
        let ramp = graph.add_operator(Ramp::new(2, 2)).await.expect("ramp");

        let bytes = Double::with_input(SlotSpec::input("Input").with_dtype(DType::U8));
        let bytes = graph.add_operator(bytes).await.expect("bytes");

        let err = graph
            .connect(bytes.slot("Input"), ramp.slot("Output"))
            .await
            .expect_err("dtype");

        assert_eq!(err.code(), ErrorType::TypeMismatch);
        assert!(!graph.is_ready(&bytes.slot("Input")).await);

        let err = graph.metadata(&bytes.slot("Output")).await.expect_err("not ready");
        assert_eq!(err.code(), ErrorType::NotReady);

        let tags = "zyx".parse().expect("tags");
        let volume = Double::with_input(SlotSpec::input("Input").with_tags(tags));
        let volume = graph.add_operator(volume).await.expect("volume");

        let err = graph
            .connect(volume.slot("Input"), ramp.slot("Output"))
            .await
            .expect_err("tags");

        assert_eq!(err.code(), ErrorType::TypeMismatch);
        assert!(!graph.is_ready(&volume.slot("Output")).await);
    }

    #[tokio::test]
    async fn test_failed_dirty_propagation_leaves_graph_unchanged() {
        let graph = graph();
        let ramp = graph.add_operator(Ramp::new(1, 2)).await.expect("ramp");
        let strict = graph.add_operator(Strict::new()).await.expect("strict");

        graph
            .connect(strict.slot("Input"), ramp.slot("Output"))
            .await
            .expect("connect");

        let err = graph
            .set_scalar(strict.slot("Gain"), 3.)
            .await
            .expect_err("dirty gain");

        assert_eq!(err.code(), ErrorType::BadRequest);

        let array = graph
            .read(&strict.slot("Output"), region(0..1, 0..2))
            .await
            .expect("read");

        assert_eq!(array.to_f64_vec(), vec![0., 1.]);
    }
}
