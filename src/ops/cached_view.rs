use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use lf_cache::{CacheConfig, OpBlockedCache};
use lf_error::*;
use lf_graph::{Context, Graph, Metadata, Operator, OperatorId, Schema, SlotSpec, Slots};
use lf_region::{Axis, BlockShape, Region};
use lf_value::Array;

pub const INPUT: &str = "Input";
pub const OUTPUT: &str = "Output";
pub const CACHED_OUTPUT: &str = "CachedOutput";

/// The per-axis block extents of the cache inside an [`OpCachedView`].
pub fn block_shape() -> LFResult<BlockShape> {
    BlockShape::new([
        (Axis::T, 1),
        (Axis::X, 256),
        (Axis::Y, 256),
        (Axis::Z, 100),
        (Axis::C, 1),
    ])
}

/// A composite operator which exposes a transform of its input both directly, as
/// `Output`, and through a block cache, as `CachedOutput`.
///
/// The cache determines the shape of the requests which reach the transform, and avoids
/// computing any part of it twice.
pub struct OpCachedView {
    schema: Schema,
}

/// The operators which make up an installed [`OpCachedView`].
pub struct CachedView {
    pub view: OperatorId,
    pub transform: OperatorId,
    pub cache: OperatorId,
    cache_op: Arc<OpBlockedCache>,
}

impl CachedView {
    /// The cache through which `CachedOutput` is served.
    pub fn cache(&self) -> &OpBlockedCache {
        &self.cache_op
    }
}

impl OpCachedView {
    fn new() -> LFResult<Self> {
        let schema = Schema::new([
            SlotSpec::input(INPUT),
            SlotSpec::output(OUTPUT),
            SlotSpec::output(CACHED_OUTPUT),
        ])?;

        Ok(Self { schema })
    }

    /// Add a new `OpCachedView` to `graph`, wrapping the given `transform`, which must have
    /// an array input named `Input` and an output named `Output`.
    pub async fn install<T: Operator>(
        graph: &Graph,
        transform: Arc<T>,
        cache: CacheConfig,
    ) -> LFResult<CachedView> {
        let view = graph.add_operator(Arc::new(Self::new()?)).await?;

        let cache_op = Arc::new(OpBlockedCache::new(cache)?);
        let transform = graph.add_child(view, transform).await?;
        let cache = graph.add_child(view, cache_op.clone()).await?;

        graph.connect(transform.slot(INPUT), view.slot(INPUT)).await?;
        graph.connect(cache.slot(lf_cache::INPUT), transform.slot(OUTPUT)).await?;
        graph.connect(view.slot(OUTPUT), transform.slot(OUTPUT)).await?;
        graph.connect(view.slot(CACHED_OUTPUT), cache.slot(lf_cache::OUTPUT)).await?;

        debug!("installed a cached view {view} of {transform} through {cache}");

        Ok(CachedView {
            view,
            transform,
            cache,
            cache_op,
        })
    }

    /// The default configuration of the cache inside an `OpCachedView`.
    pub fn default_cache() -> LFResult<CacheConfig> {
        CacheConfig::builder()
            .name("CachedView")
            .block_shape(block_shape()?)
            .build()
    }
}

#[async_trait]
impl Operator for OpCachedView {
    fn name(&self) -> &str {
        "CachedView"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn setup_metadata(&self, _slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
        // both outputs are forwarded from children
        Ok(BTreeMap::new())
    }

    async fn compute(&self, _cxt: &Context, output: &str, _region: &Region) -> LFResult<Array> {
        Err(internal!("CachedView output {output} is not forwarded"))
    }
}

#[cfg(test)]
mod tests {
    use lf_graph::Executor;
    use lf_region::Shape;
    use lf_value::DType;

    use super::*;
    use crate::ops::OpThreshold;
    use crate::source::{OpSource, SyntheticSource};

    #[tokio::test]
    async fn test_cached_view_matches_direct_output() {
        let graph = Graph::new(Executor::current().expect("executor"));

        let shape: Shape = "y=600,x=300".parse().expect("shape");
        let source = SyntheticSource::new(shape, DType::U8, 42).expect("source");
        let source = OpSource::new("synthetic", source).expect("op");
        let source = graph.add_operator(Arc::new(source)).await.expect("source");

        let threshold = Arc::new(OpThreshold::new().expect("threshold"));
        let config = OpCachedView::default_cache().expect("config");
        let view = OpCachedView::install(&graph, threshold, config)
            .await
            .expect("install");

        graph
            .connect(view.view.slot(INPUT), source.slot(crate::source::OUTPUT))
            .await
            .expect("connect");

        graph
            .set_scalar(view.transform.slot(crate::ops::threshold::MIN), 100.)
            .await
            .expect("min");

        let meta = graph.metadata(&view.view.slot(CACHED_OUTPUT)).await.expect("meta");
        assert_eq!(meta.block_hint(), Some(&block_shape().expect("block shape")));

        let region = Region::from_pairs([(Axis::Y, 200..520), (Axis::X, 10..290)])
            .expect("region");

        let direct = graph
            .read(&view.view.slot(OUTPUT), region.clone())
            .await
            .expect("direct");

        let cached = graph
            .read(&view.view.slot(CACHED_OUTPUT), region)
            .await
            .expect("cached");

        assert_eq!(direct, cached);
        assert_eq!(view.cache().stats().misses, 6);
        assert!(direct.to_f64_vec().iter().all(|n| *n == 0. || *n >= 100.));
    }
}
