use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::info;

use lazyflow::cache;
use lazyflow::error::*;
use lazyflow::ops::{threshold, OpThreshold};
use lazyflow::region::{BlockGrid, BlockShape, Region, Shape};
use lazyflow::source::{self, OpSource, SyntheticSource};
use lazyflow::value::DType;
use lazyflow::{CacheConfig, Executor, Graph, OpBlockedCache, SlotRef};

fn data_size(flag: &str) -> LFResult<u64> {
    let (number, unit) = flag
        .char_indices()
        .last()
        .map(|(i, unit)| (&flag[..i], unit))
        .ok_or_else(|| bad_request!("invalid size specified: {flag}"))?;

    let scale = match unit {
        'K' => 1_000,
        'M' => 1_000_000,
        'G' => 1_000_000_000,
        _ => return Err(bad_request!("unable to parse data size {flag}")),
    };

    let size = number
        .parse::<u64>()
        .map_err(|cause| bad_request!("unable to parse data size {flag}: {cause}"))?;

    size.checked_mul(scale).ok_or_else(|| bad_request!("data size {flag} is too large"))
}

/// Read a synthetic volume tile-by-tile through a threshold and a blocked cache.
#[derive(Clone, Parser)]
struct Config {
    #[arg(long, default_value = "t=1,z=1,y=2048,x=2048,c=1")]
    pub shape: Shape,

    #[arg(long, default_value = "y=300,x=300")]
    pub tile: BlockShape,

    #[arg(long, default_value = "t=1,z=100,y=256,x=256,c=1")]
    pub block: BlockShape,

    #[arg(long, default_value = "64M", value_parser = data_size)]
    pub cache_size: u64,

    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,

    #[arg(long, default_value = "64")]
    pub min: f64,

    #[arg(long, default_value = "0")]
    pub seed: u64,

    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

async fn read_tiles(
    graph: &Graph,
    output: &SlotRef,
    tiles: &[Region],
    workers: usize,
) -> LFResult<u64> {
    stream::iter(tiles.iter().cloned())
        .map(|tile| graph.read(output, tile))
        .buffer_unordered(workers.max(1))
        .try_fold(0, |size, array| async move { Ok(size + array.size() as u64) })
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level))
        .init();

    let graph = Graph::new(Executor::current()?);

    let source = SyntheticSource::new(config.shape.clone(), DType::U8, config.seed)?;
    let source_id = graph
        .add_operator(Arc::new(OpSource::new("Synthetic", source)?))
        .await?;

    let threshold_id = graph.add_operator(Arc::new(OpThreshold::new()?)).await?;
    graph
        .connect(threshold_id.slot(threshold::INPUT), source_id.slot(source::OUTPUT))
        .await?;

    graph.set_scalar(threshold_id.slot(threshold::MIN), config.min).await?;

    let cache_config = CacheConfig::builder()
        .block_shape(config.block.clone())
        .capacity(config.cache_size)
        .build()?;

    let cache_op = Arc::new(OpBlockedCache::new(cache_config)?);
    let cache_id = graph.add_operator(cache_op.clone()).await?;
    graph
        .connect(cache_id.slot(cache::INPUT), threshold_id.slot(threshold::OUTPUT))
        .await?;

    let output = cache_id.slot(cache::OUTPUT);
    let meta = graph.metadata(&output).await?;
    info!("reading {meta:?} in tiles of {:?}", config.tile);

    let grid = BlockGrid::new(meta.shape().clone(), &config.tile);
    let tiles = grid
        .blocks(&Region::of(meta.shape()))?
        .map(|index| grid.block_region(&index))
        .collect::<LFResult<Vec<_>>>()?;

    for pass in ["cold", "warm"] {
        let start = Instant::now();
        let size = read_tiles(&graph, &output, &tiles, config.workers).await?;

        info!(
            "{pass} pass read {size} elements in {} tiles in {:?}",
            tiles.len(),
            start.elapsed()
        );
    }

    let stats = cache_op.stats();
    println!(
        "{} tiles, {} block computations, {} hits, {} coalesced, {} evictions, \
        {} blocks ({} bytes) resident",
        tiles.len(),
        stats.misses,
        stats.hits,
        stats.coalesced,
        stats.evictions,
        stats.blocks,
        stats.bytes,
    );

    Ok(())
}
