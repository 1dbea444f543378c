//! A block-wise cache for a lazyflow graph.
//!
//! [`OpBlockedCache`] sits between a producer and its consumers. It partitions its domain
//! into fixed-size blocks, computes each block at most once per invalidation (no matter
//! how many requests for it are in flight), and serves arbitrary regions by assembling the
//! blocks they touch.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, FutureExt};
use log::{debug, info};

use lf_error::*;
use lf_graph::{Context, Metadata, Operator, Schema, SlotSpec, Slots};
use lf_region::{BlockGrid, BlockIndex, Region};
use lf_value::{Array, ScalarType};

pub use config::{CacheBuilder, CacheConfig};
pub use table::CacheStats;

use table::{BlockTable, Lookup};

mod config;
mod table;

pub const INPUT: &str = "Input";
pub const FREEZE: &str = "Freeze";
pub const OUTPUT: &str = "Output";

/// An operator which caches its input block by block.
pub struct OpBlockedCache {
    config: CacheConfig,
    schema: Schema,
    table: BlockTable,
}

impl OpBlockedCache {
    pub fn new(config: CacheConfig) -> LFResult<Self> {
        let schema = Schema::new([
            SlotSpec::input(INPUT),
            SlotSpec::scalar(FREEZE, ScalarType::Bool).with_default(false),
            SlotSpec::output(OUTPUT),
        ])?;

        Ok(Self {
            config,
            schema,
            table: BlockTable::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// A snapshot of this cache's activity counters.
    pub fn stats(&self) -> CacheStats {
        self.table.stats()
    }

    /// Discard every cached block.
    pub fn clear(&self) {
        let invalidated = self.table.invalidate_all();
        debug!("{} discarded {invalidated} blocks", self.config.name);
    }

    /// Free at least `bytes` of cached data, least recently used first, if possible.
    ///
    /// Returns the number of bytes actually freed.
    pub fn evict(&self, bytes: u64) -> u64 {
        let freed = self.table.evict(bytes);
        debug!("{} evicted {freed} bytes", self.config.name);
        freed
    }

    fn grid(&self, meta: &Metadata) -> BlockGrid {
        let block_shape = meta.block_hint().cloned().unwrap_or_default();
        BlockGrid::new(meta.shape().clone(), &block_shape)
    }

    fn invalidate(&self, slots: &Slots, region: &Region) -> LFResult<Option<Region>> {
        let meta = match slots.metadata(OUTPUT) {
            Ok(meta) => meta,
            Err(cause) if cause.code() == ErrorType::NotReady => return Ok(None),
            Err(cause) => return Err(cause),
        };

        let region = region.project(meta.tags());
        let invalidated = self.table.invalidate(&self.grid(&meta), &region);
        debug!("{} invalidated {invalidated} blocks in {region}", self.config.name);

        Ok(Some(region))
    }

    /// Return the block at `index`, computing it if necessary.
    async fn block(
        &self,
        cxt: &Context,
        grid: &BlockGrid,
        index: BlockIndex,
    ) -> LFResult<Arc<Array>> {
        for attempt in 0..self.config.max_retries {
            let (generation, future) = match self.table.lookup(&index) {
                Lookup::Ready(array) => return Ok(array),
                Lookup::Pending(generation, future) => (generation, future),
                Lookup::Missing(generation) => {
                    let start = || {
                        let region = grid.block_region(&index);
                        let read = region.map(|region| cxt.read(INPUT, region));
                        let table = self.table.clone();
                        let capacity = self.config.capacity;
                        let task_index = index.clone();

                        let task = cxt.executor().spawn(async move {
                            let result = match read {
                                Ok(read) => read.await.map(Arc::new),
                                Err(cause) => Err(cause),
                            };

                            table.complete(&task_index, generation, &result, capacity);
                            result
                        });

                        task.map(|result| result.and_then(|block| block))
                            .boxed()
                            .shared()
                    };

                    match self.table.start(&index, generation, start) {
                        Some(future) => (generation, future),
                        None => continue,
                    }
                }
            };

            let block = future.await.map_err(|cause| {
                cause.consume(format!(
                    "while computing block {index:?} of {}",
                    self.config.name
                ))
            })?;

            if self.table.is_current(&index, generation) {
                return Ok(block);
            } else {
                debug!(
                    "{} block {index:?} was invalidated during attempt {attempt}",
                    self.config.name
                );
            }
        }

        Err(LFError::conflict(format!(
            "{} block {index:?} was invalidated {} times while it was being computed",
            self.config.name, self.config.max_retries
        )))
    }
}

#[async_trait]
impl Operator for OpBlockedCache {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn setup_metadata(&self, slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
        let input = slots.metadata(INPUT)?;

        let block_shape = self
            .config
            .block_shape
            .as_ref()
            .or(input.block_hint())
            .cloned()
            .unwrap_or_default();

        let grid = BlockGrid::new(input.shape().clone(), &block_shape);
        info!("{} caches {input:?} as a {grid:?}", self.config.name);

        let output = input.with_block_hint(block_shape);
        Ok(BTreeMap::from([(OUTPUT.to_string(), output)]))
    }

    async fn compute(&self, cxt: &Context, output: &str, region: &Region) -> LFResult<Array> {
        if output != OUTPUT {
            return Err(not_found!("{} has no output {output}", self.config.name));
        }

        let meta = cxt.metadata(OUTPUT)?;
        let grid = self.grid(&meta);
        let indices = grid.blocks(region)?.collect::<Vec<_>>();
        let grid = &grid;

        let blocks = future::try_join_all(indices.into_iter().map(|index| async move {
            let block_region = grid.block_region(&index)?;
            let block = self.block(cxt, grid, index).await?;
            Ok::<_, LFError>((block_region, block))
        }))
        .await?;

        let mut array = Array::zeros(meta.dtype(), &region.dims_usize()?);

        for (block_region, block) in blocks {
            let overlap = match block_region.intersect(region) {
                Some(overlap) => overlap,
                None => continue,
            };

            let piece = block.extract(
                &overlap.offset_within(&block_region)?,
                &overlap.dims_usize()?,
            )?;

            array.write(&overlap.offset_within(region)?, &piece)?;
        }

        Ok(array)
    }

    fn propagate_dirty(
        &self,
        slots: &Slots,
        input: &str,
        region: &Region,
    ) -> LFResult<Vec<(String, Region)>> {
        let frozen = slots.scalar::<bool>(FREEZE)?;

        match input {
            INPUT if frozen => {
                debug!("{} is frozen, deferring dirty {region}", self.config.name);
                self.table.defer(region.clone());
                Ok(vec![])
            }
            INPUT => Ok(self
                .invalidate(slots, region)?
                .map(|region| (OUTPUT.to_string(), region))
                .into_iter()
                .collect()),
            FREEZE if frozen => Ok(vec![]),
            FREEZE => {
                let mut dirty = Vec::new();
                for region in self.table.take_deferred() {
                    if let Some(region) = self.invalidate(slots, &region)? {
                        dirty.push((OUTPUT.to_string(), region));
                    }
                }

                Ok(dirty)
            }
            other => Err(not_found!("{} has no input {other}", self.config.name)),
        }
    }

    fn reset(&self) {
        self.clear()
    }
}
