use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, Shared};
use get_size::GetSize;
use log::{debug, trace};

use lf_error::*;
use lf_region::{BlockGrid, BlockIndex, Region};
use lf_value::Array;

pub(crate) type BlockFuture = Shared<BoxFuture<'static, LFResult<Arc<Array>>>>;

/// The version of a block's contents, bumped by every invalidation which touches it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Generation {
    epoch: u64,
    block: u64,
}

/// Counters describing the activity of a cache.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// Requests for a block which was already cached
    pub hits: u64,
    /// Requests for a block which was already being computed
    pub coalesced: u64,
    /// Requests which had to start a new block computation
    pub misses: u64,
    /// Blocks discarded because their contents changed
    pub invalidations: u64,
    /// Blocks discarded to free memory
    pub evictions: u64,
    /// The number of blocks currently cached
    pub blocks: u64,
    /// The size in bytes of the blocks currently cached
    pub bytes: u64,
}

enum Entry {
    Pending {
        generation: Generation,
        future: BlockFuture,
    },
    Ready {
        array: Arc<Array>,
        size: u64,
        tick: u64,
    },
}

/// The result of looking up a block.
pub(crate) enum Lookup {
    Ready(Arc<Array>),
    Pending(Generation, BlockFuture),
    Missing(Generation),
}

#[derive(Default)]
struct State {
    entries: HashMap<BlockIndex, Entry>,
    generations: HashMap<BlockIndex, u64>,
    epoch: u64,
    lru: BTreeMap<u64, BlockIndex>,
    tick: u64,
    stats: CacheStats,
    deferred: Vec<Region>,
}

impl State {
    fn generation(&self, index: &BlockIndex) -> Generation {
        Generation {
            epoch: self.epoch,
            block: self.generations.get(index).copied().unwrap_or_default(),
        }
    }

    fn touch(&mut self, index: &BlockIndex) {
        self.tick += 1;
        let next = self.tick;

        if let Some(Entry::Ready { tick, .. }) = self.entries.get_mut(index) {
            self.lru.remove(tick);
            *tick = next;
            self.lru.insert(next, index.clone());
        }
    }

    fn remove(&mut self, index: &BlockIndex) -> bool {
        match self.entries.remove(index) {
            Some(Entry::Ready { size, tick, .. }) => {
                self.lru.remove(&tick);
                self.stats.blocks -= 1;
                self.stats.bytes -= size;
                true
            }
            Some(Entry::Pending { .. }) => true,
            None => false,
        }
    }

    fn evict_to(&mut self, bytes: u64) -> u64 {
        let mut freed = 0;

        while self.stats.bytes > bytes {
            let Some((_, index)) = self.lru.pop_first() else {
                break;
            };

            if let Some(Entry::Ready { size, .. }) = self.entries.remove(&index) {
                trace!("evict block {index:?}");
                self.stats.blocks -= 1;
                self.stats.bytes -= size;
                self.stats.evictions += 1;
                freed += size;
            }
        }

        freed
    }
}

/// The blocks held by a cache, shared with the tasks which compute them.
#[derive(Clone, Default)]
pub(crate) struct BlockTable {
    state: Arc<Mutex<State>>,
}

impl BlockTable {
    fn state(&self) -> MutexGuard<State> {
        self.state.lock().expect("block table")
    }

    pub fn stats(&self) -> CacheStats {
        self.state().stats
    }

    /// Look up the block at `index`, recording a hit or coalesced request as appropriate.
    pub fn lookup(&self, index: &BlockIndex) -> Lookup {
        let mut state = self.state();
        let generation = state.generation(index);

        match state.entries.get(index) {
            Some(Entry::Ready { array, .. }) => {
                let array = array.clone();
                state.stats.hits += 1;
                state.touch(index);
                Lookup::Ready(array)
            }
            Some(Entry::Pending {
                generation: pending,
                future,
            }) if *pending == generation => {
                let future = future.clone();
                state.stats.coalesced += 1;
                Lookup::Pending(generation, future)
            }
            _ => Lookup::Missing(generation),
        }
    }

    /// Register a new computation of the block at `index`, unless another requester has
    /// already done so, and return the future to wait on.
    pub fn start<F>(
        &self,
        index: &BlockIndex,
        generation: Generation,
        start: F,
    ) -> Option<BlockFuture>
    where
        F: FnOnce() -> BlockFuture,
    {
        let mut state = self.state();

        if state.generation(index) != generation {
            return None;
        }

        match state.entries.get(index) {
            Some(Entry::Pending {
                generation: pending,
                future,
            }) if *pending == generation => {
                let future = future.clone();
                state.stats.coalesced += 1;
                Some(future)
            }
            Some(Entry::Ready { .. }) => None,
            _ => {
                let future = start();
                state.stats.misses += 1;
                state.entries.insert(
                    index.clone(),
                    Entry::Pending {
                        generation,
                        future: future.clone(),
                    },
                );

                Some(future)
            }
        }
    }

    /// Record the result of the computation of the block at `index` which started at
    /// `generation`. A result which is no longer current is discarded.
    pub fn complete(
        &self,
        index: &BlockIndex,
        generation: Generation,
        result: &LFResult<Arc<Array>>,
        capacity: Option<u64>,
    ) {
        let mut state = self.state();

        let current = matches!(
            state.entries.get(index),
            Some(Entry::Pending { generation: pending, .. }) if *pending == generation
        );

        if !current {
            trace!("discard a stale computation of block {index:?}");
            return;
        }

        match result {
            Ok(array) => {
                let size = Array::get_heap_size(array) as u64;

                state.tick += 1;
                let tick = state.tick;
                state.lru.insert(tick, index.clone());
                state.entries.insert(
                    index.clone(),
                    Entry::Ready {
                        array: array.clone(),
                        size,
                        tick,
                    },
                );

                state.stats.blocks += 1;
                state.stats.bytes += size;

                if let Some(capacity) = capacity {
                    state.evict_to(capacity);
                }
            }
            Err(cause) => {
                debug!("computation of block {index:?} failed: {cause}");
                state.entries.remove(index);
            }
        }
    }

    /// Return `true` if the block at `index` has not been invalidated since `generation`.
    pub fn is_current(&self, index: &BlockIndex, generation: Generation) -> bool {
        self.state().generation(index) == generation
    }

    /// Invalidate every block of `grid` which intersects `region`.
    ///
    /// Returns the number of blocks discarded.
    pub fn invalidate(&self, grid: &BlockGrid, region: &Region) -> u64 {
        let mut state = self.state();

        let stale = state
            .entries
            .keys()
            .filter(|index| grid.block_intersects(index, region))
            .cloned()
            .collect::<Vec<_>>();

        let mut invalidated = 0;
        for index in stale {
            *state.generations.entry(index.clone()).or_default() += 1;

            if state.remove(&index) {
                invalidated += 1;
            }
        }

        state.stats.invalidations += invalidated;
        invalidated
    }

    /// Invalidate every block.
    pub fn invalidate_all(&self) -> u64 {
        let mut state = self.state();

        let invalidated = state.entries.len() as u64;
        state.entries.clear();
        state.generations.clear();
        state.lru.clear();
        state.deferred.clear();
        state.epoch += 1;
        state.stats.invalidations += invalidated;
        state.stats.blocks = 0;
        state.stats.bytes = 0;

        invalidated
    }

    /// Evict cached blocks, least recently used first, until at least `bytes` are freed or
    /// nothing is left to evict. Returns the number of bytes freed.
    pub fn evict(&self, bytes: u64) -> u64 {
        let mut state = self.state();
        let target = state.stats.bytes.saturating_sub(bytes);
        state.evict_to(target)
    }

    /// Defer the invalidation of `region` until [`BlockTable::take_deferred`] is called.
    ///
    /// Deferred regions with the same axes are merged into the smallest region covering them.
    pub fn defer(&self, region: Region) {
        let mut state = self.state();

        let same_axes = state
            .deferred
            .iter_mut()
            .find(|deferred| deferred.tags() == region.tags());

        match same_axes {
            Some(deferred) => match deferred.cover(&region) {
                Ok(cover) => *deferred = cover,
                Err(cause) => debug!("cannot merge deferred {region}: {cause}"),
            },
            None => state.deferred.push(region),
        }
    }

    pub fn take_deferred(&self) -> Vec<Region> {
        std::mem::take(&mut self.state().deferred)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::{self, FutureExt};
    use lf_region::{Axis, BlockShape, Shape};

    use super::*;

    fn region(y: std::ops::Range<u64>, x: std::ops::Range<u64>) -> Region {
        Region::from_pairs([(Axis::Y, y), (Axis::X, x)]).expect("region")
    }

    fn fill(table: &BlockTable, index: &BlockIndex, capacity: Option<u64>) {
        let array = Arc::new(Array::zeros(lf_value::DType::F64, &[2, 2]));

        let generation = match table.lookup(index) {
            Lookup::Missing(generation) => generation,
            _ => panic!("block {index:?} is already present"),
        };

        let result: LFResult<Arc<Array>> = Ok(array);
        let ready = future::ready(result.clone()).boxed().shared();
        table.start(index, generation, || ready).expect("start");
        table.complete(index, generation, &result, capacity);
    }

    #[test]
    fn test_block_size_excludes_handle() {
        let table = BlockTable::default();
        fill(&table, &BlockIndex::from(vec![0, 0]), None);
        fill(&table, &BlockIndex::from(vec![0, 1]), None);

        let stats = table.stats();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.bytes, 2 * 2 * 2 * 8);

        let table = BlockTable::default();
        fill(&table, &BlockIndex::from(vec![0, 0]), Some(32));
        assert_eq!(table.stats().blocks, 1);
        assert_eq!(table.stats().evictions, 0);
    }

    #[test]
    fn test_deferred_regions_are_merged() {
        let table = BlockTable::default();
        table.defer(region(0..1, 0..1));
        table.defer(region(3..4, 2..3));
        table.defer(region(1..2, 1..2));

        assert_eq!(table.take_deferred(), vec![region(0..4, 0..3)]);
        assert!(table.take_deferred().is_empty());

        table.defer(region(0..1, 0..1));
        let grid = BlockGrid::new(
            "y=4,x=4".parse::<Shape>().expect("shape"),
            &"y=2,x=2".parse::<BlockShape>().expect("block shape"),
        );

        fill(&table, &BlockIndex::from(vec![0, 0]), None);
        assert_eq!(table.invalidate(&grid, &region(0..1, 0..1)), 1);

        table.invalidate_all();
        assert!(table.take_deferred().is_empty());
    }
}
