use std::collections::BTreeMap;
use std::str::FromStr;
use std::{fmt, ops};

use itertools::Itertools;

use lf_error::*;

use super::{Axis, AxisRange, Region, Shape};

/// The extent of a cache block along each tagged axis.
///
/// Axes which are not present span the whole extent of the domain.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct BlockShape(BTreeMap<Axis, u64>);

impl BlockShape {
    pub fn new<I: IntoIterator<Item = (Axis, u64)>>(dims: I) -> LFResult<Self> {
        let mut block_shape = BTreeMap::new();

        for (axis, dim) in dims {
            if dim == 0 {
                return Err(bad_request!("block extent of axis {axis} must be positive"));
            } else if block_shape.insert(axis, dim).is_some() {
                return Err(bad_request!("axis {axis} is repeated in block shape"));
            }
        }

        Ok(Self(block_shape))
    }

    /// The block extent of the given `axis`, if restricted.
    pub fn get(&self, axis: Axis) -> Option<u64> {
        self.0.get(&axis).copied()
    }

    /// The block extent of each axis of `domain`, in order.
    pub fn resolve(&self, domain: &Shape) -> Vec<u64> {
        domain
            .iter()
            .map(|(axis, dim)| self.get(axis).unwrap_or(dim).min(dim).max(1))
            .collect()
    }
}

impl FromStr for BlockShape {
    type Err = LFError;

    fn from_str(s: &str) -> LFResult<Self> {
        super::parse_pairs(s).and_then(Self::new)
    }
}

impl fmt::Debug for BlockShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("{")?;

        for (i, (axis, dim)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }

            write!(f, "{axis}: {dim}")?;
        }

        f.write_str("}")
    }
}

/// The coordinate of a block within a [`BlockGrid`], in the order of the domain's axes.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockIndex(Vec<u64>);

impl ops::Deref for BlockIndex {
    type Target = [u64];

    fn deref(&self) -> &[u64] {
        &self.0
    }
}

impl From<Vec<u64>> for BlockIndex {
    fn from(coord: Vec<u64>) -> Self {
        Self(coord)
    }
}

impl fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A domain [`Shape`] partitioned into blocks of a fixed shape.
#[derive(Clone, Eq, PartialEq)]
pub struct BlockGrid {
    domain: Shape,
    block: Vec<u64>,
}

impl BlockGrid {
    pub fn new(domain: Shape, block_shape: &BlockShape) -> Self {
        let block = block_shape.resolve(&domain);
        Self { domain, block }
    }

    pub fn domain(&self) -> &Shape {
        &self.domain
    }

    /// The extent of a (non-edge) block along each axis.
    pub fn block_dims(&self) -> &[u64] {
        &self.block
    }

    /// The number of blocks along each axis.
    pub fn grid_dims(&self) -> Vec<u64> {
        self.domain
            .dims()
            .iter()
            .zip(&self.block)
            .map(|(dim, block)| dim.div_ceil(*block))
            .collect()
    }

    /// The total number of blocks in this grid.
    pub fn len(&self) -> u64 {
        self.grid_dims().into_iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The range of block coordinates along each axis covering the given `region`:
    /// `floor(start / block)` to `ceil(stop / block)`.
    pub fn covering(&self, region: &Region) -> LFResult<Vec<ops::Range<u64>>> {
        let region = region.resolve(&self.domain)?;

        Ok(region
            .axes()
            .iter()
            .zip(&self.block)
            .map(|(range, block)| match range {
                AxisRange::In(range) if range.is_empty() => 0..0,
                AxisRange::In(range) => (range.start / block)..range.end.div_ceil(*block),
                AxisRange::All => unreachable!("resolved region with an unbounded axis"),
            })
            .collect())
    }

    /// Iterate over the indices of every block which `region` touches, in lexicographic
    /// order (the last axis varies fastest).
    pub fn blocks(&self, region: &Region) -> LFResult<impl Iterator<Item = BlockIndex>> {
        let covering = self.covering(region)?;

        Ok(covering
            .into_iter()
            .multi_cartesian_product()
            .map(BlockIndex::from))
    }

    /// The [`Region`] of the block at `index`, clipped to the domain.
    pub fn block_region(&self, index: &BlockIndex) -> LFResult<Region> {
        if index.len() != self.block.len() {
            return Err(bad_request!(
                "block index {index:?} does not match a grid with {} axes",
                self.block.len()
            ));
        }

        let axes = index
            .iter()
            .zip(&self.block)
            .zip(self.domain.dims())
            .map(|((i, block), dim)| {
                let start = i * block;
                if start < *dim {
                    Ok(AxisRange::In(start..((i + 1) * block).min(*dim)))
                } else {
                    Err(out_of_bounds!("block {index:?} lies outside {}", self.domain))
                }
            })
            .collect::<LFResult<Vec<AxisRange>>>()?;

        Region::new(self.domain.tags().clone(), axes)
    }

    /// Return `true` if the block at `index` intersects `region`.
    pub fn block_intersects(&self, index: &BlockIndex, region: &Region) -> bool {
        match self.block_region(index) {
            Ok(block) => block.intersects(region),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for BlockGrid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "grid of {:?} blocks over {}",
            self.block, self.domain
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> BlockGrid {
        let domain = Shape::from_pairs([(Axis::X, 512), (Axis::Y, 512)]).expect("shape");
        let block_shape = BlockShape::new([(Axis::X, 256), (Axis::Y, 256)]).expect("block");
        BlockGrid::new(domain, &block_shape)
    }

    #[test]
    fn test_blocks_in_order() {
        let grid = grid();
        let region =
            Region::from_pairs([(Axis::X, 100..400), (Axis::Y, 100..400)]).expect("region");

        let blocks = grid.blocks(&region).expect("blocks").collect::<Vec<_>>();
        assert_eq!(
            blocks,
            vec![
                BlockIndex::from(vec![0, 0]),
                BlockIndex::from(vec![0, 1]),
                BlockIndex::from(vec![1, 0]),
                BlockIndex::from(vec![1, 1]),
            ]
        );

        let aligned = Region::from_pairs([(Axis::X, 0..256), (Axis::Y, 256..512)]).expect("region");
        let blocks = grid.blocks(&aligned).expect("blocks").collect::<Vec<_>>();
        assert_eq!(blocks, vec![BlockIndex::from(vec![0, 1])]);
    }

    #[test]
    fn test_missing_axes_span_domain() {
        let domain: Shape = "t=3,y=100,x=100,c=2".parse().expect("shape");
        let block_shape: BlockShape = "t=1,x=64,y=64".parse().expect("block shape");
        let grid = BlockGrid::new(domain, &block_shape);

        assert_eq!(grid.block_dims(), &[1, 64, 64, 2]);
        assert_eq!(grid.grid_dims(), vec![3, 2, 2, 1]);
        assert_eq!(grid.len(), 12);

        let edge = grid
            .block_region(&BlockIndex::from(vec![2, 1, 1, 0]))
            .expect("edge block");

        assert_eq!(edge.dims().expect("dims"), vec![1, 36, 36, 2]);
        assert!(grid.block_region(&BlockIndex::from(vec![3, 0, 0, 0])).is_err());
    }

    #[test]
    fn test_full_region_covers_grid() {
        let grid = grid();
        let all = Region::all(grid.domain().tags().clone());
        assert_eq!(grid.blocks(&all).expect("blocks").count(), 4);
    }
}
