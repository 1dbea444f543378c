use std::{cmp, fmt, ops};

use lf_error::*;

use super::shape::to_usize;
use super::{Axis, AxisTags, Shape};

/// The range of a [`Region`] along a single axis.
#[derive(Clone, Eq, PartialEq, Hash)]
pub enum AxisRange {
    /// The half-open range `[start, stop)`
    In(ops::Range<u64>),
    /// The whole axis, whatever its extent turns out to be
    All,
}

impl AxisRange {
    /// Resolve this range against the extent of its axis.
    pub fn resolve(&self, dim: u64) -> ops::Range<u64> {
        match self {
            Self::In(range) => range.clone(),
            Self::All => 0..dim,
        }
    }

    fn as_range(&self) -> Option<&ops::Range<u64>> {
        match self {
            Self::In(range) => Some(range),
            Self::All => None,
        }
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::All, that) => Some(that.clone()),
            (this, Self::All) => Some(this.clone()),
            (Self::In(this), Self::In(that)) => {
                let start = cmp::max(this.start, that.start);
                let stop = cmp::min(this.end, that.end);

                if start < stop {
                    Some(Self::In(start..stop))
                } else {
                    None
                }
            }
        }
    }

    fn cover(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::In(this), Self::In(that)) if this.is_empty() => Self::In(that.clone()),
            (Self::In(this), Self::In(that)) if that.is_empty() => Self::In(this.clone()),
            (Self::In(this), Self::In(that)) => {
                Self::In(cmp::min(this.start, that.start)..cmp::max(this.end, that.end))
            }
            _ => Self::All,
        }
    }

    fn contains(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::All, _) => true,
            (Self::In(_), Self::All) => false,
            (Self::In(_), Self::In(that)) if that.is_empty() => true,
            (Self::In(this), Self::In(that)) => this.start <= that.start && that.end <= this.end,
        }
    }
}

impl From<ops::Range<u64>> for AxisRange {
    fn from(range: ops::Range<u64>) -> Self {
        Self::In(range)
    }
}

impl fmt::Debug for AxisRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for AxisRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::In(range) => write!(f, "[{}, {})", range.start, range.end),
            Self::All => f.write_str("[:]"),
        }
    }
}

/// An axis-aligned box within an N-dimensional domain: the unit of request and invalidation.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Region {
    tags: AxisTags,
    axes: Vec<AxisRange>,
}

impl Region {
    /// Construct a new `Region` with the given `tags` and per-axis ranges.
    pub fn new(tags: AxisTags, axes: Vec<AxisRange>) -> LFResult<Self> {
        if tags.len() != axes.len() {
            return Err(bad_request!(
                "cannot construct a region with axes {tags} from {axes:?}"
            ));
        }

        for (axis, range) in tags.iter().zip(&axes) {
            if let AxisRange::In(range) = range {
                if range.start > range.end {
                    return Err(bad_request!("invalid range {range:?} for axis {axis}"));
                }
            }
        }

        Ok(Self { tags, axes })
    }

    /// Construct a new bounded `Region` from `(tag, range)` pairs, in order.
    pub fn from_pairs<I>(pairs: I) -> LFResult<Self>
    where
        I: IntoIterator<Item = (Axis, ops::Range<u64>)>,
    {
        let (tags, axes): (Vec<Axis>, Vec<AxisRange>) = pairs
            .into_iter()
            .map(|(axis, range)| (axis, AxisRange::In(range)))
            .unzip();

        Self::new(AxisTags::new(tags)?, axes)
    }

    /// A `Region` spanning the whole of every axis in `tags`, pending their extents.
    pub fn all(tags: AxisTags) -> Self {
        let axes = vec![AxisRange::All; tags.len()];
        Self { tags, axes }
    }

    /// The bounded `Region` spanning the whole of the given [`Shape`].
    pub fn of(shape: &Shape) -> Self {
        Self {
            tags: shape.tags().clone(),
            axes: shape.dims().iter().map(|dim| AxisRange::In(0..*dim)).collect(),
        }
    }

    pub fn tags(&self) -> &AxisTags {
        &self.tags
    }

    pub fn axes(&self) -> &[AxisRange] {
        &self.axes
    }

    /// The range of the given `axis`, if present.
    pub fn get(&self, axis: Axis) -> Option<&AxisRange> {
        self.tags.index_of(axis).map(|i| &self.axes[i])
    }

    /// Iterate over the bounded ranges of this `Region`, or `None` for unbounded axes.
    pub fn bounds(&self) -> impl Iterator<Item = Option<&ops::Range<u64>>> + '_ {
        self.axes.iter().map(AxisRange::as_range)
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// Return `true` if every axis of this `Region` is bounded.
    pub fn is_bounded(&self) -> bool {
        self.axes.iter().all(|range| range.as_range().is_some())
    }

    /// Return `true` if this `Region` contains no elements.
    pub fn is_empty(&self) -> bool {
        self.bounds().any(|range| range.map(|r| r.is_empty()).unwrap_or(false))
    }

    /// Resolve the unbounded axes of this `Region` against `shape`, and check that the
    /// result fits within it.
    pub fn resolve(&self, shape: &Shape) -> LFResult<Self> {
        if self.tags != *shape.tags() {
            return Err(type_mismatch!(
                "region {self} has different axes than shape {shape}"
            ));
        }

        let axes = self
            .axes
            .iter()
            .zip(shape.dims())
            .map(|(range, dim)| AxisRange::In(range.resolve(*dim)))
            .collect();

        let resolved = Self {
            tags: self.tags.clone(),
            axes,
        };

        shape.validate_region(&resolved)?;

        Ok(resolved)
    }

    /// The start of each axis. Unbounded axes start at zero.
    pub fn offset(&self) -> Vec<u64> {
        self.bounds()
            .map(|range| range.map(|r| r.start).unwrap_or(0))
            .collect()
    }

    /// The extent of each axis, or an error if this `Region` is unbounded.
    pub fn dims(&self) -> LFResult<Vec<u64>> {
        self.bounds()
            .zip(self.tags.iter())
            .map(|(range, axis)| {
                range
                    .map(|r| r.end - r.start)
                    .ok_or_else(|| bad_request!("axis {axis} of {self} is unbounded"))
            })
            .collect()
    }

    /// The [`Shape`] of an array covering this `Region`.
    pub fn shape(&self) -> LFResult<Shape> {
        self.dims().and_then(|dims| Shape::new(self.tags.clone(), dims))
    }

    /// The number of elements in this `Region`.
    pub fn size(&self) -> LFResult<u64> {
        self.dims().map(|dims| dims.iter().product())
    }

    /// The intersection of this `Region` with `other`, or `None` if they are disjoint.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.tags != other.tags {
            return None;
        }

        let axes = self
            .axes
            .iter()
            .zip(&other.axes)
            .map(|(this, that)| this.intersect(that))
            .collect::<Option<Vec<AxisRange>>>()?;

        Some(Self {
            tags: self.tags.clone(),
            axes,
        })
    }

    /// Return `true` if this `Region` and `other` share at least one element.
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// The smallest `Region` which contains both this `Region` and `other`.
    pub fn cover(&self, other: &Self) -> LFResult<Self> {
        if self.tags != other.tags {
            return Err(type_mismatch!(
                "cannot cover {self} and {other} since their axes differ"
            ));
        }

        let axes = self
            .axes
            .iter()
            .zip(&other.axes)
            .map(|(this, that)| this.cover(that))
            .collect();

        Ok(Self {
            tags: self.tags.clone(),
            axes,
        })
    }

    /// Return `true` if `other` lies entirely within this `Region`.
    pub fn contains(&self, other: &Self) -> bool {
        self.tags == other.tags
            && self
                .axes
                .iter()
                .zip(&other.axes)
                .all(|(this, that)| this.contains(that))
    }

    /// Project this `Region` onto the given `tags`: shared axes keep their range, in the
    /// order of `tags`, and axes this `Region` lacks span their whole extent.
    pub fn project(&self, tags: &AxisTags) -> Self {
        let axes = tags
            .iter()
            .map(|axis| self.get(*axis).cloned().unwrap_or(AxisRange::All))
            .collect();

        Self {
            tags: tags.clone(),
            axes,
        }
    }

    /// The offset of this bounded `Region` relative to the start of `outer`, as `usize`s.
    pub fn offset_within(&self, outer: &Self) -> LFResult<Vec<usize>> {
        if !outer.contains(self) {
            return Err(out_of_bounds!("{outer} does not contain {self}"));
        }

        let relative = self
            .offset()
            .into_iter()
            .zip(outer.offset())
            .map(|(inner, outer)| inner - outer)
            .collect::<Vec<u64>>();

        to_usize(&relative)
    }

    /// The dimensions of this bounded `Region` as `usize`s, for allocation.
    pub fn dims_usize(&self) -> LFResult<Vec<usize>> {
        self.dims().and_then(|dims| to_usize(&dims))
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("{")?;

        for (i, (axis, range)) in self.tags.iter().zip(&self.axes).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }

            write!(f, "{axis}: {range}")?;
        }

        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: ops::Range<u64>, y: ops::Range<u64>) -> Region {
        Region::from_pairs([(Axis::X, x), (Axis::Y, y)]).expect("region")
    }

    #[test]
    fn test_intersect() {
        let a = region(0..10, 0..10);
        let b = region(5..15, 8..20);
        assert_eq!(a.intersect(&b), Some(region(5..10, 8..10)));
        assert_eq!(a.intersect(&region(10..12, 0..10)), None);

        let all = Region::all(a.tags().clone());
        assert_eq!(all.intersect(&b), Some(b.clone()));
    }

    #[test]
    fn test_cover_and_contains() {
        let a = region(0..4, 2..3);
        let b = region(6..8, 0..1);
        let cover = a.cover(&b).expect("cover");
        assert_eq!(cover, region(0..8, 0..3));
        assert!(cover.contains(&a));
        assert!(cover.contains(&b));
        assert!(!a.contains(&cover));
    }

    #[test]
    fn test_resolve_and_project() {
        let shape = Shape::from_pairs([(Axis::X, 20), (Axis::Y, 30)]).expect("shape");
        let tags = shape.tags().clone();

        let resolved = Region::all(tags.clone()).resolve(&shape).expect("resolve");
        assert_eq!(resolved, region(0..20, 0..30));

        let err = region(0..21, 0..1).resolve(&shape).expect_err("too big");
        assert_eq!(err.code(), ErrorType::RegionOutOfBounds);

        let xyc: AxisTags = "yxc".parse().expect("tags");
        let projected = region(1..2, 3..4).project(&xyc);
        assert_eq!(projected.axes(), &[(3..4).into(), (1..2).into(), AxisRange::All]);
    }

    #[test]
    fn test_offset_within() {
        let outer = region(100..400, 100..400);
        let inner = region(256..400, 100..256);
        assert_eq!(inner.offset_within(&outer).expect("offset"), vec![156, 0]);
        assert!(outer.offset_within(&inner).is_err());
    }
}
