use std::fmt;
use std::str::FromStr;

use lf_error::*;

use super::{Axis, AxisTags, Region};

/// The shape of an N-dimensional array: an extent for each of an ordered set of [`Axis`] tags.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Shape {
    tags: AxisTags,
    dims: Vec<u64>,
}

impl Shape {
    /// Construct a new `Shape`, or return an error if `tags` and `dims` differ in length.
    pub fn new(tags: AxisTags, dims: Vec<u64>) -> LFResult<Self> {
        if tags.len() == dims.len() {
            Ok(Self { tags, dims })
        } else {
            Err(bad_request!(
                "cannot construct a shape with tags {tags} from dimensions {dims:?}"
            ))
        }
    }

    /// Construct a new `Shape` from `(tag, extent)` pairs, in order.
    pub fn from_pairs<I: IntoIterator<Item = (Axis, u64)>>(pairs: I) -> LFResult<Self> {
        let (tags, dims): (Vec<Axis>, Vec<u64>) = pairs.into_iter().unzip();
        AxisTags::new(tags).map(|tags| Self { tags, dims })
    }

    pub fn tags(&self) -> &AxisTags {
        &self.tags
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    /// The extent of the given `axis`, if present.
    pub fn get(&self, axis: Axis) -> Option<u64> {
        self.tags.index_of(axis).map(|i| self.dims[i])
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Iterate over the `(tag, extent)` pairs of this `Shape`.
    pub fn iter(&self) -> impl Iterator<Item = (Axis, u64)> + '_ {
        self.tags.iter().copied().zip(self.dims.iter().copied())
    }

    /// The number of elements in an array of this `Shape`.
    pub fn size(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Return `true` if the given bounded [`Region`] fits within this `Shape`.
    pub fn contains(&self, region: &Region) -> bool {
        region.tags() == &self.tags
            && region
                .bounds()
                .zip(&self.dims)
                .all(|(bound, dim)| bound.map(|range| range.end <= *dim).unwrap_or(true))
    }

    /// Return an error if this `Shape` has no axes or is too large to address.
    pub fn validate(&self) -> LFResult<()> {
        if self.dims.is_empty() {
            return Err(bad_request!("invalid shape {self}"));
        }

        let mut size = 1u64;
        for dim in self.dims.iter().copied() {
            size = size
                .checked_mul(dim)
                .ok_or_else(|| bad_request!("shape {self} exceeds the maximum size of 2^64"))?;
        }

        usize::try_from(size)
            .map(|_| ())
            .map_err(|cause| bad_request!("shape {self} is too large to allocate: {cause}"))
    }

    /// Return a `RegionOutOfBounds` error if the given [`Region`] doesn't fit this `Shape`.
    pub fn validate_region(&self, region: &Region) -> LFResult<()> {
        if region.tags() != &self.tags {
            Err(type_mismatch!(
                "region {region} has different axes than shape {self}"
            ))
        } else if self.contains(region) {
            Ok(())
        } else {
            Err(out_of_bounds!("shape {self} does not contain {region}"))
        }
    }

    /// The dimensions of this `Shape` as `usize`s, for allocation.
    pub fn to_usize(&self) -> LFResult<Vec<usize>> {
        to_usize(&self.dims)
    }
}

pub(crate) fn to_usize(values: &[u64]) -> LFResult<Vec<usize>> {
    values
        .iter()
        .copied()
        .map(|n| usize::try_from(n).map_err(|cause| bad_request!("invalid index {n}: {cause}")))
        .collect()
}

impl FromStr for Shape {
    type Err = LFError;

    fn from_str(s: &str) -> LFResult<Self> {
        super::parse_pairs(s).and_then(Self::from_pairs)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("{")?;

        for (i, (axis, dim)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }

            write!(f, "{axis}: {dim}")?;
        }

        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape() {
        let shape: Shape = "t=1, y=512, x=256".parse().expect("shape");
        assert_eq!(shape.dims(), &[1, 512, 256]);
        assert_eq!(shape.get(Axis::X), Some(256));
        assert_eq!(shape.get(Axis::C), None);
        assert_eq!(shape.size(), 512 * 256);
        assert_eq!(shape.to_string(), "{t: 1, y: 512, x: 256}");

        assert!("x=1,x=2".parse::<Shape>().is_err());
    }

    #[test]
    fn test_validate_region() {
        let shape: Shape = "y=10,x=10".parse().expect("shape");

        let region = Region::from_pairs([(Axis::Y, 0..10), (Axis::X, 5..10)]).expect("region");
        assert!(shape.validate_region(&region).is_ok());

        let region = Region::from_pairs([(Axis::Y, 0..10), (Axis::X, 5..11)]).expect("region");
        let err = shape.validate_region(&region).expect_err("out of bounds");
        assert_eq!(err.code(), ErrorType::RegionOutOfBounds);

        let region = Region::from_pairs([(Axis::X, 0..1), (Axis::Y, 0..1)]).expect("region");
        let err = shape.validate_region(&region).expect_err("wrong axes");
        assert_eq!(err.code(), ErrorType::TypeMismatch);
    }
}
