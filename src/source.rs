//! Leaf operators which read from an external [`DataSource`].

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use log::debug;

use lf_error::*;
use lf_graph::{Context, Metadata, Operator, Schema, SlotSpec, Slots};
use lf_region::{AxisTags, Region, Shape};
use lf_value::{Array, DType};

pub const OUTPUT: &str = "Output";

/// An external provider of N-dimensional array data.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// The full extent of the data.
    fn full_shape(&self) -> Shape;

    /// The element type of the data.
    fn dtype(&self) -> DType;

    /// Read the given bounded `region`, which lies within [`DataSource::full_shape`].
    async fn read_region(&self, region: &Region) -> LFResult<Array>;
}

/// An operator with no inputs whose single output reads from a [`DataSource`].
pub struct OpSource<S> {
    name: String,
    schema: Schema,
    source: S,
}

impl<S: DataSource> OpSource<S> {
    pub fn new<N: Into<String>>(name: N, source: S) -> LFResult<Self> {
        Ok(Self {
            name: name.into(),
            schema: Schema::new([SlotSpec::output(OUTPUT)])?,
            source,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: DataSource> Operator for OpSource<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn setup_metadata(&self, _slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
        let shape = self.source.full_shape();
        shape.validate()?;

        let meta = Metadata::new(self.source.dtype(), shape);
        Ok(BTreeMap::from([(OUTPUT.to_string(), meta)]))
    }

    async fn compute(&self, _cxt: &Context, _output: &str, region: &Region) -> LFResult<Array> {
        self.source
            .read_region(region)
            .await
            .map_err(|cause| match cause.code() {
                ErrorType::RegionOutOfBounds | ErrorType::UpstreamComputeFailure => cause,
                _ => LFError::upstream(cause),
            })
    }
}

/// A [`DataSource`] backed by an in-memory [`Array`] which can be overwritten in place.
pub struct ArraySource {
    shape: Shape,
    data: RwLock<Array>,
}

impl ArraySource {
    pub fn new(tags: AxisTags, data: Array) -> LFResult<Self> {
        let dims = data.shape().iter().map(|dim| *dim as u64).collect();
        let shape = Shape::new(tags, dims)?;
        shape.validate()?;

        Ok(Self {
            shape,
            data: RwLock::new(data),
        })
    }

    /// Overwrite `region` with `data`.
    ///
    /// The caller is responsible for reporting the region as dirty to the graph.
    pub fn write(&self, region: &Region, data: &Array) -> LFResult<()> {
        let region = region.resolve(&self.shape)?;

        if data.shape() != region.dims_usize()?.as_slice() {
            return Err(bad_request!(
                "cannot write {data:?} to {region} of an array source"
            ));
        }

        debug!("write {data:?} to {region} of an array source");

        let offset = region.offset_within(&Region::of(&self.shape))?;
        let mut array = self.data.write().expect("array source");
        array.write(&offset, data)
    }
}

#[async_trait]
impl DataSource for ArraySource {
    fn full_shape(&self) -> Shape {
        self.shape.clone()
    }

    fn dtype(&self) -> DType {
        self.data.read().expect("array source").dtype()
    }

    async fn read_region(&self, region: &Region) -> LFResult<Array> {
        let offset = region.offset_within(&Region::of(&self.shape))?;
        let dims = region.dims_usize()?;

        let array = self.data.read().expect("array source");
        array.extract(&offset, &dims)
    }
}

/// A deterministic procedural [`DataSource`], for demonstrations and tests.
///
/// The element at each coordinate is a hash of the coordinate and a seed, modulo 256.
pub struct SyntheticSource {
    shape: Shape,
    dtype: DType,
    seed: u64,
}

impl SyntheticSource {
    pub fn new(shape: Shape, dtype: DType, seed: u64) -> LFResult<Self> {
        shape.validate()?;
        Ok(Self { shape, dtype, seed })
    }

    /// The value of the element at the given coordinate.
    pub fn value_at(&self, coord: &[u64]) -> f64 {
        let mut hash = self.seed ^ 0x9e37_79b9_7f4a_7c15;

        for (i, n) in coord.iter().enumerate() {
            hash ^= n.wrapping_add(i as u64).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            hash = hash.rotate_left(27).wrapping_mul(0x94d0_49bb_1331_11eb);
        }

        (hash >> 56) as f64
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    fn full_shape(&self) -> Shape {
        self.shape.clone()
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    async fn read_region(&self, region: &Region) -> LFResult<Array> {
        let region = region.resolve(&self.shape)?;
        let offset = region.offset();
        let dims = region.dims()?;

        let size = usize::try_from(region.size()?)
            .map_err(|cause| bad_request!("{region} is too large to read: {cause}"))?;

        let mut data = Vec::with_capacity(size);
        let mut coord = offset.clone();

        for _ in 0..size {
            data.push(self.value_at(&coord));

            // advance the coordinate in row-major order
            for axis in (0..coord.len()).rev() {
                coord[axis] += 1;

                if coord[axis] < offset[axis] + dims[axis] {
                    break;
                } else {
                    coord[axis] = offset[axis];
                }
            }
        }

        Array::from_f64_vec(self.dtype, &region.dims_usize()?, data)
    }
}

#[cfg(test)]
mod tests {
    use lf_region::Axis;

    use super::*;

    #[tokio::test]
    async fn test_array_source() {
        let data = Array::from_vec(&[2, 3], (0..6u32).collect()).expect("array");
        let source = ArraySource::new("yx".parse().expect("tags"), data).expect("source");
        assert_eq!(source.full_shape().dims(), &[2, 3]);
        assert_eq!(source.dtype(), DType::U32);

        let region = Region::from_pairs([(Axis::Y, 1..2), (Axis::X, 1..3)]).expect("region");
        let patch = Array::from_vec(&[1, 2], vec![10u32, 11]).expect("patch");
        source.write(&region, &patch).expect("write");

        let all = Region::of(&source.full_shape());
        let array = source.read_region(&all).await.expect("read");
        assert_eq!(array.to_f64_vec(), vec![0., 1., 2., 3., 10., 11.]);

        let wrong = Array::from_vec(&[1, 2], vec![1u8, 2]).expect("patch");
        assert!(source.write(&region, &wrong).is_err());
    }

    #[tokio::test]
    async fn test_synthetic_source_is_deterministic() {
        let shape: Shape = "z=3,y=4,x=5".parse().expect("shape");
        let source = SyntheticSource::new(shape.clone(), DType::U8, 7).expect("source");

        let all = source.read_region(&Region::of(&shape)).await.expect("read");
        let part = Region::from_pairs([(Axis::Z, 1..3), (Axis::Y, 2..3), (Axis::X, 0..5)])
            .expect("region");

        let sub = source.read_region(&part).await.expect("read");
        let expected = all
            .extract(&[1, 2, 0], &[2, 1, 5])
            .expect("extract");

        assert_eq!(sub, expected);
        assert_eq!(sub.to_f64_vec()[0], source.value_at(&[1, 2, 0]));
        assert!(all.to_f64_vec().iter().all(|n| *n < 256.));
    }
}
