use std::collections::BTreeMap;
use std::ops::Range;

use async_trait::async_trait;

use lf_error::*;
use lf_graph::{Context, Metadata, Operator, Schema, SlotSpec, Slots};
use lf_region::{AxisRange, Region, Shape};
use lf_value::{Array, ScalarType};

pub const INPUT: &str = "Input";
pub const FACTOR: &str = "Factor";
pub const OUTPUT: &str = "Output";

const DEFAULT_FACTOR: i64 = 2;

/// Downsamples the spatial axes of its input by taking every `Factor`th element.
///
/// Non-spatial axes (`t` and `c`) are passed through unchanged.
pub struct OpDownsample {
    schema: Schema,
}

impl OpDownsample {
    pub fn new() -> LFResult<Self> {
        let schema = Schema::new([
            SlotSpec::input(INPUT),
            SlotSpec::scalar(FACTOR, ScalarType::Int).with_default(DEFAULT_FACTOR),
            SlotSpec::output(OUTPUT),
        ])?;

        Ok(Self { schema })
    }

    fn factors(slots: &Slots, shape: &Shape) -> LFResult<Vec<u64>> {
        let factor = slots.scalar::<u64>(FACTOR)?;

        if factor == 0 {
            return Err(bad_request!("downsampling factor must be positive"));
        }

        Ok(shape
            .tags()
            .iter()
            .map(|axis| if axis.is_spatial() { factor } else { 1 })
            .collect())
    }
}

#[async_trait]
impl Operator for OpDownsample {
    fn name(&self) -> &str {
        "Downsample"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn setup_metadata(&self, slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
        let input = slots.metadata(INPUT)?;
        let factors = Self::factors(slots, input.shape())?;

        let dims = input
            .shape()
            .dims()
            .iter()
            .zip(&factors)
            .map(|(dim, factor)| dim.div_ceil(*factor))
            .collect();

        let shape = Shape::new(input.tags().clone(), dims)?;
        let output = Metadata::new(input.dtype(), shape);

        Ok(BTreeMap::from([(OUTPUT.to_string(), output)]))
    }

    async fn compute(&self, cxt: &Context, _output: &str, region: &Region) -> LFResult<Array> {
        let input = cxt.metadata(INPUT)?;
        let factors = Self::factors(&cxt.slots(), input.shape())?;

        let source = region
            .bounds()
            .zip(&factors)
            .zip(input.shape().dims())
            .map(|((range, factor), dim)| {
                let range = range.ok_or_else(|| bad_request!("unbounded region {region}"))?;
                let start = (range.start * factor).min(*dim);

                let stop = if range.is_empty() {
                    start
                } else {
                    (range.end - 1) * factor + 1
                };

                Ok(AxisRange::In(start..stop))
            })
            .collect::<LFResult<Vec<_>>>()?;

        let source = Region::new(region.tags().clone(), source)?;
        let array = cxt.read(INPUT, source).await?;

        let offset = vec![0; region.ndim()];
        let step = factors
            .iter()
            .map(|factor| usize::try_from(*factor).map_err(|cause| bad_request!("{cause}")))
            .collect::<LFResult<Vec<usize>>>()?;

        array.extract_strided(&offset, &region.dims_usize()?, &step)
    }

    fn propagate_dirty(
        &self,
        slots: &Slots,
        input: &str,
        region: &Region,
    ) -> LFResult<Vec<(String, Region)>> {
        let output = match slots.metadata(OUTPUT) {
            Ok(output) => output,
            // an output which is not ready has nothing downstream to invalidate
            Err(cause) if cause.code() == ErrorType::NotReady => return Ok(vec![]),
            Err(cause) => return Err(cause),
        };

        if input != INPUT {
            return Ok(vec![(OUTPUT.to_string(), Region::all(output.tags().clone()))]);
        }

        let factors = Self::factors(slots, output.shape())?;
        let region = region.project(output.tags());

        let axes = region
            .axes()
            .iter()
            .zip(&factors)
            .map(|(range, factor)| match range {
                AxisRange::In(range) => AxisRange::In(shrink(range, *factor)),
                AxisRange::All => AxisRange::All,
            })
            .collect();

        let dirty = Region::new(region.tags().clone(), axes)?;
        Ok(vec![(OUTPUT.to_string(), dirty)])
    }
}

/// The range of output coordinates which can depend on the given range of input coordinates.
fn shrink(range: &Range<u64>, factor: u64) -> Range<u64> {
    (range.start / factor)..range.end.div_ceil(factor)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lf_graph::{Executor, Graph};
    use lf_region::Axis;

    use super::*;

    #[tokio::test]
    async fn test_downsample() {
        let graph = Graph::new(Executor::current().expect("executor"));
        let op = graph
            .add_operator(Arc::new(OpDownsample::new().expect("op")))
            .await
            .expect("add");

        let data = Array::from_vec(&[5, 5, 2], (0..50u16).collect()).expect("array");
        graph
            .set_array(op.slot(INPUT), "yxc".parse().expect("tags"), data)
            .await
            .expect("input");

        let meta = graph.metadata(&op.slot(OUTPUT)).await.expect("meta");
        assert_eq!(meta.shape().dims(), &[3, 3, 2]);

        let region = Region::from_pairs([(Axis::Y, 1..3), (Axis::X, 2..3), (Axis::C, 1..2)])
            .expect("region");

        let array = graph.read(&op.slot(OUTPUT), region).await.expect("read");
        assert_eq!(array.shape(), &[2, 1, 1]);

        // input coordinates (2, 4, 1) and (4, 4, 1)
        assert_eq!(array.to_f64_vec(), vec![29., 49.]);
    }

    #[tokio::test]
    async fn test_set_factor_before_input() {
        let graph = Graph::new(Executor::current().expect("executor"));
        let op = graph
            .add_operator(Arc::new(OpDownsample::new().expect("op")))
            .await
            .expect("add");

        graph.set_scalar(op.slot(FACTOR), 3i64).await.expect("factor");
        assert!(!graph.is_ready(&op.slot(OUTPUT)).await);

        let data = Array::from_vec(&[5, 5, 2], (0..50u16).collect()).expect("array");
        graph
            .set_array(op.slot(INPUT), "yxc".parse().expect("tags"), data)
            .await
            .expect("input");

        let meta = graph.metadata(&op.slot(OUTPUT)).await.expect("meta");
        assert_eq!(meta.shape().dims(), &[2, 2, 2]);
    }

    #[test]
    fn test_shrink() {
        assert_eq!(shrink(&(0..4), 2), 0..2);
        assert_eq!(shrink(&(3..4), 2), 1..2);
        assert_eq!(shrink(&(5..9), 4), 1..3);
    }
}
