use std::collections::BTreeMap;

use async_trait::async_trait;

use lf_error::*;
use lf_graph::{Context, Metadata, Operator, Schema, SlotSpec, Slots};
use lf_region::Region;
use lf_value::{Array, ScalarType};

pub const INPUT: &str = "Input";
pub const MIN: &str = "Min";
pub const MAX: &str = "Max";
pub const OUTPUT: &str = "Output";

/// Masks out (sets to zero) every element which falls outside the range `[Min, Max]`.
///
/// An unset bound does not restrict the range.
pub struct OpThreshold {
    schema: Schema,
}

impl OpThreshold {
    pub fn new() -> LFResult<Self> {
        let schema = Schema::new([
            SlotSpec::input(INPUT),
            SlotSpec::scalar(MIN, ScalarType::Float).optional(),
            SlotSpec::scalar(MAX, ScalarType::Float).optional(),
            SlotSpec::output(OUTPUT),
        ])?;

        Ok(Self { schema })
    }

    fn bound(cxt: &Context, name: &str) -> LFResult<Option<f64>> {
        if cxt.slots().is_ready(name) {
            cxt.scalar(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl Operator for OpThreshold {
    fn name(&self) -> &str {
        "Threshold"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn setup_metadata(&self, slots: &Slots) -> LFResult<BTreeMap<String, Metadata>> {
        let input = slots.metadata(INPUT)?;
        Ok(BTreeMap::from([(OUTPUT.to_string(), input)]))
    }

    async fn compute(&self, cxt: &Context, _output: &str, region: &Region) -> LFResult<Array> {
        let min = Self::bound(cxt, MIN)?.unwrap_or(f64::NEG_INFINITY);
        let max = Self::bound(cxt, MAX)?.unwrap_or(f64::INFINITY);

        if min > max {
            return Err(bad_request!("threshold minimum {min} exceeds maximum {max}"));
        }

        let input = cxt.read(INPUT, region.clone()).await?;

        Ok(input.map_f64(|n| if n < min || n > max { 0. } else { n }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lf_graph::{Executor, Graph};
    use lf_region::Axis;

    use super::*;

    #[tokio::test]
    async fn test_threshold() {
        let graph = Graph::new(Executor::current().expect("executor"));
        let op = graph
            .add_operator(Arc::new(OpThreshold::new().expect("op")))
            .await
            .expect("add");

        let data = Array::from_vec(&[1, 5], vec![1i32, 5, 9, -2, 7]).expect("array");
        graph
            .set_array(op.slot(INPUT), "yx".parse().expect("tags"), data)
            .await
            .expect("input");

        let region = Region::from_pairs([(Axis::Y, 0..1), (Axis::X, 0..5)]).expect("region");

        let unbounded = graph.read(&op.slot(OUTPUT), region.clone()).await.expect("read");
        assert_eq!(unbounded.to_f64_vec(), vec![1., 5., 9., -2., 7.]);

        graph.set_scalar(op.slot(MIN), 0.).await.expect("min");
        graph.set_scalar(op.slot(MAX), 7i64).await.expect("max");

        let masked = graph.read(&op.slot(OUTPUT), region.clone()).await.expect("read");
        assert_eq!(masked.to_f64_vec(), vec![1., 5., 0., 0., 7.]);

        graph.set_scalar(op.slot(MIN), 8.).await.expect("min");
        let err = graph.read(&op.slot(OUTPUT), region).await.expect_err("empty range");
        assert_eq!(err.code(), ErrorType::BadRequest);
    }
}
