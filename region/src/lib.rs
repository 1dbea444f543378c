//! Geometry of a lazyflow graph: tagged [`Shape`]s, the [`Region`]s requested from and
//! invalidated on a slot, and the [`BlockGrid`] which a cache snaps them to.

pub use axis::{Axis, AxisTags};
pub use block::{BlockGrid, BlockIndex, BlockShape};
pub use region::{AxisRange, Region};
pub use shape::Shape;

mod axis;
mod block;
mod region;
mod shape;

/// Parse a comma-separated list of `tag=value` pairs, e.g. `"x=256,y=256"`.
fn parse_pairs<T, E>(s: &str) -> lf_error::LFResult<Vec<(Axis, T)>>
where
    T: std::str::FromStr<Err = E>,
    E: std::fmt::Display,
{
    s.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (tag, value) = pair
                .split_once('=')
                .ok_or_else(|| lf_error::bad_request!("expected tag=value, found {pair}"))?;

            let axis = tag.trim().parse()?;
            let value = value
                .trim()
                .parse()
                .map_err(|cause| lf_error::bad_request!("invalid value for axis {tag}: {cause}"))?;

            Ok((axis, value))
        })
        .collect()
}
