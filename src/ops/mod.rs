//! Example operators built on the engine: thin wrappers around pure kernels, and a composite.

pub use cached_view::{CachedView, OpCachedView};
pub use downsample::OpDownsample;
pub use threshold::OpThreshold;

pub mod cached_view;
pub mod downsample;
pub mod threshold;
