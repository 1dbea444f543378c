use lf_error::*;
use lf_region::BlockShape;

const DEFAULT_NAME: &str = "BlockedCache";
const DEFAULT_RETRIES: usize = 8;

/// The configuration of an [`crate::OpBlockedCache`].
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub(crate) name: String,
    pub(crate) block_shape: Option<BlockShape>,
    pub(crate) capacity: Option<u64>,
    pub(crate) max_retries: usize,
}

impl CacheConfig {
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn block_shape(&self) -> Option<&BlockShape> {
        self.block_shape.as_ref()
    }

    /// The maximum number of bytes of block data to retain, if bounded.
    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            block_shape: None,
            capacity: None,
            max_retries: DEFAULT_RETRIES,
        }
    }
}

pub struct CacheBuilder {
    config: CacheConfig,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Set the name under which the cache logs its activity.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the shape of a cache block. Without one, the cache uses the block hint of its
    /// input, or else caches the whole input as a single block.
    pub fn block_shape(mut self, block_shape: BlockShape) -> Self {
        self.config.block_shape = Some(block_shape);
        self
    }

    /// Bound the number of bytes of block data which the cache retains.
    pub fn capacity(mut self, bytes: u64) -> Self {
        self.config.capacity = Some(bytes);
        self
    }

    /// Set how many times a read may be restarted by a concurrent invalidation before it
    /// fails with a `Conflict` error.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn build(self) -> LFResult<CacheConfig> {
        if self.config.max_retries == 0 {
            Err(bad_request!("a cache must allow at least one attempt per block"))
        } else {
            Ok(self.config)
        }
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
