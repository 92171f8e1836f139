// ========================================================================================
//                               The filter pipeline contract
// ========================================================================================

// A filter is built in two phases. At search setup, a `SeedFilterDesc` is handed a
// `FilterCreationContext` on which it declares the keys it will hash, so that their seed
// halves can be precomputed for every batch. It returns the `SeedFilter` that the worker
// threads then evaluate against each batch.

use crate::cache::{CacheLayout, KeyError, validate_key_length};
use crate::context::WideSearchContext;
use crate::kernel::{LaneBackend, LaneMask};
use crate::stream::cached_resample_key_lengths;
use ahash::AHashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("invalid filter: {0}")]
    Invalid(String),
}

/// Collects the key lengths a filter wants precomputed.
#[derive(Debug, Default)]
pub struct FilterCreationContext {
    key_lengths: AHashSet<usize>,
}

impl FilterCreationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that streams for `key` will be created through the cache.
    pub fn cache_pseudo_hash(&mut self, key: &str) -> Result<(), KeyError> {
        self.cache_pseudo_hash_length(key.len())
    }

    pub fn cache_pseudo_hash_length(&mut self, key_length: usize) -> Result<(), KeyError> {
        validate_key_length(key_length)?;
        self.key_lengths.insert(key_length);
        Ok(())
    }

    /// Declares `key` and every resample sub-stream of it that goes through the cache.
    pub fn cache_resample_stream(&mut self, key: &str) -> Result<(), KeyError> {
        self.cache_pseudo_hash(key)?;
        for length in cached_resample_key_lengths(key.len()) {
            self.cache_pseudo_hash_length(length)?;
        }
        Ok(())
    }

    pub fn into_layout(self) -> Result<CacheLayout, KeyError> {
        CacheLayout::new(self.key_lengths)
    }
}

/// The evaluation phase of a filter. Shared read-only by every worker thread.
pub trait SeedFilter: Send + Sync + 'static {
    /// Returns the lanes of the batch whose seeds pass. Lanes outside
    /// `ctx.valid_lanes()` are ignored by the caller.
    fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask;
}

/// The creation phase of a filter.
pub trait SeedFilterDesc {
    type Filter: SeedFilter;

    fn create(&self, ctx: &mut FilterCreationContext) -> Result<Self::Filter, FilterError>;
}
