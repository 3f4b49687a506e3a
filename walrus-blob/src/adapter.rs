use std::sync::Arc;

use bytes::Bytes;

use crate::{
    AggregatorStore, BlobCache, BlobConfig, BlobFetcher, BlobId, BlobRangeExtractor, BlobResult,
    MergedBlob,
};

/// Session-scoped blob context.
///
/// Owns the fetcher, the configuration and the one [`BlobCache`] shared by
/// every view opened from it. Construct one per session and pass it to
/// whatever needs blob access; dropping it ends the session's cache.
#[derive(Clone)]
pub struct BlobAdapter {
    fetcher: Arc<dyn BlobFetcher>,
    cache: Arc<BlobCache>,
    config: Arc<BlobConfig>,
}

impl BlobAdapter {
    /// Create a new blob adapter
    pub fn new<F: BlobFetcher + 'static>(fetcher: F, config: BlobConfig) -> Self {
        Self::from_shared(Arc::new(fetcher), config)
    }

    /// Create from an already shared fetcher
    pub fn from_shared(fetcher: Arc<dyn BlobFetcher>, config: BlobConfig) -> Self {
        Self {
            fetcher,
            cache: Arc::new(BlobCache::new(config.max_blob_bytes)),
            config: Arc::new(config),
        }
    }

    /// Adapter reading from the aggregator configured by `WALRUS_*` env vars
    pub fn from_env() -> BlobResult<Self> {
        let store = AggregatorStore::from_env()?;
        let config = store.config().clone();
        Ok(Self::new(store, config))
    }

    /// Open a view: an extractor whose handles live until its teardown
    pub fn open_view(&self) -> BlobRangeExtractor {
        BlobRangeExtractor::new(self.fetcher.clone(), self.cache.clone(), self.config.clone())
    }

    /// Full bytes of a blob, fetched at most once per session
    pub async fn ensure_blob_loaded(&self, blob_id: &BlobId) -> BlobResult<Bytes> {
        self.cache.ensure_loaded(self.fetcher.clone(), blob_id).await
    }

    /// Seed the cache with a merged blob that was just stored under `blob_id`,
    /// so views over it do not download it again
    pub fn prime_merged(&self, blob_id: BlobId, merged: &MergedBlob) {
        self.cache.insert(blob_id, merged.data().clone());
    }

    pub fn cache(&self) -> &Arc<BlobCache> {
        &self.cache
    }

    /// Get configuration
    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    /// Check if range requests are supported
    pub fn supports_ranges(&self) -> bool {
        self.fetcher.capabilities().supports_range
    }
}
