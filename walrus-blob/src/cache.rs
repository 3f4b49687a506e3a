use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{BlobError, BlobFetcher, BlobId, BlobResult};

type SharedFetch = Shared<BoxFuture<'static, BlobResult<Bytes>>>;

/// Per-blob loading state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
    Failed,
}

/// Session-wide cache of fetched blobs.
///
/// Entries are append-only: a blob is inserted once after its first
/// successful fetch and never replaced or evicted. Concurrent requests for a
/// blob that is not cached yet share one in-flight fetch.
pub struct BlobCache {
    blobs: RwLock<HashMap<BlobId, Bytes>>,
    in_flight: Mutex<HashMap<BlobId, SharedFetch>>,
    states: RwLock<HashMap<BlobId, LoadState>>,
    fetches_started: AtomicUsize,
    max_blob_bytes: u64,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobCache<blobs: {}, in flight: {}>", self.len(), self.in_flight.lock().len())
    }
}

impl BlobCache {
    pub fn new(max_blob_bytes: u64) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            fetches_started: AtomicUsize::new(0),
            max_blob_bytes,
        }
    }

    /// Cached bytes for a blob, if it has been loaded
    pub fn get(&self, blob_id: &BlobId) -> Option<Bytes> {
        self.blobs.read().get(blob_id).cloned()
    }

    pub fn contains(&self, blob_id: &BlobId) -> bool {
        self.blobs.read().contains_key(blob_id)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed the cache with bytes obtained elsewhere (e.g. just uploaded).
    /// An existing entry is kept.
    pub fn insert(&self, blob_id: BlobId, data: Bytes) {
        self.blobs.write().entry(blob_id.clone()).or_insert(data);
        self.states.write().insert(blob_id, LoadState::Loaded);
    }

    pub fn state(&self, blob_id: &BlobId) -> Option<LoadState> {
        self.states.read().get(blob_id).copied()
    }

    pub fn is_loading(&self, blob_id: &BlobId) -> bool {
        self.state(blob_id) == Some(LoadState::Loading)
    }

    /// Whether a blob has finished loading, successfully or not
    pub fn is_settled(&self, blob_id: &BlobId) -> bool {
        self.contains(blob_id)
            || matches!(self.state(blob_id), Some(LoadState::Loaded | LoadState::Failed))
    }

    /// Number of network fetches this cache has started
    pub fn fetches_started(&self) -> usize {
        self.fetches_started.load(Ordering::SeqCst)
    }

    /// Return the cached blob, or fetch it once and cache it.
    ///
    /// Callers arriving while a fetch for the same blob is pending wait on
    /// that fetch instead of starting another. The fetch runs as its own task
    /// so it completes even if every waiter goes away. Failures are not
    /// cached; the next call starts a fresh fetch.
    pub async fn ensure_loaded(
        self: &Arc<Self>,
        fetcher: Arc<dyn BlobFetcher>,
        blob_id: &BlobId,
    ) -> BlobResult<Bytes> {
        if let Some(data) = self.get(blob_id) {
            return Ok(data);
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock();
            // A fetch may have completed between the read above and taking the lock
            if let Some(data) = self.get(blob_id) {
                return Ok(data);
            }
            match in_flight.get(blob_id) {
                Some(pending) => {
                    debug!("Joining in-flight fetch for blob {}", blob_id);
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_fetch(fetcher, blob_id.clone());
                    in_flight.insert(blob_id.clone(), pending.clone());
                    self.states.write().insert(blob_id.clone(), LoadState::Loading);
                    pending
                }
            }
        };

        fetch.await
    }

    fn spawn_fetch(self: &Arc<Self>, fetcher: Arc<dyn BlobFetcher>, blob_id: BlobId) -> SharedFetch {
        self.fetches_started.fetch_add(1, Ordering::SeqCst);

        let cache = Arc::clone(self);
        let id = blob_id.clone();
        let task = tokio::spawn(async move {
            info!("Loading blob data for {}...", id);
            let result = match fetcher.fetch(&id).await {
                Ok(data) => cache.check_size(&id, data),
                Err(e) => Err(e),
            };
            cache.complete(&id, &result);
            result
        });

        let cache = Arc::clone(self);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let result = Err(BlobError::fetch_failed(
                        &blob_id,
                        None,
                        format!("fetch task did not complete: {}", e),
                    ));
                    cache.complete(&blob_id, &result);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }

    fn check_size(&self, blob_id: &BlobId, data: Bytes) -> BlobResult<Bytes> {
        let size = data.len() as u64;
        if size > self.max_blob_bytes {
            return Err(BlobError::TooLarge {
                blob_id: blob_id.clone(),
                size,
                max: self.max_blob_bytes,
            });
        }
        Ok(data)
    }

    fn complete(&self, blob_id: &BlobId, result: &BlobResult<Bytes>) {
        let state = match result {
            Ok(data) => {
                self.blobs
                    .write()
                    .entry(blob_id.clone())
                    .or_insert_with(|| data.clone());
                info!("Blob {} loaded ({} bytes)", blob_id, data.len());
                LoadState::Loaded
            }
            Err(e) => {
                warn!("Error loading blob {}: {}", blob_id, e);
                LoadState::Failed
            }
        };

        let mut in_flight = self.in_flight.lock();
        in_flight.remove(blob_id);
        self.states.write().insert(blob_id.clone(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlobStore;
    use std::time::Duration;

    fn cache() -> Arc<BlobCache> {
        Arc::new(BlobCache::new(u64::MAX))
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let store = Arc::new(MemoryBlobStore::new().with_latency(Duration::from_millis(50)));
        let id = store.put(vec![7u8; 64]);
        let cache = cache();

        let fetcher: Arc<dyn BlobFetcher> = store.clone();
        let results = futures::future::join_all(
            (0..8).map(|_| cache.ensure_loaded(fetcher.clone(), &id)),
        )
        .await;

        for result in results {
            assert_eq!(result.unwrap().len(), 64);
        }
        assert_eq!(store.fetch_count(&id), 1);
        assert_eq!(cache.fetches_started(), 1);
        assert_eq!(cache.state(&id), Some(LoadState::Loaded));
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached_and_can_be_retried() {
        let store = Arc::new(MemoryBlobStore::new());
        let id = store.put(&b"retry me"[..]);
        store.fail_next(&id, 1, 500);
        let cache = cache();
        let fetcher: Arc<dyn BlobFetcher> = store.clone();

        let err = cache.ensure_loaded(fetcher.clone(), &id).await.unwrap_err();
        assert!(matches!(err, BlobError::FetchFailed { status: Some(500), .. }));
        assert!(!cache.contains(&id));
        assert_eq!(cache.state(&id), Some(LoadState::Failed));
        assert!(cache.is_settled(&id));

        let data = cache.ensure_loaded(fetcher, &id).await.unwrap();
        assert_eq!(&data[..], b"retry me");
        assert_eq!(store.fetch_count(&id), 2);
    }

    #[tokio::test]
    async fn oversized_blobs_are_rejected() {
        let store = Arc::new(MemoryBlobStore::new());
        let id = store.put(vec![0u8; 16]);
        let cache = Arc::new(BlobCache::new(8));

        let err = cache.ensure_loaded(store, &id).await.unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { size: 16, max: 8, .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn seeded_entries_skip_the_network() {
        let store = Arc::new(MemoryBlobStore::new());
        let id = BlobId::from("seeded");
        let cache = cache();
        cache.insert(id.clone(), Bytes::from_static(b"local"));

        let data = cache.ensure_loaded(store.clone(), &id).await.unwrap();
        assert_eq!(&data[..], b"local");
        assert_eq!(store.fetch_count(&id), 0);
    }
}
