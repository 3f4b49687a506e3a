use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use crate::{BlobError, BlobId, BlobResult, ByteRange};

/// Read access to a remote content-addressed blob store
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Fetch the full contents of a blob
    async fn fetch(&self, blob_id: &BlobId) -> BlobResult<Bytes>;

    /// Fetch an inclusive sub-range of a blob from the store itself
    async fn fetch_range(&self, _blob_id: &BlobId, _range: ByteRange) -> BlobResult<Bytes> {
        Err(BlobError::Unsupported)
    }

    /// Get store capabilities
    fn capabilities(&self) -> StoreCapabilities;
}

/// Store capabilities
#[derive(Debug, Clone, Default)]
pub struct StoreCapabilities {
    pub supports_range: bool,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self {
            supports_range: false,
        }
    }

    pub fn with_range(mut self) -> Self {
        self.supports_range = true;
        self
    }
}

/// Content address for a payload: URL-safe base64 of its SHA-256 digest
pub fn content_address(data: &[u8]) -> BlobId {
    let digest = Sha256::digest(data);
    BlobId(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest))
}

/// In-memory blob store for tests and local development.
///
/// Counts every fetch per blob and can inject latency and failures, which is
/// what the coalescing and retry paths need to be observable.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Bytes>>,
    fetches: Mutex<HashMap<BlobId, usize>>,
    range_fetches: Mutex<HashMap<BlobId, usize>>,
    failures: Mutex<HashMap<BlobId, (usize, u16)>>,
    latency: Option<Duration>,
    capabilities: StoreCapabilities,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            range_fetches: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            latency: None,
            capabilities: StoreCapabilities::basic(),
        }
    }

    /// Delay every fetch, keeping requests in flight long enough to overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serve `fetch_range` requests
    pub fn with_range_support(mut self) -> Self {
        self.capabilities = self.capabilities.with_range();
        self
    }

    /// Store bytes under an explicit id
    pub fn insert<B: Into<Bytes>>(&self, blob_id: BlobId, data: B) {
        self.blobs.write().insert(blob_id, data.into());
    }

    /// Store bytes under their content address
    pub fn put<B: Into<Bytes>>(&self, data: B) -> BlobId {
        let data = data.into();
        let blob_id = content_address(&data);
        self.blobs.write().insert(blob_id.clone(), data);
        blob_id
    }

    /// Fail the next `times` fetches of a blob with the given HTTP status
    pub fn fail_next(&self, blob_id: &BlobId, times: usize, status: u16) {
        if times > 0 {
            self.failures.lock().insert(blob_id.clone(), (times, status));
        }
    }

    /// Number of full fetches served (or failed) for a blob
    pub fn fetch_count(&self, blob_id: &BlobId) -> usize {
        self.fetches.lock().get(blob_id).copied().unwrap_or(0)
    }

    /// Number of range fetches served for a blob
    pub fn range_fetch_count(&self, blob_id: &BlobId) -> usize {
        self.range_fetches.lock().get(blob_id).copied().unwrap_or(0)
    }

    fn take_injected_failure(&self, blob_id: &BlobId) -> Option<u16> {
        let mut failures = self.failures.lock();
        let (remaining, status) = failures.get_mut(blob_id)?;
        let status = *status;
        *remaining -= 1;
        if *remaining == 0 {
            failures.remove(blob_id);
        }
        Some(status)
    }

    fn lookup(&self, blob_id: &BlobId) -> BlobResult<Bytes> {
        if let Some(status) = self.take_injected_failure(blob_id) {
            return Err(BlobError::fetch_failed(blob_id, Some(status), "injected failure"));
        }
        self.blobs
            .read()
            .get(blob_id)
            .cloned()
            .ok_or_else(|| BlobError::fetch_failed(blob_id, Some(404), "Not Found"))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BlobFetcher for MemoryBlobStore {
    async fn fetch(&self, blob_id: &BlobId) -> BlobResult<Bytes> {
        *self.fetches.lock().entry(blob_id.clone()).or_insert(0) += 1;
        self.simulate_latency().await;
        self.lookup(blob_id)
    }

    async fn fetch_range(&self, blob_id: &BlobId, range: ByteRange) -> BlobResult<Bytes> {
        if !self.capabilities.supports_range {
            return Err(BlobError::Unsupported);
        }
        *self.range_fetches.lock().entry(blob_id.clone()).or_insert(0) += 1;
        self.simulate_latency().await;

        let data = self.lookup(blob_id)?;
        if !range.is_valid(data.len() as u64) {
            return Err(BlobError::fetch_failed(
                blob_id,
                Some(416),
                format!("Range Not Satisfiable: {}", range),
            ));
        }
        Ok(data.slice(range.start as usize..=range.end as usize))
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities.clone()
    }
}
