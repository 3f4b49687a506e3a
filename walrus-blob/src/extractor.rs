use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    BlobCache, BlobConfig, BlobError, BlobFetcher, BlobId, BlobResult, ByteRange, DataItem,
    ExtractedItem, HandleRegistry, ItemExtent, LoadProgress, LoadReport, Payload, ResourceHandle,
};

type HandleKey = (BlobId, String);

/// Counters for observing extraction work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    /// Payloads cut out of a blob (or fetched as a store range) and issued
    pub slices: usize,
    /// Ranges requested from the store instead of sliced locally
    pub store_range_fetches: usize,
}

/// Where the bytes for an extraction come from
enum Source {
    Blob(Bytes),
    StoreRange(Bytes, ByteRange),
}

/// Resolves dataset items into individually addressable byte ranges for one
/// view.
///
/// Blobs come from the session-wide [`BlobCache`], so each blob is fetched at
/// most once no matter how many items or views reference it. Handles are
/// owned by this view and released together on [`teardown`](Self::teardown).
pub struct BlobRangeExtractor {
    fetcher: Arc<dyn BlobFetcher>,
    cache: Arc<BlobCache>,
    config: Arc<BlobConfig>,
    registry: HandleRegistry,
    handles: Mutex<HashMap<HandleKey, ExtractedItem>>,
    closed: AtomicBool,
    slices: AtomicUsize,
    store_range_fetches: AtomicUsize,
}

impl BlobRangeExtractor {
    pub fn new(fetcher: Arc<dyn BlobFetcher>, cache: Arc<BlobCache>, config: Arc<BlobConfig>) -> Self {
        Self {
            fetcher,
            cache,
            config,
            registry: HandleRegistry::new(),
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            slices: AtomicUsize::new(0),
            store_range_fetches: AtomicUsize::new(0),
        }
    }

    /// Full bytes of a blob, fetched at most once per session
    pub async fn ensure_blob_loaded(&self, blob_id: &BlobId) -> BlobResult<Bytes> {
        self.cache.ensure_loaded(self.fetcher.clone(), blob_id).await
    }

    /// Extract an item and return its handle.
    ///
    /// Repeated calls for the same `(blob_id, item_path)` return the handle
    /// issued first without slicing again.
    pub async fn extract_item(
        &self,
        blob_id: &BlobId,
        item_path: &str,
        range: Option<ByteRange>,
        data_type: Option<&str>,
    ) -> BlobResult<ResourceHandle> {
        self.extract_extent(blob_id, item_path, range.into(), data_type)
            .await
            .map(|extracted| extracted.handle)
    }

    /// Extract a dataset item, returning the full receipt
    pub async fn extract(&self, item: &DataItem) -> BlobResult<ExtractedItem> {
        self.extract_extent(&item.blob_id, &item.path, item.extent, item.data_type.as_deref())
            .await
    }

    /// Handle already issued for an item; never fetches or slices
    pub fn get_handle(&self, blob_id: &BlobId, item_path: &str) -> Option<ResourceHandle> {
        self.handles
            .lock()
            .get(&(blob_id.clone(), item_path.to_string()))
            .map(|extracted| extracted.handle.clone())
    }

    /// Dereference a handle issued by this view
    pub fn resolve(&self, handle: &ResourceHandle) -> BlobResult<Payload> {
        self.registry.resolve(handle)
    }

    /// Load every blob referenced by `items` and extract each item.
    ///
    /// Blobs are fetched concurrently; items of a blob are extracted in input
    /// order once that blob arrives. A failed blob only fails its own items.
    pub async fn load_items(&self, items: &[DataItem]) -> LoadReport {
        let blob_ids = unique_blob_ids(items);
        info!("Unique blob IDs: {}", join_ids(&blob_ids));

        let per_blob = futures::future::join_all(blob_ids.iter().map(|blob_id| async move {
            let loaded = self.ensure_blob_loaded(blob_id).await;
            let mut extracted = Vec::new();
            for (index, item) in items.iter().enumerate().filter(|(_, item)| &item.blob_id == blob_id) {
                let result = match &loaded {
                    Ok(data) => self.issue(
                        item.blob_id.clone(),
                        &item.path,
                        item.extent,
                        item.data_type.as_deref(),
                        Source::Blob(data.clone()),
                    ),
                    Err(e) => Err(e.clone()),
                };
                if let Err(e) = &result {
                    if loaded.is_ok() {
                        warn!("Error creating handle for item {} ({}): {}", index, item.path, e);
                    }
                }
                extracted.push((index, result));
            }
            (blob_id.clone(), loaded.err(), extracted)
        }))
        .await;

        let mut indexed = Vec::with_capacity(items.len());
        let mut failed_blobs = Vec::new();
        for (blob_id, error, extracted) in per_blob {
            if let Some(error) = error {
                failed_blobs.push((blob_id, error));
            }
            indexed.extend(extracted);
        }
        indexed.sort_by_key(|(index, _)| *index);

        LoadReport {
            items: indexed.into_iter().map(|(_, result)| result).collect(),
            failed_blobs,
        }
    }

    /// Fetch just an item's bytes without issuing a handle.
    ///
    /// Ranged items are requested from the store directly when it serves
    /// ranges and the blob is not cached yet; otherwise the blob is loaded
    /// and sliced locally, with the usual whole-blob fallback.
    pub async fn fetch_item_range(&self, item: &DataItem) -> BlobResult<Payload> {
        let media_type = self.media_type(item.data_type.as_deref());
        if let Some(range) = item.range() {
            if self.fetcher.capabilities().supports_range && !self.cache.contains(&item.blob_id) {
                match self.fetch_store_range(&item.blob_id, range).await {
                    Ok(data) => return Ok(Payload::new(data, media_type)),
                    Err(e) if is_unsatisfiable(&e) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let blob = self.ensure_blob_loaded(&item.blob_id).await?;
        let (data, _, _) = slice_blob(&item.blob_id, &item.path, &blob, item.extent);
        Ok(Payload::new(data, media_type))
    }

    /// Whether the blob behind an item is still being fetched
    pub fn is_blob_loading(&self, blob_id: &BlobId) -> bool {
        self.cache.is_loading(blob_id)
    }

    /// Whether an item has a handle and its blob is no longer loading
    pub fn is_item_ready(&self, item: &DataItem) -> bool {
        self.get_handle(&item.blob_id, &item.path).is_some() && !self.is_blob_loading(&item.blob_id)
    }

    /// Blob-level progress over the unique blobs referenced by `items`
    pub fn progress(&self, items: &[DataItem]) -> LoadProgress {
        let blob_ids = unique_blob_ids(items);
        let loaded = blob_ids.iter().filter(|id| self.cache.is_settled(id)).count();
        LoadProgress::new(loaded, blob_ids.len())
    }

    /// Release one item's handle. Returns `false` if there was none.
    pub fn release(&self, blob_id: &BlobId, item_path: &str) -> bool {
        let removed = self
            .handles
            .lock()
            .remove(&(blob_id.clone(), item_path.to_string()));
        match removed {
            Some(extracted) => self.registry.release(&extracted.handle),
            None => false,
        }
    }

    /// Release every handle but keep the view open, e.g. when the item
    /// collection changes. Returns the number of handles released.
    pub fn release_all(&self) -> usize {
        let drained: Vec<ExtractedItem> = self.handles.lock().drain().map(|(_, v)| v).collect();
        self.release_drained(drained)
    }

    /// Release every handle and close the view. Later extractions fail with
    /// [`BlobError::ViewClosed`]; a second teardown releases nothing.
    pub fn teardown(&self) -> usize {
        let drained: Vec<ExtractedItem> = {
            let mut handles = self.handles.lock();
            self.closed.store(true, Ordering::SeqCst);
            handles.drain().map(|(_, v)| v).collect()
        };
        let released = self.release_drained(drained);
        if released > 0 {
            debug!("View torn down, released {} handles", released);
        }
        released
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of handles currently issued and not released
    pub fn live_handles(&self) -> usize {
        self.registry.live_count()
    }

    pub fn stats(&self) -> ExtractorStats {
        ExtractorStats {
            slices: self.slices.load(Ordering::SeqCst),
            store_range_fetches: self.store_range_fetches.load(Ordering::SeqCst),
        }
    }

    async fn extract_extent(
        &self,
        blob_id: &BlobId,
        item_path: &str,
        extent: ItemExtent,
        data_type: Option<&str>,
    ) -> BlobResult<ExtractedItem> {
        self.ensure_open()?;
        if let Some(existing) = self.lookup(blob_id, item_path) {
            return Ok(existing);
        }

        let source = match extent.range() {
            Some(range) if self.should_fetch_store_range(blob_id) => {
                match self.fetch_store_range(blob_id, range).await {
                    Ok(data) => Source::StoreRange(data, range),
                    // Store rejected the range; load the blob so slicing can fall back
                    Err(e) if is_unsatisfiable(&e) => {
                        Source::Blob(self.ensure_blob_loaded(blob_id).await?)
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => Source::Blob(self.ensure_blob_loaded(blob_id).await?),
        };

        self.issue(blob_id.clone(), item_path, extent, data_type, source)
    }

    /// Slice and issue under the handle lock so that racing extractions of
    /// one item share a handle and nothing is issued after teardown.
    fn issue(
        &self,
        blob_id: BlobId,
        item_path: &str,
        extent: ItemExtent,
        data_type: Option<&str>,
        source: Source,
    ) -> BlobResult<ExtractedItem> {
        let key = (blob_id, item_path.to_string());
        let mut handles = self.handles.lock();
        if let Some(existing) = handles.get(&key) {
            return Ok(existing.clone());
        }
        self.ensure_open()?;

        let (data, extent, fallback) = match source {
            Source::Blob(blob) => slice_blob(&key.0, item_path, &blob, extent),
            Source::StoreRange(data, range) => {
                (Bytes::copy_from_slice(&data), ItemExtent::Range(range), None)
            }
        };
        let media_type = self.media_type(data_type);
        let size_bytes = data.len() as u64;
        let handle = self.registry.issue(Payload::new(data, media_type.clone()));
        self.slices.fetch_add(1, Ordering::SeqCst);

        let extracted = ExtractedItem {
            blob_id: key.0.clone(),
            path: key.1.clone(),
            handle,
            media_type,
            extent,
            size_bytes,
            fallback,
        };
        handles.insert(key, extracted.clone());
        Ok(extracted)
    }

    fn lookup(&self, blob_id: &BlobId, item_path: &str) -> Option<ExtractedItem> {
        self.handles
            .lock()
            .get(&(blob_id.clone(), item_path.to_string()))
            .cloned()
    }

    fn ensure_open(&self) -> BlobResult<()> {
        if self.is_closed() {
            return Err(BlobError::ViewClosed);
        }
        Ok(())
    }

    fn should_fetch_store_range(&self, blob_id: &BlobId) -> bool {
        self.config.prefer_store_ranges
            && self.fetcher.capabilities().supports_range
            && !self.cache.contains(blob_id)
    }

    async fn fetch_store_range(&self, blob_id: &BlobId, range: ByteRange) -> BlobResult<Bytes> {
        self.store_range_fetches.fetch_add(1, Ordering::SeqCst);
        debug!("Requesting {} of blob {} from store", range, blob_id);
        self.fetcher.fetch_range(blob_id, range).await
    }

    fn media_type(&self, data_type: Option<&str>) -> String {
        data_type
            .filter(|t| !t.is_empty())
            .unwrap_or(self.config.default_media_type.as_str())
            .to_string()
    }

    fn release_drained(&self, drained: Vec<ExtractedItem>) -> usize {
        drained
            .iter()
            .filter(|extracted| self.registry.release(&extracted.handle))
            .count()
    }
}

impl Drop for BlobRangeExtractor {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Copy an item's bytes out of its blob into an independent buffer.
///
/// An unusable range yields the whole blob plus an `InvalidRange` diagnostic.
fn slice_blob(
    blob_id: &BlobId,
    item_path: &str,
    blob: &Bytes,
    extent: ItemExtent,
) -> (Bytes, ItemExtent, Option<BlobError>) {
    let blob_len = blob.len() as u64;
    match extent {
        ItemExtent::Whole => {
            debug!("No range info for item {}, using entire blob", item_path);
            (Bytes::copy_from_slice(blob), ItemExtent::Whole, None)
        }
        ItemExtent::Range(range) if range.is_valid(blob_len) => {
            let slice = &blob[range.start as usize..=range.end as usize];
            debug!(
                "Sliced blob {} from {} to {} ({} bytes) for item {}",
                blob_id,
                range.start,
                range.end,
                slice.len(),
                item_path
            );
            (Bytes::copy_from_slice(slice), extent, None)
        }
        ItemExtent::Range(range) => {
            warn!(
                "Invalid range for item {}: {} (buffer size: {}), using entire blob",
                item_path, range, blob_len
            );
            let diagnostic = BlobError::InvalidRange {
                blob_id: blob_id.clone(),
                path: item_path.to_string(),
                range,
                blob_len,
            };
            (Bytes::copy_from_slice(blob), ItemExtent::Whole, Some(diagnostic))
        }
    }
}

fn is_unsatisfiable(error: &BlobError) -> bool {
    matches!(error, BlobError::FetchFailed { status: Some(416), .. })
}

fn unique_blob_ids(items: &[DataItem]) -> Vec<BlobId> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.blob_id.clone()))
        .map(|item| item.blob_id.clone())
        .collect()
}

fn join_ids(ids: &[BlobId]) -> String {
    ids.iter().map(BlobId::as_str).collect::<Vec<_>>().join(", ")
}
