use serde::Serialize;

use crate::{BlobError, BlobId, BlobResult, ItemExtent, ResourceHandle};

/// Receipt for an item whose bytes have been extracted and handed a handle
#[derive(Debug, Clone)]
pub struct ExtractedItem {
    pub blob_id: BlobId,
    pub path: String,
    pub handle: ResourceHandle,
    pub media_type: String,
    /// What the handle actually covers; `Whole` after a range fallback
    pub extent: ItemExtent,
    pub size_bytes: u64,
    /// Set when the declared range was unusable and the whole blob was used
    pub fallback: Option<BlobError>,
}

impl ExtractedItem {
    pub fn fell_back(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Outcome of loading a batch of items
#[derive(Debug)]
pub struct LoadReport {
    /// One entry per input item, in input order
    pub items: Vec<BlobResult<ExtractedItem>>,
    /// Blobs whose fetch failed, in first-reference order
    pub failed_blobs: Vec<(BlobId, BlobError)>,
}

impl LoadReport {
    pub fn extracted(&self) -> impl Iterator<Item = &ExtractedItem> {
        self.items.iter().filter_map(|item| item.as_ref().ok())
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = &ExtractedItem> {
        self.extracted().filter(|item| item.fell_back())
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|item| item.is_ok())
    }
}

/// Blob-level loading progress for a collection of items
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadProgress {
    pub loaded: usize,
    pub total: usize,
    pub percentage: f64,
}

impl LoadProgress {
    pub fn new(loaded: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            loaded as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            loaded,
            total,
            percentage,
        }
    }

    pub fn is_done(&self) -> bool {
        self.loaded == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_of_empty_collection_is_zero() {
        let progress = LoadProgress::new(0, 0);
        assert_eq!(progress.percentage, 0.0);
        assert!(progress.is_done());
    }

    #[test]
    fn progress_percentage() {
        let progress = LoadProgress::new(1, 4);
        assert_eq!(progress.percentage, 25.0);
        assert!(!progress.is_done());
    }
}
