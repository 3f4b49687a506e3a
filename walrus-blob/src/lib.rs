//! # walrus-blob: Blob range extraction for Walrus-hosted datasets
//!
//! Dataset uploads merge many small files into one stored blob and record the
//! inclusive byte range each file occupies. `walrus-blob` turns such items back
//! into individually addressable payloads while downloading each blob once.
//!
//! ## Key Features
//!
//! - **At-most-one fetch**: a session-wide cache coalesces concurrent requests for the same blob
//! - **Range slicing**: end-inclusive ranges are copied into independent buffers
//! - **Graceful fallback**: an out-of-bounds range degrades to the whole blob with a warning
//! - **Revocable handles**: every item gets a URL-like handle; use after release is an error
//! - **Store-side ranges**: optionally ask the aggregator for `Range: bytes=a-b` instead
//!
//! ## Quick Start
//!
//! ```rust
//! use walrus_blob::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let store = MemoryBlobStore::new();
//! let blob_id = store.put((0u8..=255).cycle().take(300).collect::<Vec<u8>>());
//! let adapter = BlobAdapter::new(store, BlobConfig::default());
//!
//! // One view per screen; its handles are released on teardown
//! let view = adapter.open_view();
//! let handle = view
//!     .extract_item(&blob_id, "images/0001.jpg", Some(ByteRange::new(0, 99)), None)
//!     .await?;
//!
//! let payload = view.resolve(&handle)?;
//! assert_eq!(payload.len(), 100);
//!
//! view.teardown();
//! assert!(view.resolve(&handle).is_err());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  BlobRangeExtractor  │  ← one per view: slicing, handles, teardown
//! ├──────────────────────┤
//! │  BlobAdapter         │  ← one per session: config + shared BlobCache
//! ├──────────────────────┤
//! │  BlobFetcher         │  ← aggregator HTTP, in-memory, custom
//! └──────────────────────┘
//! ```

pub mod adapter;
mod aggregator;
mod cache;
mod config;
mod error;
mod extractor;
mod handle;
mod merge;
mod receipt;
pub mod store;
mod types;

// Re-export main types for clean API
pub use adapter::BlobAdapter;
pub use aggregator::AggregatorStore;
pub use cache::{BlobCache, LoadState};
pub use config::{BlobConfig, DEFAULT_AGGREGATOR_URL, DEFAULT_MEDIA_TYPE};
pub use error::{BlobError, BlobResult};
pub use extractor::{BlobRangeExtractor, ExtractorStats};
pub use handle::{HandleRegistry, Payload, ResourceHandle};
pub use merge::{file_hash, FileMetadata, MergedBlob, SourceFile};
pub use receipt::{ExtractedItem, LoadProgress, LoadReport};
pub use store::{content_address, BlobFetcher, MemoryBlobStore, StoreCapabilities};
pub use types::{BlobId, ByteRange, DataItem, ItemExtent};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobAdapter, BlobConfig, BlobError, BlobFetcher, BlobId, BlobRangeExtractor, BlobResult,
        ByteRange, DataItem, ItemExtent, MemoryBlobStore, Payload, ResourceHandle,
    };
}
