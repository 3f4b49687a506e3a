use std::env;
use std::time::Duration;

use crate::{BlobError, BlobResult};

/// Public testnet aggregator serving `/v1/blobs/{id}`
pub const DEFAULT_AGGREGATOR_URL: &str = "https://aggregator.testnet.walrus.atalma.io";

/// Media type given to items that do not declare one
pub const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

/// Configuration for blob fetching and extraction
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Base URL of the Walrus aggregator (no trailing slash)
    pub aggregator_url: String,

    /// Media type used when an item has no `data_type`
    pub default_media_type: String,

    /// Per-request timeout for aggregator fetches
    pub request_timeout: Duration,

    /// Absolute max size accepted for a single blob (safety guard)
    pub max_blob_bytes: u64,

    /// When an item has a range and the store can serve ranges:
    /// - if true: request the range from the store
    /// - if false: fetch the whole blob once and slice locally
    pub prefer_store_ranges: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            aggregator_url: DEFAULT_AGGREGATOR_URL.to_string(),
            default_media_type: DEFAULT_MEDIA_TYPE.to_string(),
            request_timeout: Duration::from_secs(60),
            max_blob_bytes: 1024 * 1024 * 1024, // 1GB
            prefer_store_ranges: false,
        }
    }
}

impl BlobConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `WALRUS_*` environment variables, falling back to defaults
    pub fn from_env() -> BlobResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> BlobResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_u64(key: &str, value: &str) -> BlobResult<u64> {
            value
                .trim()
                .parse()
                .map_err(|_| BlobError::config(format!("{} must be an integer, got '{}'", key, value)))
        }

        let mut config = Self::default();

        if let Some(url) = lookup("WALRUS_AGGREGATOR_URL") {
            config = config.with_aggregator_url(url);
        }
        if let Some(media_type) = lookup("WALRUS_DEFAULT_MEDIA_TYPE") {
            config = config.with_default_media_type(media_type);
        }
        if let Some(secs) = lookup("WALRUS_REQUEST_TIMEOUT_SECS") {
            let secs = parse_u64("WALRUS_REQUEST_TIMEOUT_SECS", &secs)?;
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(max) = lookup("WALRUS_MAX_BLOB_BYTES") {
            config = config.with_max_blob_bytes(parse_u64("WALRUS_MAX_BLOB_BYTES", &max)?);
        }

        Ok(config)
    }

    /// Set aggregator base URL
    pub fn with_aggregator_url<S: Into<String>>(mut self, url: S) -> Self {
        self.aggregator_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set fallback media type
    pub fn with_default_media_type<S: Into<String>>(mut self, media_type: S) -> Self {
        self.default_media_type = media_type.into();
        self
    }

    /// Set request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set max blob size
    pub fn with_max_blob_bytes(mut self, bytes: u64) -> Self {
        self.max_blob_bytes = bytes;
        self
    }

    /// Ask the store for item ranges directly when it supports them
    pub fn prefer_store_ranges(mut self) -> Self {
        self.prefer_store_ranges = true;
        self
    }

    /// URL of a blob on the aggregator
    pub fn blob_url(&self, blob_id: &crate::BlobId) -> String {
        format!("{}/v1/blobs/{}", self.aggregator_url, blob_id)
    }
}
