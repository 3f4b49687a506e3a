use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};

use crate::{BlobConfig, BlobError, BlobFetcher, BlobId, BlobResult, ByteRange, StoreCapabilities};

/// Reads blobs from a Walrus aggregator over HTTP (`GET /v1/blobs/{id}`)
#[derive(Clone)]
pub struct AggregatorStore {
    client: Client,
    config: BlobConfig,
}

impl AggregatorStore {
    pub fn new(config: BlobConfig) -> BlobResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BlobError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Create from `WALRUS_*` environment variables
    pub fn from_env() -> BlobResult<Self> {
        Self::new(BlobConfig::from_env()?)
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    async fn get(&self, blob_id: &BlobId, range: Option<ByteRange>) -> BlobResult<Bytes> {
        let url = self.config.blob_url(blob_id);
        let mut request = self.client.get(&url);
        if let Some(range) = range {
            request = request.header(header::RANGE, range.to_header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BlobError::fetch_failed(blob_id, e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BlobError::fetch_failed(
                blob_id,
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("request failed"),
            ));
        }

        if let Some(size) = response.content_length() {
            if size > self.config.max_blob_bytes {
                return Err(BlobError::TooLarge {
                    blob_id: blob_id.clone(),
                    size,
                    max: self.config.max_blob_bytes,
                });
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BlobError::fetch_failed(blob_id, Some(status.as_u16()), e.to_string()))?;

        match range {
            // Aggregator ignored the Range header and sent the whole blob
            Some(range) if status != StatusCode::PARTIAL_CONTENT => {
                if !range.is_valid(body.len() as u64) {
                    return Err(BlobError::fetch_failed(
                        blob_id,
                        Some(StatusCode::RANGE_NOT_SATISFIABLE.as_u16()),
                        format!("Range {} outside {} byte blob", range, body.len()),
                    ));
                }
                Ok(body.slice(range.start as usize..=range.end as usize))
            }
            // Servers clamp an overlong range to the blob's end instead of refusing it
            Some(range) if body.len() as u64 != range.length() => Err(BlobError::fetch_failed(
                blob_id,
                Some(StatusCode::RANGE_NOT_SATISFIABLE.as_u16()),
                format!(
                    "Range {} answered with {} of {} bytes",
                    range,
                    body.len(),
                    range.length()
                ),
            )),
            _ => Ok(body),
        }
    }
}

#[async_trait]
impl BlobFetcher for AggregatorStore {
    async fn fetch(&self, blob_id: &BlobId) -> BlobResult<Bytes> {
        self.get(blob_id, None).await
    }

    async fn fetch_range(&self, blob_id: &BlobId, range: ByteRange) -> BlobResult<Bytes> {
        self.get(blob_id, Some(range)).await
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_range()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlobAdapter, DataItem, ItemExtent};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `blob` for any path. Ranged requests are answered `206` with the
    /// range clamped to the blob's end, the way HTTP servers commonly do.
    async fn clamping_server(blob: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let blob = blob.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_lowercase();
                    let range = request
                        .lines()
                        .find_map(|line| line.strip_prefix("range: bytes="))
                        .and_then(|spec| spec.trim().split_once('-'))
                        .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));

                    let (head, body) = match range {
                        Some((start, end)) => {
                            let end = end.min(blob.len() - 1);
                            (
                                format!(
                                    "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n",
                                    start,
                                    end,
                                    blob.len()
                                ),
                                blob[start..=end].to_vec(),
                            )
                        }
                        None => ("HTTP/1.1 200 OK\r\n".to_string(), blob),
                    };
                    let head = format!(
                        "{}Content-Length: {}\r\nConnection: close\r\n\r\n",
                        head,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn aggregator_serves_ranges() {
        let store = AggregatorStore::new(BlobConfig::default()).unwrap();
        assert!(store.capabilities().supports_range);
    }

    #[tokio::test]
    async fn unreachable_aggregator_is_a_retryable_fetch_error() {
        let config = BlobConfig::new()
            .with_aggregator_url("http://127.0.0.1:9")
            .with_request_timeout(std::time::Duration::from_secs(2));
        let store = AggregatorStore::new(config).unwrap();

        let err = store.fetch(&BlobId::from("abc")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, BlobError::FetchFailed { ref blob_id, .. } if blob_id.as_str() == "abc"));
    }

    #[tokio::test]
    async fn satisfiable_range_is_served_by_the_aggregator() {
        let blob: Vec<u8> = (0..100u8).collect();
        let config = BlobConfig::new().with_aggregator_url(clamping_server(blob.clone()).await);
        let store = AggregatorStore::new(config).unwrap();

        let data = store.fetch_range(&BlobId::from("b"), ByteRange::new(10, 19)).await.unwrap();
        assert_eq!(&data[..], &blob[10..20]);
    }

    #[tokio::test]
    async fn clamped_range_is_reported_unsatisfiable() {
        let blob: Vec<u8> = (0..100u8).collect();
        let config = BlobConfig::new().with_aggregator_url(clamping_server(blob).await);
        let store = AggregatorStore::new(config).unwrap();

        let err = store
            .fetch_range(&BlobId::from("b"), ByteRange::new(50, 150))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::FetchFailed { status: Some(416), .. }));
    }

    #[tokio::test]
    async fn clamped_store_range_falls_back_to_whole_blob() {
        let blob: Vec<u8> = (0..100u8).collect();
        let config = BlobConfig::new()
            .with_aggregator_url(clamping_server(blob.clone()).await)
            .prefer_store_ranges();
        let adapter = BlobAdapter::new(AggregatorStore::new(config.clone()).unwrap(), config);
        let view = adapter.open_view();

        let extracted = view.extract(&DataItem::ranged("b", "bad", 50, 150)).await.unwrap();

        assert_eq!(view.resolve(&extracted.handle).unwrap().as_bytes(), &blob[..]);
        assert_eq!(extracted.extent, ItemExtent::Whole);
        assert!(matches!(
            extracted.fallback,
            Some(BlobError::InvalidRange { blob_len: 100, .. })
        ));
    }
}
