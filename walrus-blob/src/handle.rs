use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{BlobError, BlobResult};

const HANDLE_SCHEME: &str = "blob:walrus/";

/// Opaque, URL-like reference to extracted bytes.
///
/// Valid from issuance until its owner releases it; resolving it afterwards
/// fails with [`BlobError::HandleReleased`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    url: String,
    issuer: Uuid,
}

impl ResourceHandle {
    fn new(issuer: Uuid) -> Self {
        Self {
            url: format!("{}{}", HANDLE_SCHEME, Uuid::new_v4()),
            issuer,
        }
    }

    /// The URL-like string handed to the rendering layer
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Extracted bytes together with their declared media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub media_type: String,
}

impl Payload {
    pub fn new<S: Into<String>>(data: Bytes, media_type: S) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

struct Issued {
    payload: Payload,
    issued_at: DateTime<Utc>,
}

/// Issues and revokes [`ResourceHandle`]s.
///
/// Every handle carries the id of the registry that issued it, so a handle
/// issued here that is no longer live is known to be released. Only live
/// handles are stored.
pub struct HandleRegistry {
    id: Uuid,
    live: RwLock<HashMap<ResourceHandle, Issued>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            live: RwLock::new(HashMap::new()),
        }
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new handle owning `payload`
    pub fn issue(&self, payload: Payload) -> ResourceHandle {
        let handle = ResourceHandle::new(self.id);
        self.live.write().insert(
            handle.clone(),
            Issued {
                payload,
                issued_at: Utc::now(),
            },
        );
        handle
    }

    /// Dereference a live handle
    pub fn resolve(&self, handle: &ResourceHandle) -> BlobResult<Payload> {
        if let Some(issued) = self.live.read().get(handle) {
            return Ok(issued.payload.clone());
        }
        if handle.issuer == self.id {
            return Err(BlobError::HandleReleased {
                handle: handle.to_string(),
            });
        }
        Err(BlobError::not_found(handle.as_str()))
    }

    /// When a live handle was issued
    pub fn issued_at(&self, handle: &ResourceHandle) -> Option<DateTime<Utc>> {
        self.live.read().get(handle).map(|issued| issued.issued_at)
    }

    /// Release a handle. Returns `false` if it was already released or never
    /// issued here.
    pub fn release(&self, handle: &ResourceHandle) -> bool {
        self.live.write().remove(handle).is_some()
    }

    pub fn is_live(&self, handle: &ResourceHandle) -> bool {
        self.live.read().contains_key(handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.read().len()
    }
}
