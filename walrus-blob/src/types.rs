use serde::{Deserialize, Serialize};

/// Content-addressed identifier of a blob in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub String);

impl BlobId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BlobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive byte range `[start, end]` inside a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered, or 0 for an inverted range
    pub fn length(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// `0 <= start <= end < total_size`
    pub fn is_valid(&self, total_size: u64) -> bool {
        self.start <= self.end && self.end < total_size
    }

    /// Value for an HTTP `Range` request header
    pub fn to_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Where an item's payload lives inside its blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemExtent {
    /// The item occupies the entire blob
    #[default]
    Whole,
    /// The item occupies an inclusive sub-range of a merged blob
    Range(ByteRange),
}

impl ItemExtent {
    pub fn range(&self) -> Option<ByteRange> {
        match self {
            Self::Whole => None,
            Self::Range(range) => Some(*range),
        }
    }
}

impl From<Option<ByteRange>> for ItemExtent {
    fn from(range: Option<ByteRange>) -> Self {
        range.map_or(Self::Whole, Self::Range)
    }
}

/// A dataset record referencing (part of) a blob.
///
/// Deserializes from the dataset JSON shape
/// `{ "blobId": .., "path": .., "dataType"?: .., "range"?: { "start", "end" } }`.
/// Range offsets may be numbers or numeric strings; offsets that do not parse
/// leave the item addressing the whole blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDataItem", into = "RawDataItem")]
pub struct DataItem {
    pub blob_id: BlobId,
    pub path: String,
    pub data_type: Option<String>,
    pub extent: ItemExtent,
}

impl DataItem {
    /// Item occupying a whole blob
    pub fn whole<B: Into<BlobId>, P: Into<String>>(blob_id: B, path: P) -> Self {
        Self {
            blob_id: blob_id.into(),
            path: path.into(),
            data_type: None,
            extent: ItemExtent::Whole,
        }
    }

    /// Item occupying `[start, end]` of a merged blob
    pub fn ranged<B: Into<BlobId>, P: Into<String>>(blob_id: B, path: P, start: u64, end: u64) -> Self {
        Self {
            blob_id: blob_id.into(),
            path: path.into(),
            data_type: None,
            extent: ItemExtent::Range(ByteRange::new(start, end)),
        }
    }

    pub fn with_data_type<S: Into<String>>(mut self, data_type: S) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.extent.range()
    }

    pub fn is_image(&self) -> bool {
        self.data_type
            .as_deref()
            .map_or(false, |t| t.to_lowercase().contains("image"))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawOffset {
    Number(u64),
    Text(String),
}

impl RawOffset {
    fn parse(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawRange {
    start: RawOffset,
    end: RawOffset,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDataItem {
    blob_id: BlobId,
    #[serde(default)]
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range: Option<RawRange>,
}

impl From<RawDataItem> for DataItem {
    fn from(raw: RawDataItem) -> Self {
        let extent = match raw.range {
            None => ItemExtent::Whole,
            Some(range) => match (range.start.parse(), range.end.parse()) {
                (Some(start), Some(end)) => ItemExtent::Range(ByteRange::new(start, end)),
                _ => {
                    tracing::warn!(
                        "Unparsable range offsets for item {} in blob {}, using entire blob",
                        raw.path,
                        raw.blob_id
                    );
                    ItemExtent::Whole
                }
            },
        };

        Self {
            blob_id: raw.blob_id,
            path: raw.path,
            data_type: raw.data_type,
            extent,
        }
    }
}

impl From<DataItem> for RawDataItem {
    fn from(item: DataItem) -> Self {
        Self {
            blob_id: item.blob_id,
            path: item.path,
            data_type: item.data_type,
            range: item.extent.range().map(|r| RawRange {
                start: RawOffset::Number(r.start),
                end: RawOffset::Number(r.end),
            }),
        }
    }
}
