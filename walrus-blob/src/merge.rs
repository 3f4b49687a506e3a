use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BlobError, BlobId, BlobResult, ByteRange, DataItem, ItemExtent};

/// A file to be merged into a single stored blob
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub media_type: String,
    pub data: Bytes,
}

impl SourceFile {
    pub fn new<N: Into<String>, M: Into<String>, B: Into<Bytes>>(name: N, media_type: M, data: B) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// Where a merged file lives inside the combined blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    /// `0x`-prefixed lowercase hex SHA-256 of the file contents
    pub file_hash: String,
    pub start_position: u64,
    /// Inclusive
    pub end_position: u64,
}

impl FileMetadata {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.start_position, self.end_position)
    }
}

/// Several files concatenated into one payload, with the byte range of each
#[derive(Debug, Clone)]
pub struct MergedBlob {
    data: Bytes,
    files: Vec<FileMetadata>,
}

impl MergedBlob {
    /// Concatenate files in order, recording each file's inclusive range
    pub fn from_files<I>(files: I) -> BlobResult<Self>
    where
        I: IntoIterator<Item = SourceFile>,
    {
        let files: Vec<SourceFile> = files.into_iter().collect();
        if files.is_empty() {
            return Err(BlobError::invalid("No files provided for upload"));
        }

        let total: usize = files.iter().map(|f| f.data.len()).sum();
        let mut data = BytesMut::with_capacity(total);
        let mut metadata = Vec::with_capacity(files.len());

        for file in files {
            if file.data.is_empty() {
                return Err(BlobError::invalid(format!(
                    "File {} is empty and cannot be addressed by a byte range",
                    file.name
                )));
            }
            let start = data.len() as u64;
            let size = file.data.len() as u64;
            data.extend_from_slice(&file.data);

            metadata.push(FileMetadata {
                file_hash: file_hash(&file.data),
                file_name: file.name,
                file_type: file.media_type,
                file_size: size,
                start_position: start,
                end_position: start + size - 1,
            });
        }

        Ok(Self {
            data: data.freeze(),
            files: metadata,
        })
    }

    /// The combined payload to store
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn files(&self) -> &[FileMetadata] {
        &self.files
    }

    pub fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Dataset items addressing each file once the payload is stored as `blob_id`
    pub fn items(&self, blob_id: &BlobId) -> Vec<DataItem> {
        self.files
            .iter()
            .map(|file| DataItem {
                blob_id: blob_id.clone(),
                path: file.file_name.clone(),
                data_type: Some(file.file_type.clone()).filter(|t| !t.is_empty()),
                extent: ItemExtent::Range(file.range()),
            })
            .collect()
    }
}

/// `0x`-prefixed lowercase hex SHA-256 digest
pub fn file_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("0x{}", hex)
}
