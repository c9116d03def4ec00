// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process file service.
//!
//! Holds share contents in memory and streams them in fixed-size chunks.
//! Faults can be attached per file to exercise the failure paths of the
//! transfer executor without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};

use super::{ByteStream, FileHandle, FileProperties, FileService};
use crate::error::{DownloadError, Result};
use crate::locks::{resilient_read, resilient_write};
use crate::path::PathSegments;

/// Default chunk size for streamed content (64 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Misbehaviour attached to one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Serve content with one byte flipped; properties still describe the original.
    CorruptContent,
    /// Fail the stream with a network error once this many bytes were sent.
    DropAfter(u64),
    /// Fail the attribute fetch.
    AttributesUnavailable,
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: Bytes,
    properties: FileProperties,
    fault: Option<Fault>,
}

/// Map of `(share, path)` to content.
#[derive(Debug)]
pub struct MemoryFileService {
    files: RwLock<HashMap<(String, String), StoredFile>>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    requests: AtomicUsize,
}

impl Default for MemoryFileService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileService {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
            requests: AtomicUsize::new(0),
        }
    }

    /// Stream content in chunks of `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Sleep before yielding each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Store `content` at `share/path`, declaring its SHA-256.
    pub fn insert(&self, share: &str, path: &str, content: impl Into<Bytes>) -> Result<()> {
        let content = content.into();
        let properties = FileProperties {
            length: content.len() as u64,
            last_modified: Some(Utc::now()),
            etag: Some(format!("\"{}\"", hex::encode(&Sha256::digest(&content)[..8]))),
            content_type: Some("application/octet-stream".to_string()),
            content_hash: Some(hex::encode(Sha256::digest(&content))),
            read_only: false,
            metadata: BTreeMap::new(),
        };
        self.insert_with_properties(share, path, content, properties)
    }

    /// Store `content` with caller-supplied properties.
    pub fn insert_with_properties(
        &self,
        share: &str,
        path: &str,
        content: impl Into<Bytes>,
        properties: FileProperties,
    ) -> Result<()> {
        let key = Self::key(share, path)?;
        resilient_write(&self.files).insert(
            key,
            StoredFile {
                content: content.into(),
                properties,
                fault: None,
            },
        );
        Ok(())
    }

    /// Attach a fault to an existing file.
    pub fn set_fault(&self, share: &str, path: &str, fault: Option<Fault>) -> Result<()> {
        let key = Self::key(share, path)?;
        let mut files = resilient_write(&self.files);
        let stored = files
            .get_mut(&key)
            .ok_or_else(|| not_found(&key.0, &key.1))?;
        stored.fault = fault;
        Ok(())
    }

    /// Number of attribute fetches and reads served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn key(share: &str, path: &str) -> Result<(String, String)> {
        Ok((share.to_string(), PathSegments::parse(path)?.to_string()))
    }

    fn lookup(&self, file: &FileHandle) -> Result<StoredFile> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let path = file.path().join("/");
        resilient_read(&self.files)
            .get(&(file.share_name().to_string(), path.clone()))
            .cloned()
            .ok_or_else(|| not_found(file.share_name(), &path))
    }
}

fn not_found(share: &str, path: &str) -> DownloadError {
    DownloadError::Network(format!("404 Not Found: {}/{}", share, path))
}

#[async_trait]
impl FileService for MemoryFileService {
    async fn fetch_attributes(&self, file: &FileHandle) -> Result<FileProperties> {
        let stored = self.lookup(file)?;
        if stored.fault == Some(Fault::AttributesUnavailable) {
            return Err(DownloadError::Network(
                "connection reset while fetching attributes".to_string(),
            ));
        }
        Ok(stored.properties)
    }

    async fn open_read(&self, file: &FileHandle) -> Result<ByteStream> {
        let stored = self.lookup(file)?;

        let mut content = stored.content.to_vec();
        if stored.fault == Some(Fault::CorruptContent) {
            if let Some(first) = content.first_mut() {
                *first ^= 0xFF;
            }
        }
        let drop_after = match stored.fault {
            Some(Fault::DropAfter(limit)) => Some(limit),
            _ => None,
        };

        let mut items: Vec<Result<Bytes>> = Vec::new();
        let mut sent = 0u64;
        for chunk in content.chunks(self.chunk_size) {
            if let Some(limit) = drop_after {
                if sent >= limit {
                    items.push(Err(DownloadError::Network(
                        "connection reset by peer".to_string(),
                    )));
                    break;
                }
            }
            sent += chunk.len() as u64;
            items.push(Ok(Bytes::copy_from_slice(chunk)));
        }

        let delay = self.chunk_delay;
        let stream = stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(stream.boxed())
    }
}
