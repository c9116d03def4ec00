// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote file references and the file service seam.
//!
//! Handles are plain values: building a share, directory or file reference
//! never touches the network. Only [`FileService::fetch_attributes`] and
//! [`FileService::open_read`] suspend.
//!
//! ```text
//! ShareHandle ──root_directory()──▶ DirectoryHandle ──file(path)──▶ FileHandle
//!                                                                     │
//!                              FileService::fetch_attributes ◀────────┤
//!                              FileService::open_read        ◀────────┘
//! ```

pub mod http;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, Result};
use crate::path::PathSegments;

pub use http::HttpFileService;
pub use memory::MemoryFileService;

/// Streamed file content.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Attributes of a remote file, populated by an attribute fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProperties {
    /// Content length in bytes
    pub length: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Hex-encoded SHA-256 of the content, when the service declares one
    pub content_hash: Option<String>,
    /// Read-only file attribute on the share
    pub read_only: bool,
    /// User metadata
    pub metadata: BTreeMap<String, String>,
}

/// Reference to a file share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareHandle {
    name: String,
}

impl ShareHandle {
    /// Build a share reference, validating the name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DownloadError::invalid_path(name, "share name is empty"));
        }
        if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
            return Err(DownloadError::invalid_path(
                name,
                "share name must be a single path component",
            ));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory of this share.
    pub fn root_directory(&self) -> DirectoryHandle {
        DirectoryHandle {
            share: self.name.clone(),
            path: Vec::new(),
        }
    }
}

/// Reference to a directory inside a share. An empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryHandle {
    share: String,
    path: Vec<String>,
}

impl DirectoryHandle {
    /// Directory `path` inside `share`.
    pub fn new(share: &ShareHandle, path: PathSegments) -> Self {
        Self {
            share: share.name().to_string(),
            path: path.segments().to_vec(),
        }
    }

    /// Parse `share[/dir/...]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.replace('\\', "/");
        let trimmed = normalized.trim_start_matches('/');
        match trimmed.split_once('/') {
            None => Ok(ShareHandle::new(trimmed)?.root_directory()),
            Some((share, rest)) => {
                let share = ShareHandle::new(share)?;
                Ok(Self::new(&share, PathSegments::parse(rest)?))
            }
        }
    }

    pub fn share_name(&self) -> &str {
        &self.share
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Resolve a file below this directory.
    pub fn file(&self, relative: &PathSegments) -> FileHandle {
        let mut segments = self.path.clone();
        segments.extend(relative.segments().iter().cloned());
        FileHandle {
            share: self.share.clone(),
            path: segments,
            properties: None,
        }
    }

    /// `share/dir/...`
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.share.clone()
        } else {
            format!("{}/{}", self.share, self.path.join("/"))
        }
    }
}

/// Reference to a single remote file.
///
/// `length()` is zero until attributes have been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    share: String,
    path: Vec<String>,
    properties: Option<FileProperties>,
}

impl FileHandle {
    pub fn new(share: &ShareHandle, path: PathSegments) -> Self {
        Self {
            share: share.name().to_string(),
            path: path.segments().to_vec(),
            properties: None,
        }
    }

    /// Parse `share/dir/.../file`.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.replace('\\', "/");
        let trimmed = normalized.trim_start_matches('/');
        let (share, rest) = trimmed.split_once('/').ok_or_else(|| {
            DownloadError::invalid_path(raw, "expected '<share>/<path to file>'")
        })?;
        Ok(Self::new(&ShareHandle::new(share)?, PathSegments::parse(rest)?))
    }

    pub fn share_name(&self) -> &str {
        &self.share
    }

    /// Path components inside the share.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Name of the file itself.
    pub fn base_name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// `share/dir/.../file`
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.share, self.path.join("/"))
    }

    pub fn length(&self) -> u64 {
        self.properties.as_ref().map(|p| p.length).unwrap_or(0)
    }

    pub fn properties(&self) -> Option<&FileProperties> {
        self.properties.as_ref()
    }

    pub fn has_attributes(&self) -> bool {
        self.properties.is_some()
    }

    /// Attach freshly fetched attributes.
    pub fn set_properties(&mut self, properties: FileProperties) {
        self.properties = Some(properties);
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

/// Storage client collaborator.
///
/// Implementations perform the network round trips; cancellation is applied
/// by the caller dropping the returned futures and streams.
#[async_trait]
pub trait FileService: Send + Sync {
    /// Obtain a share reference by name. Local, no round trip.
    fn share(&self, name: &str) -> Result<ShareHandle> {
        ShareHandle::new(name)
    }

    /// Fetch size and metadata of `file`.
    async fn fetch_attributes(&self, file: &FileHandle) -> Result<FileProperties>;

    /// Open a stream over the content of `file`.
    async fn open_read(&self, file: &FileHandle) -> Result<ByteStream>;
}
