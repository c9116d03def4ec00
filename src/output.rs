// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pass-through output describing a downloaded file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::FileHandle;

/// Descriptor emitted after a successful download when pass-through is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub name: String,
    pub share: String,
    /// `share/dir/.../file`
    pub remote_path: String,
    pub local_path: PathBuf,
    pub length: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl FileDescriptor {
    pub fn new(file: &FileHandle, local_path: &Path) -> Self {
        let props = file.properties().cloned().unwrap_or_default();
        Self {
            name: file.base_name().to_string(),
            share: file.share_name().to_string(),
            remote_path: file.full_path(),
            local_path: local_path.to_path_buf(),
            length: props.length,
            last_modified: props.last_modified,
            etag: props.etag,
            content_type: props.content_type,
            content_hash: props.content_hash,
            metadata: props.metadata,
        }
    }

    /// Pretty JSON for terminal output.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileProperties;

    #[test]
    fn test_descriptor_from_fetched_handle() {
        let mut file = FileHandle::parse("docs/a/report.pdf").unwrap();
        file.set_properties(FileProperties {
            length: 42,
            etag: Some("\"v1\"".into()),
            ..Default::default()
        });

        let descriptor = FileDescriptor::new(&file, Path::new("/tmp/report.pdf"));
        assert_eq!(descriptor.name, "report.pdf");
        assert_eq!(descriptor.remote_path, "docs/a/report.pdf");
        assert_eq!(descriptor.length, 42);

        let json: serde_json::Value = serde_json::from_str(&descriptor.to_json()).unwrap();
        assert_eq!(json["local_path"], "/tmp/report.pdf");
        assert_eq!(json["share"], "docs");
    }
}
