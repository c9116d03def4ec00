// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reference resolution: turns one addressing mode into one [`FileHandle`].
//!
//! Resolution is synchronous and makes no network calls; a bad remote path
//! fails here before any request is issued.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::PathSegments;
use crate::storage::{DirectoryHandle, FileHandle, FileService, ShareHandle};

/// How the remote file is located. Exactly one per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AddressingMode {
    /// Share looked up by name, then `path` below its root.
    ShareByName { share: String, path: String },
    /// `path` below the root of an existing share reference.
    Share { share: ShareHandle, path: String },
    /// `path` below an existing directory reference.
    Directory { directory: DirectoryHandle, path: String },
    /// A file reference, used as-is.
    File(FileHandle),
}

impl AddressingMode {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            AddressingMode::ShareByName { .. } => "share-name",
            AddressingMode::Share { .. } => "share",
            AddressingMode::Directory { .. } => "directory",
            AddressingMode::File(_) => "file",
        }
    }
}

/// Resolve `mode` to a single file reference.
pub fn resolve(service: &dyn FileService, mode: &AddressingMode) -> Result<FileHandle> {
    let file = match mode {
        AddressingMode::ShareByName { share, path } => {
            let segments = PathSegments::parse(path)?;
            let share = service.share(share)?;
            share.root_directory().file(&segments)
        }
        AddressingMode::Share { share, path } => {
            let segments = PathSegments::parse(path)?;
            share.root_directory().file(&segments)
        }
        AddressingMode::Directory { directory, path } => {
            let segments = PathSegments::parse(path)?;
            directory.file(&segments)
        }
        AddressingMode::File(file) => file.clone(),
    };

    tracing::debug!(mode = mode.label(), file = %file, "resolved remote file");
    Ok(file)
}
