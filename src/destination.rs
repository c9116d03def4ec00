// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Destination planning.
//!
//! The user's destination is made absolute and probed once, at dispatch.
//! An existing directory receives the file under its remote name; anything
//! else is the literal target file path.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{DownloadError, Result};

/// Resolved user destination. Immutable after [`DestinationSpec::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationSpec {
    raw: PathBuf,
    is_existing_directory: bool,
}

/// What to do when the target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    Overwrite,
    FailIfExists,
}

impl OverwritePolicy {
    /// `force = true` allows overwriting.
    pub fn from_force(force: bool) -> Self {
        if force {
            OverwritePolicy::Overwrite
        } else {
            OverwritePolicy::FailIfExists
        }
    }
}

/// Concrete local target computed for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetPlan {
    pub path: PathBuf,
    pub overwrite: OverwritePolicy,
}

impl TargetPlan {
    /// Fail with `FileExists` if the policy forbids replacing an existing target.
    pub fn check_overwrite(&self) -> Result<()> {
        if self.overwrite == OverwritePolicy::FailIfExists && self.path.exists() {
            return Err(DownloadError::FileExists(self.path.clone()));
        }
        Ok(())
    }
}

impl DestinationSpec {
    /// Make `input` absolute against `cwd` and inspect it. `None` means `cwd`.
    pub fn resolve(input: Option<&Path>, cwd: &Path) -> Self {
        let raw = match input {
            None => cwd.to_path_buf(),
            Some(p) if p.as_os_str().is_empty() => cwd.to_path_buf(),
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => cwd.join(p),
        };
        let is_existing_directory = raw.is_dir();
        Self {
            raw,
            is_existing_directory,
        }
    }

    pub fn raw(&self) -> &Path {
        &self.raw
    }

    pub fn is_existing_directory(&self) -> bool {
        self.is_existing_directory
    }

    /// Compute the target for a remote file named `remote_base_name`.
    pub fn plan(&self, remote_base_name: &str, force: bool) -> TargetPlan {
        let path = if self.is_existing_directory {
            self.raw.join(remote_base_name)
        } else {
            self.raw.clone()
        };
        TargetPlan {
            path,
            overwrite: OverwritePolicy::from_force(force),
        }
    }
}
