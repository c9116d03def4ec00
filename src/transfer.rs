// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer executor: attribute fetch, streamed download, verification.
//!
//! Bytes are written to a staging file next to the target
//! (`<target>.sfpart`) and renamed onto the target only after the length
//! and, when requested, the content hash have been checked. Any failure
//! before the rename removes the staging file, so an existing target is
//! never left half replaced. Staging files are created exclusively; a file
//! already sitting under a staging name makes the download pick the next
//! name (`<target>.1.sfpart`, ...).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::destination::TargetPlan;
use crate::error::{DownloadError, Result};
use crate::progress::{ProgressReporter, TransferState};
use crate::storage::{FileHandle, FileProperties, FileService};

/// Write buffer size for downloads (2 MB) - reduces I/O operations
pub const DEFAULT_WRITE_BUFFER: usize = 2 * 1024 * 1024;

/// Suffix of the staging file a download is written to.
pub const STAGING_SUFFIX: &str = ".sfpart";

/// Staging names tried before giving up: `x.sfpart`, `x.1.sfpart`, ...
const STAGING_ATTEMPTS: u32 = 8;

/// Options for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Compare the SHA-256 of the received bytes with the declared hash
    pub verify_checksum: bool,
    /// Copy last-modified time and read-only flag to the local file.
    /// `None` on hosts where the option is not offered.
    pub preserve_smb_attributes: Option<bool>,
    pub write_buffer_bytes: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            verify_checksum: false,
            preserve_smb_attributes: None,
            write_buffer_bytes: DEFAULT_WRITE_BUFFER,
        }
    }
}

impl TransferOptions {
    pub fn new(verify_checksum: bool) -> Self {
        Self {
            verify_checksum,
            ..Self::default()
        }
    }

    /// Fill the platform-conditional preservation option for this host.
    pub fn with_host_preservation(mut self, requested: bool) -> Self {
        self.preserve_smb_attributes = preservation_for_host(requested);
        self
    }

    fn preserves_attributes(&self) -> bool {
        self.preserve_smb_attributes == Some(true)
    }
}

/// Only Windows hosts offer attribute preservation.
pub fn preservation_for_host(requested: bool) -> Option<bool> {
    if cfg!(windows) {
        Some(requested)
    } else {
        None
    }
}

/// Sibling staging path for `target`. `attempt` 0 is `<name>.sfpart`,
/// later attempts are `<name>.<attempt>.sfpart`.
pub fn staging_path(target: &Path, attempt: u32) -> Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        DownloadError::io(
            target,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "target has no file name"),
        )
    })?;
    let mut staged = OsString::from(name);
    if attempt > 0 {
        staged.push(format!(".{}", attempt));
    }
    staged.push(STAGING_SUFFIX);
    Ok(target.with_file_name(staged))
}

/// Create a fresh staging file next to `target`. Existing files are never
/// opened, so anything already on disk under a staging name is left alone.
async fn create_staging(target: &Path) -> Result<(PathBuf, tokio::fs::File)> {
    for attempt in 0..STAGING_ATTEMPTS {
        let candidate = staging_path(target, attempt)?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(staging = %candidate.display(), "staging name taken");
            }
            Err(e) => return Err(DownloadError::io(&candidate, e)),
        }
    }
    Err(DownloadError::FileExists(staging_path(target, 0)?))
}

/// Drives one download against a [`FileService`].
#[derive(Clone)]
pub struct TransferExecutor {
    service: Arc<dyn FileService>,
}

impl TransferExecutor {
    pub fn new(service: Arc<dyn FileService>) -> Self {
        Self { service }
    }

    /// Download `file` to `plan.path`.
    ///
    /// On return `file` carries fetched attributes. On failure the progress
    /// record is moved to `Failed` or `Cancelled` before the error is returned.
    pub async fn download(
        &self,
        file: &mut FileHandle,
        plan: &TargetPlan,
        options: &TransferOptions,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<()> {
        let progress_id = progress.snapshot().id;
        tracing::info!(
            progress_id,
            source = %file,
            target = %plan.path.display(),
            verify = options.verify_checksum,
            "download starting"
        );

        match self.run(file, plan, options, cancel, progress).await {
            Ok(()) => {
                tracing::info!(
                    progress_id,
                    target = %plan.path.display(),
                    bytes = file.length(),
                    "download completed"
                );
                Ok(())
            }
            Err(err) => {
                progress.fail(&err);
                if matches!(err, DownloadError::Cancelled) {
                    tracing::warn!(progress_id, target = %plan.path.display(), "download cancelled");
                } else {
                    tracing::error!(
                        progress_id,
                        target = %plan.path.display(),
                        error = %err,
                        "download failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        file: &mut FileHandle,
        plan: &TargetPlan,
        options: &TransferOptions,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<()> {
        plan.check_overwrite()?;

        let properties = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            props = self.service.fetch_attributes(file) => props?,
        };
        file.set_properties(properties.clone());
        progress.set_total(properties.length);
        progress.advance(TransferState::AttributesFetched);

        if let Some(parent) = plan.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let (staging, out) = create_staging(&plan.path).await?;
        progress.advance(TransferState::Transferring);

        // Until the rename succeeds the staging file is ours to remove.
        let result = self
            .commit(file, &properties, plan, &staging, out, options, cancel, progress)
            .await;
        if let Err(err) = result {
            if let Err(e) = tokio::fs::remove_file(&staging).await {
                tracing::debug!(staging = %staging.display(), error = %e, "staging file not removed");
            }
            return Err(err);
        }

        if options.preserves_attributes() && properties.read_only {
            set_read_only(&plan.path)?;
        }

        progress.advance(TransferState::Completed);
        Ok(())
    }

    /// Fill the staging file, re-check the target, and move it into place.
    async fn commit(
        &self,
        file: &FileHandle,
        properties: &FileProperties,
        plan: &TargetPlan,
        staging: &Path,
        out: tokio::fs::File,
        options: &TransferOptions,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<()> {
        self.stream_to_staging(file, properties, staging, out, options, cancel, progress)
            .await?;
        plan.check_overwrite()?;

        if options.preserves_attributes() {
            if let Some(modified) = properties.last_modified {
                set_modified(staging, SystemTime::from(modified))?;
            }
        }

        tokio::fs::rename(staging, &plan.path)
            .await
            .map_err(|e| DownloadError::io(&plan.path, e))
    }

    async fn stream_to_staging(
        &self,
        file: &FileHandle,
        properties: &FileProperties,
        staging: &Path,
        out: tokio::fs::File,
        options: &TransferOptions,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> Result<()> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            stream = self.service.open_read(file) => stream?,
        };

        let mut writer = BufWriter::with_capacity(options.write_buffer_bytes.max(1), out);
        let mut hasher = options.verify_checksum.then(Sha256::new);
        let mut transferred = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(staging, e))?;
            transferred += chunk.len() as u64;
            progress.set_transferred(transferred);
        }

        writer.flush().await.map_err(|e| DownloadError::io(staging, e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(staging, e))?;

        if transferred != properties.length {
            return Err(DownloadError::Network(format!(
                "transfer of {} ended after {} of {} bytes",
                file.full_path(),
                transferred,
                properties.length
            )));
        }

        if let Some(hasher) = hasher {
            let actual = hex::encode(hasher.finalize());
            match properties.content_hash.as_deref() {
                Some(expected) if !expected.eq_ignore_ascii_case(&actual) => {
                    return Err(DownloadError::ChecksumMismatch {
                        path: file.full_path(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
                Some(_) => tracing::debug!(file = %file, "content hash verified"),
                None => tracing::warn!(
                    file = %file,
                    "checksum verification requested but the service declares no content hash"
                ),
            }
        }

        Ok(())
    }
}

fn set_modified(path: &Path, modified: SystemTime) -> Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(modified))
        .map_err(|e| DownloadError::io(path, e))
}

fn set_read_only(path: &Path) -> Result<()> {
    let mut permissions = std::fs::metadata(path)
        .map_err(|e| DownloadError::io(path, e))?
        .permissions();
    permissions.set_readonly(true);
    std::fs::set_permissions(path, permissions).map_err(|e| DownloadError::io(path, e))
}
