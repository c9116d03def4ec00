// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy and user-facing error formatting for sharefetch.
//!
//! Every failure of a single download surfaces as a [`DownloadError`]. The
//! CLI renders it as an [`ErrorReport`] (headline, likely causes, hints) and
//! maps [`ErrorKind`] to a process exit code.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Project issues URL for support.
pub const ISSUES_URL: &str = "https://github.com/morganforge/sharefetch/issues";

/// Failure of one download invocation.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Remote path string has an empty or invalid segment.
    #[error("invalid remote path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The supplied inputs do not select exactly one addressing mode.
    #[error("invalid parameter set: {0}")]
    InvalidParameterSet(String),

    /// Target exists and overwrite was not allowed.
    #[error("file already exists: {}", .0.display())]
    FileExists(PathBuf),

    /// Transport failure during attribute fetch or transfer.
    #[error("network error: {0}")]
    Network(String),

    /// Computed content hash disagrees with the declared one.
    #[error("checksum mismatch for {path}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The invocation's cancellation token fired.
    #[error("download cancelled")]
    Cancelled,

    /// Local filesystem failure.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Fieldless classification of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPath,
    InvalidParameterSet,
    FileExists,
    NetworkError,
    ChecksumMismatch,
    Cancelled,
    Io,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidPath => "InvalidPath",
            ErrorKind::InvalidParameterSet => "InvalidParameterSet",
            ErrorKind::FileExists => "FileExists",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::ChecksumMismatch => "ChecksumMismatch",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Io => "Io",
            ErrorKind::Config => "Config",
        };
        f.write_str(name)
    }
}

impl DownloadError {
    /// Build an [`DownloadError::InvalidPath`].
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the local path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::InvalidPath { .. } => ErrorKind::InvalidPath,
            DownloadError::InvalidParameterSet(_) => ErrorKind::InvalidParameterSet,
            DownloadError::FileExists(_) => ErrorKind::FileExists,
            DownloadError::Network(_) => ErrorKind::NetworkError,
            DownloadError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::Io { .. } => ErrorKind::Io,
            DownloadError::Config(_) => ErrorKind::Config,
        }
    }

    /// Structured record of this error for machine-readable output.
    pub fn record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Explain this error for the terminal: what likely went wrong and what to try.
    pub fn explain(&self) -> ErrorReport {
        let (why, hints) = match self {
            DownloadError::InvalidPath { .. } => (
                vec![
                    "a path segment is empty (e.g. 'a//b')",
                    "a segment contains one of \" \\ : | < > * ? or a control character",
                ],
                vec!["use a slash-delimited path such as 'reports/2024/summary.pdf'"],
            ),
            DownloadError::InvalidParameterSet(_) => (
                vec!["no addressing option, or more than one, was given"],
                vec![
                    "pass exactly one of --share-name, --share, --directory or --file",
                    "--path is required unless --file is used",
                ],
            ),
            DownloadError::FileExists(_) => (
                vec!["a file with the same name is already at the destination"],
                vec!["re-run with --force to overwrite it", "choose another --destination"],
            ),
            DownloadError::Network(_) => (
                vec![
                    "the file service is unreachable or returned an error",
                    "the file does not exist on the share",
                ],
                vec![
                    "check the endpoint with `sharefetch config show`",
                    "re-run the download; nothing is retried automatically",
                ],
            ),
            DownloadError::ChecksumMismatch { .. } => (
                vec![
                    "content was corrupted in transit",
                    "the hash declared on the share is stale",
                ],
                vec!["re-run the download", "drop --check-hash to accept the content as-is"],
            ),
            DownloadError::Cancelled => (vec!["the download was interrupted"], vec![]),
            DownloadError::Io { .. } => (
                vec!["the destination is not writable or the disk is full"],
                vec!["check permissions on the destination directory"],
            ),
            DownloadError::Config(_) => (
                vec!["~/.sharefetch/config.json is not valid JSON"],
                vec!["fix or delete the configuration file"],
            ),
        };
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            why,
            hints,
        }
    }

    /// [`explain`](Self::explain) rendered as text.
    pub fn report(&self) -> String {
        self.explain().to_string()
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Network(err.to_string())
    }
}

/// Serializable error object surfaced to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

/// Terminal explanation of a failed download.
///
/// Renders as a `sharefetch:` headline followed by aligned `why:` and
/// `hint:` lines, ending with where to report problems:
///
/// ```
/// use sharefetch::error::{DownloadError, ErrorKind};
///
/// let report = DownloadError::Network("HTTP 503".into()).explain();
/// assert_eq!(report.kind, ErrorKind::NetworkError);
/// let text = report.to_string();
/// assert!(text.starts_with("sharefetch: network error: HTTP 503 [NetworkError]"));
/// assert!(text.contains("  hint: check the endpoint"));
/// ```
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub why: Vec<&'static str>,
    pub hints: Vec<&'static str>,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sharefetch: {} [{}]", self.message, self.kind)?;
        for line in &self.why {
            writeln!(f, "  why:  {}", line)?;
        }
        for line in &self.hints {
            writeln!(f, "  hint: {}", line)?;
        }
        write!(f, "  report problems at {}", ISSUES_URL)
    }
}
