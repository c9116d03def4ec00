// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote path parsing.
//!
//! A remote path is an ordered list of validated components. One leading
//! slash is accepted and ignored; backslashes are treated as separators.
//! Everything else that would yield an empty component (`a//b`, `a/`) is
//! rejected, as are `.`/`..` and names containing characters the file
//! service does not allow.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, Result};

/// Longest component name the file service accepts.
pub const MAX_SEGMENT_LEN: usize = 255;

const INVALID_CHARS: &[char] = &['"', '\\', ':', '|', '<', '>', '*', '?'];

/// Validated, non-empty list of remote path components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegments(Vec<String>);

impl PathSegments {
    /// Parse and validate a slash-delimited remote path.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.replace('\\', "/");
        let trimmed = normalized.strip_prefix('/').unwrap_or(&normalized);

        if trimmed.is_empty() {
            return Err(DownloadError::invalid_path(raw, "path is empty"));
        }

        let segments = trimmed
            .split('/')
            .map(|segment| validate_segment(raw, segment).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self(segments))
    }

    /// Build from already split components, validating each one.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let joined = segments.join("/");
        if segments.is_empty() {
            return Err(DownloadError::invalid_path(joined, "path is empty"));
        }
        for segment in &segments {
            validate_segment(&joined, segment)?;
        }
        Ok(Self(segments))
    }

    /// Last component.
    pub fn base_name(&self) -> &str {
        // Non-empty by construction.
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// All components but the last.
    pub fn parent(&self) -> &[String] {
        &self.0[..self.0.len() - 1]
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append `other` below this path.
    pub fn join(&self, other: &PathSegments) -> PathSegments {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        PathSegments(segments)
    }
}

impl fmt::Display for PathSegments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

fn validate_segment<'a>(raw: &str, segment: &'a str) -> Result<&'a str> {
    if segment.is_empty() {
        return Err(DownloadError::invalid_path(raw, "empty path segment"));
    }
    if segment == "." || segment == ".." {
        return Err(DownloadError::invalid_path(
            raw,
            format!("relative segment '{}' is not allowed", segment),
        ));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(DownloadError::invalid_path(
            raw,
            format!("segment longer than {} bytes", MAX_SEGMENT_LEN),
        ));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| INVALID_CHARS.contains(c) || c.is_control())
    {
        return Err(DownloadError::invalid_path(
            raw,
            format!("segment '{}' contains disallowed character {:?}", segment, c),
        ));
    }
    Ok(segment)
}
