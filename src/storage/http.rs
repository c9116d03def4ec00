// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! REST file service client.
//!
//! Files live at `{endpoint}/{share}/{path...}`. Attributes come from a
//! `HEAD` request, content from a streamed `GET`:
//!
//! | Header | Property |
//! |---|---|
//! | `Content-Length` | `length` |
//! | `Last-Modified` | `last_modified` |
//! | `ETag` | `etag` |
//! | `Content-Type` | `content_type` |
//! | `x-ms-content-sha256` | `content_hash` (hex) |
//! | `x-ms-file-attributes` | `read_only` when it lists `ReadOnly` |
//! | `x-ms-meta-*` | `metadata` |
//!
//! The configured timeout bounds connecting, the whole `HEAD` round trip,
//! and each gap between body chunks. A body that keeps flowing may take as
//! long as it needs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Client, Response, Url};

use super::{ByteStream, FileHandle, FileProperties, FileService};
use crate::error::{DownloadError, Result};

pub const CONTENT_HASH_HEADER: &str = "x-ms-content-sha256";
pub const FILE_ATTRIBUTES_HEADER: &str = "x-ms-file-attributes";
pub const METADATA_PREFIX: &str = "x-ms-meta-";

/// File service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFileService {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpFileService {
    /// Create a client for `endpoint`. `timeout` limits connecting, attribute
    /// fetches, and stalls in the content stream.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| DownloadError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(DownloadError::Config(format!(
                "endpoint '{}' cannot be used as a base URL",
                endpoint
            )));
        }
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DownloadError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// URL of `file`, with every component percent-encoded.
    pub fn file_url(&self, file: &FileHandle) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                DownloadError::Config(format!("endpoint '{}' cannot be a base", self.endpoint))
            })?;
            segments.pop_if_empty();
            segments.push(file.share_name());
            segments.extend(file.path());
        }
        Ok(url)
    }

    fn check_status(response: Response, file: &FileHandle) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(DownloadError::Network(format!(
                "{} returned {}",
                file.full_path(),
                status
            )))
        }
    }
}

#[async_trait]
impl FileService for HttpFileService {
    async fn fetch_attributes(&self, file: &FileHandle) -> Result<FileProperties> {
        let url = self.file_url(file)?;
        tracing::debug!(url = %url, "fetching file attributes");

        let response = self.client.head(url).timeout(self.timeout).send().await?;
        let response = Self::check_status(response, file)?;
        parse_properties(response.headers())
    }

    async fn open_read(&self, file: &FileHandle) -> Result<ByteStream> {
        let url = self.file_url(file)?;
        tracing::debug!(url = %url, "opening content stream");

        // Bounds the wait for headers only; the body is guarded per chunk.
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| {
                DownloadError::Network(format!(
                    "{} sent no response within {}s",
                    file.full_path(),
                    self.timeout.as_secs()
                ))
            })??;
        let response = Self::check_status(response, file)?;
        Ok(with_idle_timeout(response.bytes_stream(), self.timeout))
    }
}

/// Fail the stream with a network error when no chunk arrives within `idle`.
pub fn with_idle_timeout<S, E>(inner: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<DownloadError> + Send + 'static,
{
    stream::unfold(Some(Box::pin(inner)), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(chunk)) => Some((chunk.map_err(Into::into), Some(inner))),
            Ok(None) => None,
            Err(_) => Some((
                Err(DownloadError::Network(format!(
                    "no data received for {:.1}s",
                    idle.as_secs_f64()
                ))),
                None,
            )),
        }
    })
    .boxed()
}

/// Map response headers to [`FileProperties`].
pub fn parse_properties(headers: &HeaderMap) -> Result<FileProperties> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let length = text(CONTENT_LENGTH.as_str())
        .ok_or_else(|| DownloadError::Network("response has no Content-Length".to_string()))?
        .parse::<u64>()
        .map_err(|e| DownloadError::Network(format!("invalid Content-Length: {}", e)))?;

    let last_modified = text(LAST_MODIFIED.as_str())
        .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let read_only = text(FILE_ATTRIBUTES_HEADER)
        .map(|v| v.split('|').any(|attr| attr.trim().eq_ignore_ascii_case("ReadOnly")))
        .unwrap_or(false);

    let metadata: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(METADATA_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    Ok(FileProperties {
        length,
        last_modified,
        etag: text(ETAG.as_str()),
        content_type: text(CONTENT_TYPE.as_str()),
        content_hash: text(CONTENT_HASH_HEADER).map(|h| h.to_ascii_lowercase()),
        read_only,
        metadata,
    })
}
