// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `~/.sharefetch/config.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, Result};
use crate::transfer::DEFAULT_WRITE_BUFFER;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the file service, e.g. `https://files.example.com`
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Verify the content hash of every download (default: false)
    #[serde(default)]
    pub verify_checksum: bool,
    #[serde(default = "default_write_buffer_bytes")]
    pub write_buffer_bytes: usize,
    /// Bounds connecting, the attribute round trip and any gap between body
    /// chunks. A whole download may take longer.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Render a progress bar for inline downloads (default: true)
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_write_buffer_bytes() -> usize {
    DEFAULT_WRITE_BUFFER
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_show_progress() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            verify_checksum: false,
            write_buffer_bytes: default_write_buffer_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            show_progress: default_show_progress(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| DownloadError::io(path, e))?;
            serde_json::from_str(&content)
                .map_err(|e| DownloadError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            Config::default()
        };

        if let Some(endpoint) = &config.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                tracing::warn!(endpoint, "endpoint does not look like an http(s) URL");
            }
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| DownloadError::io(path, e))
    }
}

/// `~/.sharefetch`
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DownloadError::Config("could not find home directory".into()))?;
    Ok(home.join(".sharefetch"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}
