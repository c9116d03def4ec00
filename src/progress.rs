// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Progress record and transfer state machine.
//!
//! One [`ProgressRecord`] exists per invocation. It is written only by the
//! transfer executor through a [`ProgressReporter`] and read by sinks via a
//! `watch` receiver.
//!
//! ```text
//! Pending ─▶ AttributesFetched ─▶ Transferring ─▶ Completed
//!    │               │                  │
//!    └───────────────┴──────────────────┴──▶ Failed | Cancelled
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::DownloadError;

static NEXT_PROGRESS_ID: AtomicU64 = AtomicU64::new(1);

/// State of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    AttributesFetched,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    /// Returns true once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }

    /// Returns true while bytes may be moving.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransferState::AttributesFetched | TransferState::Transferring
        )
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_advance_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Pending, AttributesFetched) => true,
            (AttributesFetched, Transferring) => true,
            (Transferring, Completed) => true,
            (current, Failed | Cancelled) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Default status line for the state.
    pub fn status_text(&self) -> &'static str {
        match self {
            TransferState::Pending => "preparing",
            TransferState::AttributesFetched => "attributes fetched",
            TransferState::Transferring => "transferring",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Cancelled => "cancelled",
        }
    }
}

/// Progress of one download.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    pub id: u64,
    /// "Downloading <share/path> to <local path>"
    pub description: String,
    pub status_text: String,
    pub state: TransferState,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    /// Bytes per second averaged since the transfer started
    pub speed_bps: Option<u64>,
    pub eta_seconds: Option<u64>,
    pub error: Option<String>,
}

impl ProgressRecord {
    fn new(id: u64, description: String) -> Self {
        Self {
            id,
            description,
            status_text: TransferState::Pending.status_text().to_string(),
            state: TransferState::Pending,
            bytes_transferred: 0,
            total_bytes: None,
            speed_bps: None,
            eta_seconds: None,
            error: None,
        }
    }

    /// Get progress percentage (0-100) if the total is known.
    pub fn percent(&self) -> Option<f64> {
        match self.state {
            TransferState::Completed => Some(100.0),
            TransferState::Pending => Some(0.0),
            _ => self.total_bytes.map(|total| {
                if total == 0 {
                    0.0
                } else {
                    (self.bytes_transferred as f64 / total as f64) * 100.0
                }
            }),
        }
    }

    /// Get formatted speed string.
    pub fn speed_string(&self) -> Option<String> {
        self.speed_bps.map(|bps| {
            if bps >= 1_073_741_824 {
                format!("{:.1} GB/s", bps as f64 / 1_073_741_824.0)
            } else if bps >= 1_048_576 {
                format!("{:.1} MB/s", bps as f64 / 1_048_576.0)
            } else if bps >= 1024 {
                format!("{:.1} KB/s", bps as f64 / 1024.0)
            } else {
                format!("{} B/s", bps)
            }
        })
    }

    /// Get formatted ETA string.
    pub fn eta_string(&self) -> Option<String> {
        self.eta_seconds.map(|secs| {
            if secs >= 3600 {
                format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
            } else if secs >= 60 {
                format!("{}m {}s", secs / 60, secs % 60)
            } else {
                format!("{}s", secs)
            }
        })
    }
}

/// Write side of a progress record.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<ProgressRecord>,
    started: Option<Instant>,
}

impl ProgressReporter {
    /// Create a record describing a download from `source` to `destination`.
    pub fn new(source: &str, destination: &std::path::Path) -> Self {
        let id = NEXT_PROGRESS_ID.fetch_add(1, Ordering::Relaxed);
        let description = format!("Downloading {} to {}", source, destination.display());
        let (tx, _rx) = watch::channel(ProgressRecord::new(id, description));
        Self { tx, started: None }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressRecord> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressRecord {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> TransferState {
        self.tx.borrow().state
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: TransferState) -> bool {
        let current = self.state();
        if !current.can_advance_to(next) {
            tracing::warn!(?current, ?next, "ignoring illegal progress transition");
            return false;
        }
        if next == TransferState::Transferring {
            self.started = Some(Instant::now());
        }
        self.tx.send_modify(|record| {
            record.state = next;
            record.status_text = next.status_text().to_string();
            if next == TransferState::Completed {
                record.eta_seconds = Some(0);
            }
        });
        true
    }

    /// Record the total length once attributes are known.
    pub fn set_total(&mut self, total: u64) {
        self.tx.send_modify(|record| record.total_bytes = Some(total));
    }

    /// Record the running byte count and refresh speed and ETA.
    pub fn set_transferred(&mut self, bytes: u64) {
        let elapsed = self
            .started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.tx.send_modify(|record| {
            record.bytes_transferred = bytes;
            if elapsed > 0.0 {
                let speed = (bytes as f64 / elapsed) as u64;
                record.speed_bps = Some(speed);
                if let Some(total) = record.total_bytes {
                    if speed > 0 {
                        record.eta_seconds = Some(total.saturating_sub(bytes) / speed);
                    }
                }
            }
            if let Some(pct) = record.percent() {
                record.status_text = format!("transferring ({:.0}%)", pct);
            }
        });
    }

    /// Terminal transition for `err`: `Cancelled` for cancellation, `Failed` otherwise.
    pub fn fail(&mut self, err: &DownloadError) {
        let next = if matches!(err, DownloadError::Cancelled) {
            TransferState::Cancelled
        } else {
            TransferState::Failed
        };
        if self.advance(next) {
            let message = err.to_string();
            self.tx.send_modify(|record| record.error = Some(message));
        }
    }
}
