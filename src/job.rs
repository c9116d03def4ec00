// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Background jobs.
//!
//! A job wraps the same download task that runs inline; only the scheduling
//! differs. Jobs are tracked in a registry with their own lifecycle:
//!
//! ```text
//! register ──▶ NotStarted ──start──▶ Running ──▶ Completed | Failed | Stopped
//!                   │                                  │
//!                   └──cancel──▶ Stopped               └──dispose──▶ (removed)
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use sharefetch::job::JobRegistry;
//!
//! # async fn example() {
//! let jobs = JobRegistry::global();
//! let ctx = jobs.register("GetFileContent", "docs/report.pdf");
//! let mut handle = jobs.start(ctx, |_ctx| async move { Ok(None) });
//! let info = handle.wait().await;
//! println!("job {} finished: {:?}", info.id, info.state);
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, ErrorKind, ErrorRecord};
use crate::locks::{resilient_read, resilient_write};
use crate::output::FileDescriptor;
use crate::progress::ProgressRecord;

pub type JobId = u64;

/// What a job's task produces.
pub type JobResult = Result<Option<FileDescriptor>, DownloadError>;

static GLOBAL_REGISTRY: Lazy<Arc<JobRegistry>> = Lazy::new(|| Arc::new(JobRegistry::new()));

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Stopped
        )
    }
}

/// Snapshot of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    /// What the job is doing, e.g. the remote file
    pub command: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<FileDescriptor>,
    pub error: Option<ErrorRecord>,
}

/// Registry lookup failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} has not finished; stop it before disposing")]
    StillRunning(JobId),

    #[error("job {0} was already started")]
    AlreadyStarted(JobId),
}

type ProgressSlot = Arc<RwLock<Option<watch::Receiver<ProgressRecord>>>>;

struct JobEntry {
    status: Arc<watch::Sender<JobInfo>>,
    cancel: CancellationToken,
    progress: ProgressSlot,
    handle: Option<JoinHandle<()>>,
}

/// Handed to the job's task.
#[derive(Clone)]
pub struct JobContext {
    id: JobId,
    cancel: CancellationToken,
    progress: ProgressSlot,
}

impl JobContext {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Token that fires when the job is stopped.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Expose the job's progress record through the registry.
    pub fn attach_progress(&self, rx: watch::Receiver<ProgressRecord>) {
        *resilient_write(&self.progress) = Some(rx);
    }
}

/// Caller-side handle to a started job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: JobId,
    status_rx: watch::Receiver<JobInfo>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn info(&self) -> JobInfo {
        self.status_rx.borrow().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.status_rx.borrow().state.is_terminal()
    }

    /// Request the job to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(&mut self) -> JobInfo {
        loop {
            if self.status_rx.borrow().state.is_terminal() {
                return self.status_rx.borrow().clone();
            }
            if self.status_rx.changed().await.is_err() {
                // Channel closed
                return self.status_rx.borrow().clone();
            }
        }
    }
}

/// Table of jobs in this process.
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<JobId, JobEntry>>,
    next_id: AtomicU64,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<JobRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Create bookkeeping for a job that has not started yet.
    pub fn register(&self, name: &str, command: &str) -> JobContext {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let info = JobInfo {
            id,
            name: name.to_string(),
            command: command.to_string(),
            state: JobState::NotStarted,
            created_at: Utc::now(),
            finished_at: None,
            output: None,
            error: None,
        };
        let (status, _rx) = watch::channel(info);
        let ctx = JobContext {
            id,
            cancel: CancellationToken::new(),
            progress: Arc::new(RwLock::new(None)),
        };

        resilient_write(&self.jobs).insert(
            id,
            JobEntry {
                status: Arc::new(status),
                cancel: ctx.cancel.clone(),
                progress: ctx.progress.clone(),
                handle: None,
            },
        );
        tracing::debug!(job_id = id, name, "job registered");
        ctx
    }

    /// Spawn the task for a registered job.
    ///
    /// A job stopped before it started stays `Stopped` and its task never runs.
    pub fn start<F, Fut>(&self, ctx: JobContext, job: F) -> JobHandle
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let id = ctx.id;
        let cancel = ctx.cancel.clone();
        let mut jobs = resilient_write(&self.jobs);

        let Some(entry) = jobs.get_mut(&id) else {
            // Disposed between register and start: hand back a finished handle.
            let (_tx, status_rx) = watch::channel(JobInfo {
                id,
                name: String::new(),
                command: String::new(),
                state: JobState::Stopped,
                created_at: Utc::now(),
                finished_at: Some(Utc::now()),
                output: None,
                error: None,
            });
            return JobHandle {
                id,
                status_rx,
                cancel,
            };
        };

        let status_rx = entry.status.subscribe();
        let handle = JobHandle {
            id,
            status_rx,
            cancel,
        };

        if entry.status.borrow().state != JobState::NotStarted || entry.handle.is_some() {
            tracing::warn!(job_id = id, "{}", JobError::AlreadyStarted(id));
            return handle;
        }

        entry
            .status
            .send_modify(|info| info.state = JobState::Running);

        let status = entry.status.clone();
        let inner = tokio::spawn(job(ctx));
        entry.handle = Some(tokio::spawn(async move {
            let result = inner.await;
            status.send_modify(|info| {
                info.finished_at = Some(Utc::now());
                match result {
                    Ok(Ok(output)) => {
                        info.state = JobState::Completed;
                        info.output = output;
                    }
                    Ok(Err(err)) => {
                        info.state = if err.kind() == ErrorKind::Cancelled {
                            JobState::Stopped
                        } else {
                            JobState::Failed
                        };
                        info.error = Some(err.record());
                    }
                    Err(join_err) => {
                        info.state = JobState::Failed;
                        info.error = Some(ErrorRecord {
                            kind: ErrorKind::Io,
                            message: format!("job task aborted: {}", join_err),
                        });
                    }
                }
            });
            tracing::info!(job_id = id, state = ?status.borrow().state, "job finished");
        }));

        tracing::info!(job_id = id, "job started");
        handle
    }

    pub fn info(&self, id: JobId) -> Option<JobInfo> {
        resilient_read(&self.jobs)
            .get(&id)
            .map(|entry| entry.status.borrow().clone())
    }

    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.info(id).map(|info| info.state)
    }

    /// Latest progress record of the job's transfer, once it has one.
    pub fn progress(&self, id: JobId) -> Option<ProgressRecord> {
        let jobs = resilient_read(&self.jobs);
        let entry = jobs.get(&id)?;
        let slot = resilient_read(&entry.progress);
        slot.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Stop a job. A job that has not started moves straight to `Stopped`.
    pub fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let jobs = resilient_read(&self.jobs);
        let entry = jobs.get(&id).ok_or(JobError::NotFound(id))?;
        entry.cancel.cancel();
        entry.status.send_if_modified(|info| {
            if info.state == JobState::NotStarted {
                info.state = JobState::Stopped;
                info.finished_at = Some(Utc::now());
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Wait for a job to finish.
    pub async fn wait(&self, id: JobId) -> Result<JobInfo, JobError> {
        let mut rx = {
            let jobs = resilient_read(&self.jobs);
            jobs.get(&id)
                .ok_or(JobError::NotFound(id))?
                .status
                .subscribe()
        };
        loop {
            if rx.borrow().state.is_terminal() {
                return Ok(rx.borrow().clone());
            }
            if rx.changed().await.is_err() {
                return Ok(rx.borrow().clone());
            }
        }
    }

    /// Remove a finished job from the registry.
    pub fn dispose(&self, id: JobId) -> Result<JobInfo, JobError> {
        let mut jobs = resilient_write(&self.jobs);
        let entry = jobs.get(&id).ok_or(JobError::NotFound(id))?;
        let info = entry.status.borrow().clone();
        if !info.state.is_terminal() {
            return Err(JobError::StillRunning(id));
        }
        jobs.remove(&id);
        tracing::debug!(job_id = id, "job disposed");
        Ok(info)
    }

    /// All jobs, ordered by id.
    pub fn list(&self) -> Vec<JobInfo> {
        resilient_read(&self.jobs)
            .values()
            .map(|entry| entry.status.borrow().clone())
            .collect()
    }
}
