// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! sharefetch - single-file downloads from a cloud file share
//!
//! One invocation locates one remote file, plans a local target, and streams
//! the content to disk with progress, cancellation, and optional checksum
//! verification. It can run inline or as a background job.
//!
//! **Resolve** -> **Plan** -> **Confirm** -> **Transfer** -> **Output**
//!
//! # Core Modules
//!
//! - [`resolver`] - Addressing modes and remote file resolution
//! - [`destination`] - Local target planning and overwrite policy
//! - [`transfer`] - Attribute fetch, streamed download, verification
//! - [`progress`] - Progress record and transfer state machine
//! - [`coordinator`] - Inline vs background execution, confirmation, output
//! - [`job`] - Background job registry
//! - [`storage`] - Remote handles and file service clients (HTTP, in-memory)
//! - [`error`] - Error taxonomy and consistent error formatting

pub mod config;
pub mod coordinator;
pub mod destination;
pub mod error;
pub mod job;
pub mod locks;
pub mod output;
pub mod path;
pub mod progress;
pub mod resolver;
pub mod storage;
pub mod transfer;

pub use config::Config;
pub use coordinator::{Coordinator, GetFileRequest, HostSession, Outcome, JOB_NAME};
pub use destination::{DestinationSpec, OverwritePolicy, TargetPlan};
pub use error::{DownloadError, ErrorKind, ErrorRecord, Result};
pub use job::{JobHandle, JobInfo, JobRegistry, JobState};
pub use output::FileDescriptor;
pub use path::PathSegments;
pub use progress::{ProgressRecord, ProgressReporter, TransferState};
pub use resolver::{resolve, AddressingMode};
pub use storage::http::HttpFileService;
pub use storage::memory::MemoryFileService;
pub use storage::{DirectoryHandle, FileHandle, FileProperties, FileService, ShareHandle};
pub use transfer::{TransferExecutor, TransferOptions};
