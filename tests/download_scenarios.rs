// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end download scenarios against the in-memory file service.
//!
//! Each test drives a full invocation through the [`Coordinator`]:
//! resolve -> plan -> confirm -> transfer -> output.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use sharefetch::storage::memory::{Fault, MemoryFileService};
use sharefetch::{
    AddressingMode, Coordinator, DirectoryHandle, ErrorKind, FileDescriptor, FileHandle,
    GetFileRequest, HostSession, JobRegistry, JobState, Outcome, ShareHandle,
};

// =============================================================================
// Test host
// =============================================================================

struct RecordingSession {
    cwd: PathBuf,
    approve: bool,
    cancel: CancellationToken,
    outputs: Mutex<Vec<FileDescriptor>>,
    prompts: AtomicUsize,
}

impl RecordingSession {
    fn new(cwd: &Path) -> Arc<Self> {
        Self::with_approval(cwd, true)
    }

    fn with_approval(cwd: &Path, approve: bool) -> Arc<Self> {
        Arc::new(Self {
            cwd: cwd.to_path_buf(),
            approve,
            cancel: CancellationToken::new(),
            outputs: Mutex::new(Vec::new()),
            prompts: AtomicUsize::new(0),
        })
    }

    fn outputs(&self) -> Vec<FileDescriptor> {
        self.outputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostSession for RecordingSession {
    fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn current_dir(&self) -> PathBuf {
        self.cwd.clone()
    }

    async fn should_process(&self, _target: &Path, _action: &str) -> bool {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.approve
    }

    fn write_output(&self, descriptor: &FileDescriptor) {
        self.outputs.lock().unwrap().push(descriptor.clone());
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn memory_service() -> Arc<MemoryFileService> {
    let service = MemoryFileService::new().with_chunk_size(256);
    service.insert("share", "x/data.bin", payload(1024)).unwrap();
    service
        .insert("docs", "a/b/report.pdf", payload(4096))
        .unwrap();
    Arc::new(service)
}

fn coordinator(service: Arc<MemoryFileService>, session: Arc<RecordingSession>) -> Coordinator {
    Coordinator::new(service, session).with_registry(Arc::new(JobRegistry::new()))
}

// =============================================================================
// Addressing and destination
// =============================================================================

#[tokio::test]
async fn test_file_handle_to_literal_destination() {
    let tmp = TempDir::new().unwrap();
    let session = RecordingSession::new(tmp.path());
    let coordinator = coordinator(memory_service(), session.clone());

    let mut request =
        GetFileRequest::new(AddressingMode::File(FileHandle::parse("share/x/data.bin").unwrap()));
    request.destination = Some(PathBuf::from("./out"));

    let outcome = coordinator.execute(request).await.unwrap();
    let Outcome::Downloaded { target, output } = outcome else {
        panic!("expected an inline download");
    };

    assert_eq!(target, tmp.path().join("./out"));
    assert_eq!(std::fs::read(&target).unwrap(), payload(1024));
    assert!(output.is_none());
    assert!(session.outputs().is_empty());
}

#[tokio::test]
async fn test_share_by_name_into_existing_directory() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("downloads")).unwrap();
    let session = RecordingSession::new(tmp.path());
    let coordinator = coordinator(memory_service(), session.clone());

    let mut request = GetFileRequest::new(AddressingMode::ShareByName {
        share: "docs".into(),
        path: "a/b/report.pdf".into(),
    });
    request.destination = Some(PathBuf::from("downloads"));
    request.pass_thru = true;

    coordinator.execute(request).await.unwrap();

    let written = tmp.path().join("downloads").join("report.pdf");
    assert_eq!(std::fs::read(&written).unwrap().len(), 4096);

    let outputs = session.outputs();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].remote_path, "docs/a/b/report.pdf");
    assert_eq!(outputs[0].local_path, written);
    assert_eq!(outputs[0].length, 4096);
}

#[tokio::test]
async fn test_every_addressing_mode_reaches_the_same_file() {
    let share = ShareHandle::new("docs").unwrap();
    let modes = vec![
        AddressingMode::ShareByName {
            share: "docs".into(),
            path: "a/b/report.pdf".into(),
        },
        AddressingMode::Share {
            share,
            path: "a/b/report.pdf".into(),
        },
        AddressingMode::Directory {
            directory: DirectoryHandle::parse("docs/a").unwrap(),
            path: "b/report.pdf".into(),
        },
        AddressingMode::File(FileHandle::parse("docs/a/b/report.pdf").unwrap()),
    ];

    for mode in modes {
        let tmp = TempDir::new().unwrap();
        let session = RecordingSession::new(tmp.path());
        let coordinator = coordinator(memory_service(), session);

        let outcome = coordinator.execute(GetFileRequest::new(mode)).await.unwrap();
        assert!(matches!(outcome, Outcome::Downloaded { .. }));
        assert_eq!(
            std::fs::read(tmp.path().join("report.pdf")).unwrap().len(),
            4096
        );
    }
}

#[tokio::test]
async fn test_invalid_path_makes_no_requests() {
    let tmp = TempDir::new().unwrap();
    let service = memory_service();
    let session = RecordingSession::new(tmp.path());
    let coordinator = coordinator(service.clone(), session.clone());

    let err = coordinator
        .execute(GetFileRequest::new(AddressingMode::ShareByName {
            share: "docs".into(),
            path: "a//b".into(),
        }))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidPath);
    assert_eq!(service.request_count(), 0);
    assert_eq!(session.prompts.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Overwrite policy
// =============================================================================

#[tokio::test]
async fn test_second_download_needs_force() {
    let tmp = TempDir::new().unwrap();
    let service = memory_service();
    let session = RecordingSession::new(tmp.path());
    let coordinator = coordinator(service.clone(), session);
    let mode = AddressingMode::File(FileHandle::parse("share/x/data.bin").unwrap());

    coordinator
        .execute(GetFileRequest::new(mode.clone()))
        .await
        .unwrap();
    let target = tmp.path().join("data.bin");
    std::fs::write(&target, b"local edits").unwrap();
    let requests_before = service.request_count();

    let err = coordinator
        .execute(GetFileRequest::new(mode.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileExists);
    assert_eq!(std::fs::read(&target).unwrap(), b"local edits");
    assert_eq!(service.request_count(), requests_before);

    let mut forced = GetFileRequest::new(mode);
    forced.force = true;
    coordinator.execute(forced).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), payload(1024));
}

// =============================================================================
// Confirmation gate
// =============================================================================

#[tokio::test]
async fn test_declined_confirmation_is_not_an_error() {
    let tmp = TempDir::new().unwrap();
    let service = memory_service();
    let session = RecordingSession::with_approval(tmp.path(), false);
    let coordinator = coordinator(service.clone(), session.clone());

    let mut request =
        GetFileRequest::new(AddressingMode::File(FileHandle::parse("share/x/data.bin").unwrap()));
    request.pass_thru = true;

    let outcome = coordinator.execute(request).await.unwrap();
    assert!(matches!(outcome, Outcome::Declined { .. }));
    assert!(!tmp.path().join("data.bin").exists());
    assert_eq!(service.request_count(), 0);
    assert!(session.outputs().is_empty());
}

// =============================================================================
// Verification and failures
// =============================================================================

#[tokio::test]
async fn test_corrupted_content_with_and_without_verification() {
    let tmp = TempDir::new().unwrap();
    let service = memory_service();
    service
        .set_fault("share", "x/data.bin", Some(Fault::CorruptContent))
        .unwrap();
    let session = RecordingSession::new(tmp.path());
    let coordinator = coordinator(service, session);
    let mode = AddressingMode::File(FileHandle::parse("share/x/data.bin").unwrap());

    let mut verified = GetFileRequest::new(mode.clone());
    verified.verify_checksum = true;
    let err = coordinator.execute(verified).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    assert!(!tmp.path().join("data.bin").exists());

    coordinator.execute(GetFileRequest::new(mode)).await.unwrap();
    assert_ne!(
        std::fs::read(tmp.path().join("data.bin")).unwrap(),
        payload(1024)
    );
}

#[tokio::test]
async fn test_dropped_connection_is_network_error() {
    let tmp = TempDir::new().unwrap();
    let service = memory_service();
    service
        .set_fault("docs", "a/b/report.pdf", Some(Fault::DropAfter(1024)))
        .unwrap();
    let coordinator = coordinator(service, RecordingSession::new(tmp.path()));

    let err = coordinator
        .execute(GetFileRequest::new(AddressingMode::File(
            FileHandle::parse("docs/a/b/report.pdf").unwrap(),
        )))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkError);
    assert!(!tmp.path().join("report.pdf").exists());
}

#[tokio::test]
async fn test_missing_remote_file_is_network_error() {
    let tmp = TempDir::new().unwrap();
    let coordinator = coordinator(memory_service(), RecordingSession::new(tmp.path()));

    let err = coordinator
        .execute(GetFileRequest::new(AddressingMode::File(
            FileHandle::parse("share/nope.bin").unwrap(),
        )))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkError);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_mid_transfer() {
    let tmp = TempDir::new().unwrap();
    let service = MemoryFileService::new()
        .with_chunk_size(64)
        .with_chunk_delay(Duration::from_millis(20));
    service.insert("share", "slow.bin", payload(4096)).unwrap();
    let session = RecordingSession::new(tmp.path());
    let coordinator = coordinator(Arc::new(service), session.clone());

    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let err = coordinator
        .execute(GetFileRequest::new(AddressingMode::File(
            FileHandle::parse("share/slow.bin").unwrap(),
        )))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!tmp.path().join("slow.bin").exists());
}

// =============================================================================
// Background jobs
// =============================================================================

#[tokio::test]
async fn test_job_and_inline_produce_the_same_file() {
    let inline_dir = TempDir::new().unwrap();
    let job_dir = TempDir::new().unwrap();
    let mode = AddressingMode::File(FileHandle::parse("docs/a/b/report.pdf").unwrap());

    coordinator(memory_service(), RecordingSession::new(inline_dir.path()))
        .execute(GetFileRequest::new(mode.clone()))
        .await
        .unwrap();

    let jobs = Arc::new(JobRegistry::new());
    let job_coordinator = Coordinator::new(memory_service(), RecordingSession::new(job_dir.path()))
        .with_registry(jobs.clone());
    let mut request = GetFileRequest::new(mode);
    request.as_job = true;
    let Outcome::Job(mut handle) = job_coordinator.execute(request).await.unwrap() else {
        panic!("expected a job");
    };

    let info = handle.wait().await;
    assert_eq!(info.state, JobState::Completed);
    assert_eq!(
        std::fs::read(inline_dir.path().join("report.pdf")).unwrap(),
        std::fs::read(job_dir.path().join("report.pdf")).unwrap()
    );
    assert!(jobs.dispose(handle.id).is_ok());
    assert!(jobs.list().is_empty());
}

#[tokio::test]
async fn test_stopping_a_job() {
    let tmp = TempDir::new().unwrap();
    let service = MemoryFileService::new()
        .with_chunk_size(64)
        .with_chunk_delay(Duration::from_millis(20));
    service.insert("share", "slow.bin", payload(4096)).unwrap();
    let jobs = Arc::new(JobRegistry::new());
    let coordinator = Coordinator::new(Arc::new(service), RecordingSession::new(tmp.path()))
        .with_registry(jobs.clone());

    let mut request =
        GetFileRequest::new(AddressingMode::File(FileHandle::parse("share/slow.bin").unwrap()));
    request.as_job = true;
    let Outcome::Job(handle) = coordinator.execute(request).await.unwrap() else {
        panic!("expected a job");
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    jobs.cancel(handle.id).unwrap();

    let info = jobs.wait(handle.id).await.unwrap();
    assert_eq!(info.state, JobState::Stopped);
    assert_eq!(info.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(!tmp.path().join("slow.bin").exists());
}
