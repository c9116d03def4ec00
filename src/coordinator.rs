// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Job/output coordination for one `get` invocation.
//!
//! The coordinator picks inline or background execution, gates the transfer
//! behind a confirmation for the concrete target path, and emits the
//! pass-through descriptor. Inline and background runs drive the exact same
//! [`Coordinator::process`] future.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::destination::DestinationSpec;
use crate::error::Result;
use crate::job::{JobContext, JobHandle, JobRegistry};
use crate::output::FileDescriptor;
use crate::progress::{ProgressRecord, ProgressReporter};
use crate::resolver::{self, AddressingMode};
use crate::storage::FileService;
use crate::transfer::{TransferExecutor, TransferOptions, DEFAULT_WRITE_BUFFER};

/// Job name recorded for background downloads.
pub const JOB_NAME: &str = "GetFileContent";

/// Everything the caller supplies for one download.
#[derive(Debug, Clone)]
pub struct GetFileRequest {
    pub mode: AddressingMode,
    /// Local destination; `None` means the session's current directory
    pub destination: Option<PathBuf>,
    pub verify_checksum: bool,
    pub force: bool,
    pub pass_thru: bool,
    pub as_job: bool,
    /// Honoured only where the host offers attribute preservation
    pub preserve_smb_attribute: bool,
}

impl GetFileRequest {
    pub fn new(mode: AddressingMode) -> Self {
        Self {
            mode,
            destination: None,
            verify_checksum: false,
            force: false,
            pass_thru: false,
            as_job: false,
            preserve_smb_attribute: false,
        }
    }
}

/// Services the invoking host provides.
#[async_trait]
pub trait HostSession: Send + Sync {
    /// Token that fires when the invocation is interrupted.
    fn cancellation_token(&self) -> CancellationToken;

    /// Directory relative destinations are resolved against.
    fn current_dir(&self) -> PathBuf;

    /// Ask whether `action` may proceed on `target`. `false` skips the download.
    async fn should_process(&self, target: &Path, action: &str) -> bool;

    /// Called once the transfer's progress record exists.
    fn report_progress(&self, _progress: watch::Receiver<ProgressRecord>) {}

    /// Receives the pass-through descriptor of an inline download.
    fn write_output(&self, descriptor: &FileDescriptor);
}

/// Result of [`Coordinator::execute`].
#[derive(Debug)]
pub enum Outcome {
    /// Inline download finished; carries the descriptor when pass-through was requested.
    Downloaded {
        target: PathBuf,
        output: Option<FileDescriptor>,
    },
    /// The confirmation gate said no. Nothing was transferred.
    Declined { target: PathBuf },
    /// Running as a background job.
    Job(JobHandle),
}

/// Wires resolver, planner, and executor together for one invocation.
#[derive(Clone)]
pub struct Coordinator {
    service: Arc<dyn FileService>,
    session: Arc<dyn HostSession>,
    jobs: Arc<JobRegistry>,
    write_buffer_bytes: usize,
}

impl Coordinator {
    pub fn new(service: Arc<dyn FileService>, session: Arc<dyn HostSession>) -> Self {
        Self {
            service,
            session,
            jobs: JobRegistry::global(),
            write_buffer_bytes: DEFAULT_WRITE_BUFFER,
        }
    }

    /// Track background jobs in `jobs` instead of the process-wide registry.
    pub fn with_registry(mut self, jobs: Arc<JobRegistry>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_write_buffer(mut self, bytes: usize) -> Self {
        self.write_buffer_bytes = bytes.max(1);
        self
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    /// Run one download inline, or start it as a job.
    pub async fn execute(&self, request: GetFileRequest) -> Result<Outcome> {
        let destination =
            DestinationSpec::resolve(request.destination.as_deref(), &self.session.current_dir());
        let mut options = TransferOptions::new(request.verify_checksum)
            .with_host_preservation(request.preserve_smb_attribute);
        options.write_buffer_bytes = self.write_buffer_bytes;

        if request.as_job {
            let ctx = self.jobs.register(JOB_NAME, &describe(&request.mode));
            let this = self.clone();
            let handle = self.jobs.start(ctx, move |ctx| async move {
                let cancel = ctx.cancellation_token();
                let outcome = this
                    .process(&request, &destination, &options, &cancel, Some(&ctx))
                    .await?;
                Ok(match outcome {
                    Outcome::Downloaded { output, .. } => output,
                    _ => None,
                })
            });
            tracing::info!(job_id = handle.id, "download started as background job");
            return Ok(Outcome::Job(handle));
        }

        let cancel = self.session.cancellation_token();
        let outcome = self
            .process(&request, &destination, &options, &cancel, None)
            .await?;
        if let Outcome::Downloaded {
            output: Some(descriptor),
            ..
        } = &outcome
        {
            self.session.write_output(descriptor);
        }
        Ok(outcome)
    }

    /// Resolve, plan, confirm, transfer. Shared by inline and job execution.
    async fn process(
        &self,
        request: &GetFileRequest,
        destination: &DestinationSpec,
        options: &TransferOptions,
        cancel: &CancellationToken,
        job: Option<&JobContext>,
    ) -> Result<Outcome> {
        let mut file = resolver::resolve(self.service.as_ref(), &request.mode)?;
        let plan = destination.plan(file.base_name(), request.force);

        if !self.session.should_process(&plan.path, "Download").await {
            tracing::info!(target = %plan.path.display(), "download declined");
            return Ok(Outcome::Declined { target: plan.path });
        }

        let mut progress = ProgressReporter::new(&file.full_path(), &plan.path);
        match job {
            Some(ctx) => ctx.attach_progress(progress.subscribe()),
            None => self.session.report_progress(progress.subscribe()),
        }

        TransferExecutor::new(self.service.clone())
            .download(&mut file, &plan, options, cancel, &mut progress)
            .await?;

        let output = request
            .pass_thru
            .then(|| FileDescriptor::new(&file, &plan.path));
        Ok(Outcome::Downloaded {
            target: plan.path,
            output,
        })
    }
}

/// Job command line for a not-yet-resolved request.
fn describe(mode: &AddressingMode) -> String {
    match mode {
        AddressingMode::ShareByName { share, path } => format!("{}/{}", share, path),
        AddressingMode::Share { share, path } => format!("{}/{}", share.name(), path),
        AddressingMode::Directory { directory, path } => {
            format!("{}/{}", directory.full_path(), path)
        }
        AddressingMode::File(file) => file.full_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::job::JobState;
    use crate::storage::memory::MemoryFileService;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct TestSession {
        cwd: PathBuf,
        approve: bool,
        cancel: CancellationToken,
        prompts: Mutex<Vec<PathBuf>>,
        outputs: AtomicUsize,
    }

    impl TestSession {
        fn new(cwd: &Path, approve: bool) -> Arc<Self> {
            Arc::new(Self {
                cwd: cwd.to_path_buf(),
                approve,
                cancel: CancellationToken::new(),
                prompts: Mutex::new(Vec::new()),
                outputs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HostSession for TestSession {
        fn cancellation_token(&self) -> CancellationToken {
            self.cancel.clone()
        }

        fn current_dir(&self) -> PathBuf {
            self.cwd.clone()
        }

        async fn should_process(&self, target: &Path, _action: &str) -> bool {
            self.prompts.lock().unwrap().push(target.to_path_buf());
            self.approve
        }

        fn write_output(&self, _descriptor: &FileDescriptor) {
            self.outputs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn service() -> Arc<MemoryFileService> {
        let service = MemoryFileService::new();
        service
            .insert("docs", "a/b/report.pdf", vec![7u8; 1024])
            .unwrap();
        Arc::new(service)
    }

    fn share_by_name(path: &str) -> AddressingMode {
        AddressingMode::ShareByName {
            share: "docs".into(),
            path: path.into(),
        }
    }

    #[tokio::test]
    async fn test_inline_download_with_pass_thru() {
        let tmp = TempDir::new().unwrap();
        let session = TestSession::new(tmp.path(), true);
        let coordinator = Coordinator::new(service(), session.clone());

        let mut request = GetFileRequest::new(share_by_name("a/b/report.pdf"));
        request.pass_thru = true;
        let outcome = coordinator.execute(request).await.unwrap();

        let Outcome::Downloaded { target, output } = outcome else {
            panic!("expected inline download");
        };
        assert_eq!(target, tmp.path().join("report.pdf"));
        assert_eq!(output.unwrap().length, 1024);
        assert_eq!(session.outputs.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&target).unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_no_output_without_pass_thru() {
        let tmp = TempDir::new().unwrap();
        let session = TestSession::new(tmp.path(), true);
        let coordinator = Coordinator::new(service(), session.clone());

        let outcome = coordinator
            .execute(GetFileRequest::new(share_by_name("a/b/report.pdf")))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Downloaded { output: None, .. }));
        assert_eq!(session.outputs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declined_gate_transfers_nothing() {
        let tmp = TempDir::new().unwrap();
        let session = TestSession::new(tmp.path(), false);
        let service = service();
        let coordinator = Coordinator::new(service.clone(), session.clone());

        let outcome = coordinator
            .execute(GetFileRequest::new(share_by_name("a/b/report.pdf")))
            .await
            .unwrap();
        let Outcome::Declined { target } = outcome else {
            panic!("expected declined outcome");
        };
        assert_eq!(session.prompts.lock().unwrap().as_slice(), &[target.clone()]);
        assert!(!target.exists());
        assert_eq!(service.request_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_path_fails_before_gate() {
        let tmp = TempDir::new().unwrap();
        let session = TestSession::new(tmp.path(), true);
        let coordinator = Coordinator::new(service(), session.clone());

        let err = coordinator
            .execute(GetFileRequest::new(share_by_name("a//b")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
        assert!(session.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_background_job_completes_with_output() {
        let tmp = TempDir::new().unwrap();
        let session = TestSession::new(tmp.path(), true);
        let jobs = Arc::new(JobRegistry::new());
        let coordinator =
            Coordinator::new(service(), session.clone()).with_registry(jobs.clone());

        let mut request = GetFileRequest::new(share_by_name("a/b/report.pdf"));
        request.as_job = true;
        request.pass_thru = true;
        let Outcome::Job(mut handle) = coordinator.execute(request).await.unwrap() else {
            panic!("expected a job");
        };

        let info = handle.wait().await;
        assert_eq!(info.name, JOB_NAME);
        assert_eq!(info.state, JobState::Completed);
        assert_eq!(info.output.unwrap().name, "report.pdf");
        // Job output is collected from the registry, not written to the session.
        assert_eq!(session.outputs.load(Ordering::SeqCst), 0);
        assert_eq!(jobs.progress(handle.id).unwrap().bytes_transferred, 1024);
    }

    #[tokio::test]
    async fn test_background_job_failure_is_recorded() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("report.pdf"), b"old").unwrap();
        let session = TestSession::new(tmp.path(), true);
        let jobs = Arc::new(JobRegistry::new());
        let coordinator = Coordinator::new(service(), session).with_registry(jobs.clone());

        let mut request = GetFileRequest::new(share_by_name("a/b/report.pdf"));
        request.as_job = true;
        let Outcome::Job(handle) = coordinator.execute(request).await.unwrap() else {
            panic!("expected a job");
        };

        let info = jobs.wait(handle.id).await.unwrap();
        assert_eq!(info.state, JobState::Failed);
        assert_eq!(info.error.unwrap().kind, ErrorKind::FileExists);
    }

    #[test]
    fn test_describe_modes() {
        assert_eq!(describe(&share_by_name("a/b.txt")), "docs/a/b.txt");
    }
}
