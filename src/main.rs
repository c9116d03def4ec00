// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgGroup, Args, Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sharefetch::config::{self, Config};
use sharefetch::error::{DownloadError, ErrorKind};
use sharefetch::{
    AddressingMode, Coordinator, DirectoryHandle, FileDescriptor, FileHandle, GetFileRequest,
    HostSession, HttpFileService, JobState, Outcome, ProgressRecord, ShareHandle,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Success - operation completed successfully
    pub const SUCCESS: i32 = 0;
    /// Usage error - invalid command line arguments or remote path
    pub const USAGE: i32 = 64;
    /// Data error - downloaded content failed verification
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - file service unreachable or returned an error
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Can't create output file - target exists
    pub const CANT_CREATE: i32 = 73;
    /// I/O error - local file operation failed
    pub const IO_ERR: i32 = 74;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
    /// Interrupted by Ctrl+C
    pub const INTERRUPTED: i32 = 130;
}

use exit_codes::*;

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidPath | ErrorKind::InvalidParameterSet => USAGE,
        ErrorKind::FileExists => CANT_CREATE,
        ErrorKind::NetworkError => SERVICE_UNAVAILABLE,
        ErrorKind::ChecksumMismatch => DATA_ERR,
        ErrorKind::Cancelled => INTERRUPTED,
        ErrorKind::Io => IO_ERR,
        ErrorKind::Config => CONFIG,
    }
}

/// Progress bar helpers for consistent transfer display
mod bar {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    /// Create a byte progress bar with consistent styling
    pub fn create(description: &str) -> ProgressBar {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb.set_message(description.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

/// sharefetch - download single files from a cloud file share.
#[derive(Parser)]
#[command(name = "sharefetch")]
#[command(version = VERSION)]
#[command(about = "Download a single file from a cloud file share.")]
#[command(long_about = "sharefetch - single-file downloads from a cloud file share\n\n\
    By share name:     sharefetch get --share-name docs --path a/b/report.pdf\n\
    By file:           sharefetch get --file docs/a/b/report.pdf -d ./downloads\n\
    As background job: sharefetch get --file docs/big.iso --as-job\n\
    Configure:         sharefetch config set-endpoint https://files.example.com")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the file service (overrides config)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Quiet mode: warnings and errors only, no progress bar
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: detailed output for debugging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one file
    ///
    /// Examples:
    ///   sharefetch get --share-name docs --path reports/q3.pdf
    ///   sharefetch get --directory docs/reports --path q3.pdf --force
    ///   sharefetch get --file docs/reports/q3.pdf --check-hash --pass-thru
    Get(GetArgs),

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    ///
    /// Example:
    ///   sharefetch config show
    Show,

    /// Set the file service endpoint
    ///
    /// Example:
    ///   sharefetch config set-endpoint https://files.example.com
    SetEndpoint {
        /// Base URL
        url: String,
    },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["share_name", "share", "directory", "file"])
))]
struct GetArgs {
    /// Share looked up by name (requires --path)
    #[arg(long)]
    share_name: Option<String>,

    /// Share reference (requires --path)
    #[arg(long)]
    share: Option<String>,

    /// Directory reference as SHARE/DIR (requires --path)
    #[arg(long)]
    directory: Option<String>,

    /// File reference as SHARE/PATH
    #[arg(long)]
    file: Option<String>,

    /// Slash-delimited path of the file below the share or directory
    #[arg(long)]
    path: Option<String>,

    /// Local file or existing directory (default: current directory)
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Verify the SHA-256 content hash declared by the service
    #[arg(long)]
    check_hash: bool,

    /// Overwrite an existing local file
    #[arg(short, long)]
    force: bool,

    /// Print a JSON descriptor of the downloaded file
    #[arg(long)]
    pass_thru: bool,

    /// Run the download as a background job
    #[arg(long)]
    as_job: bool,

    /// Show what would be downloaded without transferring anything
    #[arg(long)]
    what_if: bool,

    /// Ask before writing the target file
    #[arg(long)]
    confirm: bool,

    /// Copy the remote last-modified time and read-only flag to the local file
    #[cfg(windows)]
    #[arg(long)]
    preserve_smb_attribute: bool,
}

impl GetArgs {
    /// Turn the loose flag set into exactly one addressing mode.
    fn addressing_mode(&self) -> Result<AddressingMode, DownloadError> {
        let path = self.path.clone();
        let require_path = |flag: &str| {
            path.clone().ok_or_else(|| {
                DownloadError::InvalidParameterSet(format!("--{} requires --path", flag))
            })
        };

        match (&self.share_name, &self.share, &self.directory, &self.file) {
            (Some(name), None, None, None) => Ok(AddressingMode::ShareByName {
                share: name.clone(),
                path: require_path("share-name")?,
            }),
            (None, Some(name), None, None) => Ok(AddressingMode::Share {
                share: ShareHandle::new(name.as_str())?,
                path: require_path("share")?,
            }),
            (None, None, Some(dir), None) => Ok(AddressingMode::Directory {
                directory: DirectoryHandle::parse(dir)?,
                path: require_path("directory")?,
            }),
            (None, None, None, Some(file)) => {
                if self.path.is_some() {
                    return Err(DownloadError::InvalidParameterSet(
                        "--path cannot be combined with --file".into(),
                    ));
                }
                Ok(AddressingMode::File(FileHandle::parse(file)?))
            }
            _ => Err(DownloadError::InvalidParameterSet(
                "exactly one of --share-name, --share, --directory or --file is required".into(),
            )),
        }
    }

    #[cfg(windows)]
    fn preserve_requested(&self) -> bool {
        self.preserve_smb_attribute
    }

    #[cfg(not(windows))]
    fn preserve_requested(&self) -> bool {
        false
    }
}

/// Terminal host: Ctrl+C, prompts, progress bar, JSON output.
struct CliSession {
    cancel: CancellationToken,
    cwd: PathBuf,
    what_if: bool,
    confirm: bool,
    show_progress: bool,
    renderer: Mutex<Option<JoinHandle<()>>>,
}

impl CliSession {
    /// Wait for the progress bar to clear before printing anything else.
    async fn finish_progress(&self) {
        let handle = self
            .renderer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::debug!(error = %e, "progress renderer ended abnormally");
            }
        }
    }
}

#[async_trait]
impl HostSession for CliSession {
    fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn current_dir(&self) -> PathBuf {
        self.cwd.clone()
    }

    async fn should_process(&self, target: &Path, action: &str) -> bool {
        if self.what_if {
            println!(
                "What if: Performing the operation \"{}\" on target \"{}\".",
                action,
                target.display()
            );
            return false;
        }
        if !self.confirm {
            return true;
        }

        let question = format!("{} to {}?", action, target.display());
        let answer = tokio::task::spawn_blocking(move || {
            inquire::Confirm::new(&question).with_default(true).prompt()
        })
        .await;
        match answer {
            Ok(Ok(yes)) => yes,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "confirmation prompt failed; skipping");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "confirmation prompt aborted; skipping");
                false
            }
        }
    }

    fn report_progress(&self, mut progress: watch::Receiver<ProgressRecord>) {
        if !self.show_progress {
            return;
        }
        let handle = tokio::spawn(async move {
            let pb = bar::create(&progress.borrow().description);
            while progress.changed().await.is_ok() {
                let record = progress.borrow().clone();
                if let Some(total) = record.total_bytes {
                    pb.set_length(total);
                }
                pb.set_position(record.bytes_transferred);
                let mut message = record.status_text.clone();
                if let (Some(speed), Some(eta)) = (record.speed_string(), record.eta_string()) {
                    message = format!("{} | {} | ETA {}", message, speed, eta);
                }
                pb.set_message(message);
                if record.state.is_terminal() {
                    break;
                }
            }
            pb.finish_and_clear();
        });
        *self
            .renderer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    fn write_output(&self, descriptor: &FileDescriptor) {
        println!("{}", descriptor.to_json());
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

async fn run_get(args: GetArgs, cli_endpoint: Option<String>, quiet: bool) -> Result<i32> {
    let config = Config::load()?;
    let mode = match args.addressing_mode() {
        Ok(mode) => mode,
        Err(e) => return Ok(report_failure(&e)),
    };

    let endpoint = cli_endpoint.or(config.endpoint.clone()).ok_or_else(|| {
        DownloadError::Config(
            "no file service endpoint; pass --endpoint or run `sharefetch config set-endpoint <URL>`"
                .into(),
        )
    })?;
    let service = Arc::new(HttpFileService::new(&endpoint, config.request_timeout())?);

    let cancel = CancellationToken::new();
    let ctrlc_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || ctrlc_token.cancel()) {
        tracing::warn!(error = %e, "could not install Ctrl+C handler");
    }

    let session = Arc::new(CliSession {
        cancel: cancel.clone(),
        cwd: std::env::current_dir().context("Could not determine current directory")?,
        what_if: args.what_if,
        confirm: args.confirm,
        show_progress: config.show_progress && !quiet && !args.as_job,
        renderer: Mutex::new(None),
    });
    let coordinator = Coordinator::new(service, session.clone())
        .with_write_buffer(config.write_buffer_bytes);

    let request = GetFileRequest {
        mode,
        destination: args.destination.clone(),
        verify_checksum: args.check_hash || config.verify_checksum,
        force: args.force,
        pass_thru: args.pass_thru,
        as_job: args.as_job,
        preserve_smb_attribute: args.preserve_requested(),
    };

    let outcome = coordinator.execute(request).await;
    session.finish_progress().await;

    match outcome {
        Ok(Outcome::Downloaded { target, .. }) => {
            if !quiet && !args.pass_thru {
                eprintln!("{} Downloaded {}", "[OK]".green(), target.display());
            }
            Ok(SUCCESS)
        }
        Ok(Outcome::Declined { target }) => {
            tracing::debug!(target = %target.display(), "skipped");
            Ok(SUCCESS)
        }
        Ok(Outcome::Job(mut handle)) => {
            let info = handle.info();
            eprintln!(
                "{} Job {} ({}) started: {}",
                "[..]".cyan(),
                info.id,
                info.name,
                info.command
            );
            // Jobs live in this process; keep it alive until the job ends.
            let job = handle.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                job.cancel();
            });
            let info = handle.wait().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize job")?
            );
            Ok(match (info.state, &info.error) {
                (JobState::Completed, _) => SUCCESS,
                (_, Some(record)) => {
                    eprintln!("{} {}", "[X]".red(), record.message);
                    exit_code(record.kind)
                }
                _ => INTERRUPTED,
            })
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

fn report_failure(err: &DownloadError) -> i32 {
    eprintln!("{}", err.report().red());
    exit_code(err.kind())
}

fn handle_config(command: Option<ConfigCommands>) -> Result<i32> {
    let mut config = Config::load()?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", "=== sharefetch configuration ===".cyan().bold());
            println!();
            println!(
                "  Endpoint:        {}",
                config.endpoint.as_deref().unwrap_or("(not set)")
            );
            println!("  Verify checksum: {}", config.verify_checksum);
            println!("  Write buffer:    {} bytes", config.write_buffer_bytes);
            println!("  Request timeout: {}s", config.request_timeout_secs);
            println!("  Show progress:   {}", config.show_progress);
            println!();
            if let Ok(path) = config::config_path() {
                println!("  Config file:     {}", path.display());
            }
        }
        Some(ConfigCommands::SetEndpoint { url }) => {
            // Validate before saving
            HttpFileService::new(&url, config.request_timeout())?;
            config.endpoint = Some(url.clone());
            config.save()?;
            println!("{} Endpoint set to {}", "[OK]".green(), url);
        }
    }
    Ok(SUCCESS)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let code = match cli.command {
        Commands::Get(args) => {
            let runtime =
                tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let result = runtime.block_on(run_get(args, cli.endpoint, cli.quiet));
            match result {
                Ok(code) => code,
                Err(e) => match e.downcast_ref::<DownloadError>() {
                    Some(err) => report_failure(err),
                    None => return Err(e),
                },
            }
        }
        Commands::Config { command } => match handle_config(command) {
            Ok(code) => code,
            Err(e) => match e.downcast_ref::<DownloadError>() {
                Some(err) => report_failure(err),
                None => return Err(e),
            },
        },
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        let mut argv = vec!["sharefetch"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
    }

    fn get_args(args: &[&str]) -> GetArgs {
        match parse(args).unwrap().command {
            Commands::Get(args) => args,
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn test_share_by_name_mode() {
        let args = get_args(&["get", "--share-name", "docs", "--path", "a/b.pdf"]);
        assert_eq!(
            args.addressing_mode().unwrap(),
            AddressingMode::ShareByName {
                share: "docs".into(),
                path: "a/b.pdf".into()
            }
        );
    }

    #[test]
    fn test_file_mode_rejects_path() {
        let args = get_args(&["get", "--file", "docs/a.pdf", "--path", "x"]);
        assert_eq!(
            args.addressing_mode().unwrap_err().kind(),
            ErrorKind::InvalidParameterSet
        );
    }

    #[test]
    fn test_missing_path_is_invalid_parameter_set() {
        let args = get_args(&["get", "--directory", "docs/reports"]);
        assert_eq!(
            args.addressing_mode().unwrap_err().kind(),
            ErrorKind::InvalidParameterSet
        );
    }

    #[test]
    fn test_group_requires_exactly_one_source() {
        assert!(parse(&["get", "--path", "a"]).is_err());
        assert!(parse(&["get", "--share", "docs", "--file", "docs/a", "--path", "a"]).is_err());
    }

    #[tokio::test]
    async fn test_finish_progress_survives_panicked_renderer() {
        let session = CliSession {
            cancel: CancellationToken::new(),
            cwd: PathBuf::from("."),
            what_if: false,
            confirm: false,
            show_progress: true,
            renderer: Mutex::new(Some(tokio::spawn(async {
                panic!("renderer blew up");
            }))),
        };

        session.finish_progress().await;
        assert!(session.renderer.lock().unwrap().is_none());
        // A second call finds nothing to wait for.
        session.finish_progress().await;
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(ErrorKind::FileExists), 73);
        assert_eq!(exit_code(ErrorKind::InvalidPath), 64);
        assert_eq!(exit_code(ErrorKind::Cancelled), 130);
    }
}
