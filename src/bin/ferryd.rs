//! Ferry Daemon - Multi-client relay server
//!
//! This binary runs the relay: it accepts TCP clients, answers version
//! checks, stores relayed files, and echoes chat traffic. Lines typed on
//! its stdin (foreground mode) are broadcast to every connected client.
//!
//! # Usage
//!
//! ```bash
//! # Start the relay (foreground, with an operator console on stdin)
//! ferryd start
//!
//! # Start the relay (background/daemonized)
//! ferryd start -d
//!
//! # Stop the relay
//! ferryd stop
//!
//! # Check relay status
//! ferryd status
//! ```

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ferry_protocol::{encode, VersionTag};
use ferryd::handler::RelayHandler;
use ferryd::logsink::{JsonlLogSink, LogSink, TracingLogSink};
use ferryd::registry::BroadcastRegistry;
use ferryd::server::{RelayServer, DEFAULT_BIND_ADDR, DEFAULT_DOWNLOAD_URL};
use ferryd::storage::UploadStore;

/// Ferry daemon - multi-client text and file relay
#[derive(Parser, Debug)]
#[command(name = "ferryd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Listen address (host:port); FERRY_BIND overrides the default
        #[arg(long)]
        bind: Option<String>,

        /// Release version advertised to connecting clients
        #[arg(long, value_parser = parse_version)]
        release_version: Option<VersionTag>,

        /// Artifact URL handed to outdated clients; FERRY_DOWNLOAD_URL
        /// overrides the default
        #[arg(long)]
        download_url: Option<String>,

        /// Directory relayed files are stored in
        #[arg(long, default_value = "uploads")]
        upload_dir: PathBuf,

        /// Append chat and upload records to this JSONL file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Stop the running relay
    Stop,
    /// Show relay status
    Status,
}

/// Fully resolved `start` options: flag, then environment, then default.
struct StartOptions {
    bind: String,
    release_version: VersionTag,
    download_url: String,
    upload_dir: PathBuf,
    log_file: Option<PathBuf>,
}

fn parse_version(raw: &str) -> Result<VersionTag, String> {
    VersionTag::parse(raw).map_err(|e| e.to_string())
}

fn pid_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ferry");
    state_dir.join("ferryd.pid")
}

fn log_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ferry");
    state_dir.join("ferryd.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        bind: None,
        release_version: None,
        download_url: None,
        upload_dir: PathBuf::from("uploads"),
        log_file: None,
    });

    match command {
        Command::Start {
            daemon,
            bind,
            release_version,
            download_url,
            upload_dir,
            log_file,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Relay is already running (PID {pid})");
                eprintln!("Use 'ferryd stop' to stop it first.");
                process::exit(1);
            }

            let options = StartOptions {
                bind: bind
                    .or_else(|| env::var("FERRY_BIND").ok())
                    .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
                release_version: release_version.unwrap_or(VersionTag::CURRENT),
                download_url: download_url
                    .or_else(|| env::var("FERRY_DOWNLOAD_URL").ok())
                    .unwrap_or_else(|| DEFAULT_DOWNLOAD_URL.to_string()),
                upload_dir,
                log_file,
            };

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(options);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping relay (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Relay stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Relay did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Relay is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Relay is running (PID {pid})");

                let bind =
                    env::var("FERRY_BIND").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
                println!("Listen address: {bind}");

                Ok(())
            } else {
                println!("Relay is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(options: StartOptions) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ferryd=info".parse()?)
                .add_directive("ferry_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Ferry daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let store =
        UploadStore::open(&options.upload_dir).context("Failed to open upload directory")?;
    info!(dir = %options.upload_dir.display(), "Upload store ready");

    let sink: Arc<dyn LogSink> = match &options.log_file {
        Some(path) => {
            let sink = JsonlLogSink::open(path).context("Failed to open relay record log")?;
            info!(log = %path.display(), "Recording traffic to JSONL log");
            Arc::new(sink)
        }
        None => Arc::new(TracingLogSink),
    };

    let handler = Arc::new(RelayHandler::new(
        options.release_version,
        &options.download_url,
        store,
        sink,
    ));
    let registry = Arc::new(BroadcastRegistry::new());

    let server = RelayServer::bind(
        &options.bind,
        registry.clone(),
        handler,
        cancel_token.clone(),
    )
    .await?;
    info!(
        addr = %server.local_addr()?,
        release = %options.release_version,
        "Relay bound"
    );

    spawn_console_task(registry, cancel_token.clone());

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Ferry daemon stopped");
    Ok(())
}

/// Lines typed on the relay's stdin go out as broadcasts to every
/// client. Under `-d` stdin is the null device, so the task ends at its
/// immediate EOF and the feature simply does not exist in the background.
fn spawn_console_task(registry: Arc<BroadcastRegistry>, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let summary = registry.broadcast(&encode(line.as_bytes())).await;
                        info!(delivered = summary.delivered, "console line broadcast");
                    }
                    Ok(None) => {
                        debug!("console stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "console read error");
                        break;
                    }
                }
            }
        }
    });
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
