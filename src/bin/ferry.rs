//! Ferry - Relay console client
//!
//! Interactive console for the ferry relay: lines you type are relayed as
//! chat, slash commands relay files or update the binary in place. The
//! client reconnects on its own and announces its version after every
//! connect, so an update offer can arrive at any time.
//!
//! # Usage
//!
//! ```bash
//! # Connect to the default relay
//! ferry
//!
//! # Connect to a specific relay, announcing an older version
//! ferry --server relay.example.net:54321 --client-version 1.0
//!
//! # Install updates as soon as the relay offers one
//! ferry --auto-update
//! ```
//!
//! # Commands
//!
//! - `/upload <path>` - relay a local file
//! - `/update` - re-check the version and install an offered update
//! - `/quit` - exit (Ctrl-D does the same)
//! - anything else - sent as a chat line

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ferry_client::input::{parse_line, Action};
use ferry_client::update::replace::ProcessRelauncher;
use ferry_client::{
    ClientCommand, ClientConfig, ClientEvent, RelayClient, UpdateError, UpdateEvent,
    UpdateOrchestrator,
};
use ferry_protocol::VersionTag;

/// Ferry relay console client
#[derive(Parser, Debug)]
#[command(name = "ferry", version, about)]
struct Args {
    /// Relay address (host:port); FERRY_SERVER overrides the default
    #[arg(short, long)]
    server: Option<String>,

    /// Version announced to the relay (defaults to this build's)
    #[arg(long, value_parser = parse_version)]
    client_version: Option<VersionTag>,

    /// Binary replaced by self-update (defaults to the running executable)
    #[arg(long)]
    artifact: Option<PathBuf>,

    /// Install updates as soon as the relay offers one
    #[arg(long)]
    auto_update: bool,
}

fn parse_version(raw: &str) -> Result<VersionTag, String> {
    VersionTag::parse(raw).map_err(|e| e.to_string())
}

// ============================================================================
// Logging
// ============================================================================

fn get_log_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ferry")
}

fn create_log_file() -> Result<std::fs::File> {
    let log_dir = get_log_dir();
    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_path = log_dir.join("ferry.log");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")
}

/// Tracing goes to a file so the console stays free for chat traffic.
fn init_logging() -> Result<()> {
    let log_file = create_log_file()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ferry=info".parse()?)
                .add_directive("ferry_client=info".parse()?)
                .add_directive("ferry_protocol=info".parse()?),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    Ok(())
}

// ============================================================================
// Input Handling
// ============================================================================

/// Forwards stdin lines to the event loop. On EOF the sender drops, which
/// the event loop reads as a quit.
fn spawn_input_task(
    line_tx: mpsc::UnboundedSender<String>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }
    })
}

// ============================================================================
// Console Event Loop
// ============================================================================

/// Joins the three event streams (relay events, update events, typed
/// lines) into one console session.
struct Console {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    event_rx: mpsc::UnboundedReceiver<ClientEvent>,
    update_rx: mpsc::UnboundedReceiver<UpdateEvent>,
    update_tx: mpsc::UnboundedSender<UpdateEvent>,
    line_rx: mpsc::UnboundedReceiver<String>,
    orchestrator: UpdateOrchestrator,
    cancel_token: CancellationToken,
    /// Install any offered update without waiting for `/update`.
    auto_update: bool,
    /// Set by `/update`; consumed by the next version reply.
    update_armed: bool,
}

impl Console {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_client_event(event),
                    None => break,
                },
                event = self.update_rx.recv() => match event {
                    Some(event) => {
                        if self.handle_update_event(event) {
                            break;
                        }
                    }
                    None => break,
                },
                line = self.line_rx.recv() => match line {
                    Some(line) => {
                        if self.handle_input_line(line.trim()) {
                            break;
                        }
                    }
                    // Stdin closed (Ctrl-D).
                    None => break,
                },
            }
        }

        self.cancel_token.cancel();
    }

    /// Returns `true` when the session should end.
    fn handle_input_line(&mut self, line: &str) -> bool {
        match parse_line(line) {
            Action::None => false,
            Action::Quit => true,
            Action::Update => {
                self.update_armed = true;
                self.send_command(ClientCommand::CheckVersion);
                false
            }
            Action::Upload(path) => {
                self.send_command(ClientCommand::UploadFile(PathBuf::from(path)));
                false
            }
            Action::UploadUsage => {
                println!("usage: /upload <path>");
                false
            }
            Action::Unknown(command) => {
                println!("unknown command: {command}");
                false
            }
            Action::Chat(text) => {
                self.send_command(ClientCommand::SendText(text.to_string()));
                false
            }
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected => println!("* connected"),
            ClientEvent::Disconnected => println!("* disconnected, retrying..."),
            ClientEvent::Message(text) => println!("{text}"),
            ClientEvent::UpdateAvailable {
                version,
                download_url,
            } => {
                if self.auto_update || self.update_armed {
                    self.update_armed = false;
                    self.start_update(&version, &download_url);
                } else {
                    println!("* version {version} is available; type /update to install");
                }
            }
            ClientEvent::UpToDate => {
                self.update_armed = false;
                println!("* client is up to date");
            }
            ClientEvent::Raw(line) => println!("? {line}"),
            ClientEvent::Error(reason) => println!("! {reason}"),
        }
    }

    /// Returns `true` when the replacement process has taken over and
    /// this one should exit.
    fn handle_update_event(&mut self, event: UpdateEvent) -> bool {
        match event {
            UpdateEvent::Started { version } => {
                println!("* downloading version {version}...");
                false
            }
            UpdateEvent::Progress { percent } => {
                println!("* download {percent}%");
                false
            }
            UpdateEvent::Staged => {
                println!("* download complete, swapping binaries");
                false
            }
            UpdateEvent::Completed { pid } => {
                println!("* update installed; replacement running as PID {pid}");
                true
            }
            UpdateEvent::Failed { reason } => {
                println!("! update failed: {reason}");
                false
            }
        }
    }

    fn start_update(&mut self, version: &str, download_url: &str) {
        println!("* installing version {version} from {download_url}");
        match self
            .orchestrator
            .trigger(version, download_url, self.update_tx.clone())
        {
            Ok(()) => {}
            Err(UpdateError::AlreadyRunning) => println!("* an update is already in progress"),
            Err(e) => println!("! update failed to start: {e}"),
        }
    }

    fn send_command(&self, command: ClientCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("connection loop gone; command dropped");
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Ferry console starting");

    let server_addr = args
        .server
        .or_else(|| env::var("FERRY_SERVER").ok())
        .unwrap_or_else(|| ClientConfig::default().server_addr);

    let artifact = match args.artifact {
        Some(path) => path,
        None => env::current_exe().context("Failed to resolve the running executable")?,
    };

    let config = ClientConfig {
        server_addr: server_addr.clone(),
        client_version: args.client_version.unwrap_or(VersionTag::CURRENT),
        ..Default::default()
    };

    println!(
        "ferry {} - connecting to {server_addr}",
        env!("CARGO_PKG_VERSION")
    );
    println!("commands: /upload <path>, /update, /quit");

    let cancel_token = CancellationToken::new();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (line_tx, line_rx) = mpsc::unbounded_channel();

    let client = RelayClient::new(config, event_tx, command_rx, cancel_token.clone());
    let client_task = tokio::spawn(async move { client.run().await });

    let input_task = spawn_input_task(line_tx, cancel_token.clone());

    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let orchestrator = UpdateOrchestrator::new(artifact, Arc::new(ProcessRelauncher::new()));

    let console = Console {
        command_tx,
        event_rx,
        update_rx,
        update_tx,
        line_rx,
        orchestrator,
        cancel_token: cancel_token.clone(),
        auto_update: args.auto_update,
        update_armed: false,
    };
    console.run().await;

    cancel_token.cancel();

    // Give background tasks a moment to observe the cancellation.
    let _ = timeout(Duration::from_millis(100), client_task).await;
    let _ = timeout(Duration::from_millis(100), input_task).await;

    info!("Ferry console stopped");
    Ok(())
}
