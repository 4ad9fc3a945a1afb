//! Relay connection client.
//!
//! This module provides the `RelayClient` which handles:
//! - Connection to the relay over TCP
//! - Automatic reconnection with exponential backoff
//! - Framing outgoing commands and decoding incoming server lines into
//!   events for the interactive front end
//!
//! **Panic-Free Policy:** This module follows the project's panic-free
//! guidelines. No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`,
//! or `todo!()`.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferry_protocol::{encode, parse_push, render_request, Push, Request, VersionTag};

/// Per-line cap, mirroring the relay's own limit. Single-line base64
/// file payloads are the sizing driver.
const MAX_LINE_BYTES: usize = 32 * 1024 * 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the relay client.
///
/// Controls connection behavior including the server address, the version
/// announced on connect, and retry timing for reconnection.
///
/// # Example
///
/// ```rust
/// use ferry_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     server_addr: "relay.example.net:54321".to_string(),
///     retry_initial_delay: Duration::from_millis(500),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the relay server (`host:port`).
    pub server_addr: String,

    /// Version announced in the automatic check after each connect.
    pub client_version: VersionTag,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:54321".to_string(),
            client_version: VersionTag::CURRENT,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }
}

// ============================================================================
// Commands and Events
// ============================================================================

/// Commands the front end sends to the connection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Relay a chat line.
    SendText(String),

    /// Read a local file and relay it under its file name.
    UploadFile(PathBuf),

    /// Re-announce the client version and ask whether it is current.
    CheckVersion,
}

/// Events the connection loop reports back to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connection to the relay is established.
    Connected,

    /// The connection ended; the loop will retry in the background.
    Disconnected,

    /// Decoded text from the server: an ack, an echo, or a broadcast.
    Message(String),

    /// The server offers a newer release at `download_url`.
    UpdateAvailable { version: String, download_url: String },

    /// The server confirmed the announced version is current.
    UpToDate,

    /// A server line that fit no known reply shape, surfaced verbatim.
    Raw(String),

    /// A command that could not be carried out.
    Error(String),
}

/// Errors from the client connection path.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server line exceeded {max} bytes")]
    LineTooLarge { max: usize },

    #[error("connection retry cancelled")]
    Cancelled,
}

// ============================================================================
// Relay Client
// ============================================================================

/// Client for communicating with the ferry relay.
///
/// The `RelayClient` manages the TCP connection, handles automatic
/// reconnection with exponential backoff, and translates between the
/// command/event channels and the wire protocol.
///
/// # Connection Lifecycle
///
/// 1. Client attempts to connect to the relay address
/// 2. On success, announces its version with an automatic check
/// 3. Reads server lines and forwards them as events
/// 4. Executes front-end commands as they arrive
/// 5. On disconnect, emits `Disconnected` and retries with backoff
///
/// # Example
///
/// ```rust,ignore
/// use ferry_client::client::{ClientConfig, RelayClient};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// let (event_tx, event_rx) = mpsc::unbounded_channel();
/// let (command_tx, command_rx) = mpsc::unbounded_channel();
/// let cancel_token = CancellationToken::new();
/// let client = RelayClient::new(ClientConfig::default(), event_tx, command_rx, cancel_token);
///
/// tokio::spawn(async move {
///     client.run().await;
/// });
/// ```
pub struct RelayClient {
    /// Configuration for connection behavior.
    config: ClientConfig,

    /// Channel to send events to the front end.
    event_tx: mpsc::UnboundedSender<ClientEvent>,

    /// Channel to receive commands from the front end.
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientCommand>>,

    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,
}

impl RelayClient {
    /// Creates a new relay client.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
        command_rx: mpsc::UnboundedReceiver<ClientCommand>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
            cancel_token,
        }
    }

    /// Creates a new relay client with default configuration.
    #[must_use]
    pub fn with_defaults(
        event_tx: mpsc::UnboundedSender<ClientEvent>,
        command_rx: mpsc::UnboundedReceiver<ClientCommand>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self::new(ClientConfig::default(), event_tx, command_rx, cancel_token)
    }

    /// Main loop that maintains the connection to the relay.
    ///
    /// Runs until the cancellation token fires: connects with exponential
    /// backoff, serves one connection to its end, emits `Disconnected`,
    /// and goes back to reconnecting.
    pub async fn run(&self) {
        info!(server = %self.config.server_addr, "relay client starting");

        loop {
            if self.cancel_token.is_cancelled() {
                info!("relay client shutting down");
                return;
            }

            match self.connect_with_retry().await {
                Ok(stream) => {
                    info!(server = %self.config.server_addr, "connected to relay");
                    let _ = self.event_tx.send(ClientEvent::Connected);

                    if let Err(e) = self.handle_connection(stream).await {
                        warn!(error = %e, "connection ended with error");
                    }

                    // Front end may already be shutting down; ignore send errors.
                    let _ = self.event_tx.send(ClientEvent::Disconnected);
                }
                Err(e) => {
                    if !self.cancel_token.is_cancelled() {
                        warn!(error = %e, "failed to connect to relay");
                    }
                }
            }

            if self.cancel_token.is_cancelled() {
                info!("relay client shutting down");
                return;
            }
        }
    }

    /// Attempts to connect with exponential backoff.
    ///
    /// Retries indefinitely until successful or cancelled, starting at
    /// `retry_initial_delay` and capping at `retry_max_delay`.
    async fn connect_with_retry(&self) -> Result<TcpStream, ClientError> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            debug!(attempt, server = %self.config.server_addr, "connecting to relay");

            match TcpStream::connect(&self.config.server_addr).await {
                Ok(stream) => {
                    debug!(attempt, "connection successful");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "connection attempt failed");
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    let next_delay_ms =
                        (delay.as_millis() as f64 * self.config.retry_multiplier) as u64;
                    delay = Duration::from_millis(next_delay_ms).min(self.config.retry_max_delay);
                }
                _ = self.cancel_token.cancelled() => {
                    info!("connection retry cancelled");
                    return Err(ClientError::Cancelled);
                }
            }
        }
    }

    /// Serves one established connection.
    ///
    /// Announces the client version, then alternates between server lines
    /// and front-end commands until EOF, error, or shutdown.
    async fn handle_connection(&self, stream: TcpStream) -> Result<(), ClientError> {
        let (reader, mut writer) = stream.into_split();
        // Half-read lines live in the framer between polls, so a command
        // winning the select below cannot drop bytes with its read future.
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        // Every fresh connection announces its version; the reply arrives
        // through the regular event stream.
        let check = Request::VersionCheck {
            version: self.config.client_version.to_string(),
        };
        self.send_line(&mut writer, &render_request(&check)).await?;

        self.message_loop(&mut lines, &mut writer).await
    }

    /// Writes one wire line followed by the newline terminator.
    async fn send_line<W: AsyncWriteExt + Unpin>(
        &self,
        writer: &mut W,
        line: &str,
    ) -> Result<(), ClientError> {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        debug!(bytes = line.len(), "sent line to relay");
        Ok(())
    }

    /// Main loop serving both server lines and front-end commands.
    ///
    /// The read side is a framed stream, not a buffered `read_line`:
    /// dropping a pending `next()` leaves any half-read line inside the
    /// framer, so commands interleave with server lines without losing
    /// bytes.
    async fn message_loop<R, W>(
        &self,
        lines: &mut FramedRead<R, LinesCodec>,
        writer: &mut W,
    ) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        loop {
            if self.cancel_token.is_cancelled() {
                debug!("message loop cancelled");
                return Ok(());
            }

            let mut command_rx = self.command_rx.lock().await;

            tokio::select! {
                read_result = lines.next() => {
                    drop(command_rx);
                    match read_result {
                        Some(Ok(line)) => {
                            self.handle_server_line(&line);
                        }
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            return Err(ClientError::LineTooLarge { max: MAX_LINE_BYTES });
                        }
                        Some(Err(LinesCodecError::Io(e))) => {
                            return Err(ClientError::Io(e));
                        }
                        None => {
                            info!("relay closed connection");
                            return Ok(());
                        }
                    }
                }

                command = command_rx.recv() => {
                    drop(command_rx);
                    match command {
                        Some(command) => self.execute(writer, command).await?,
                        None => {
                            debug!("command channel closed");
                            return Ok(());
                        }
                    }
                }

                _ = self.cancel_token.cancelled() => {
                    drop(command_rx);
                    debug!("message loop cancelled during select");
                    return Ok(());
                }
            }
        }
    }

    /// Decodes one server line into an event for the front end.
    fn handle_server_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        let event = match parse_push(line) {
            Push::UpdateAvailable { version, url } => {
                info!(version = %version, url = %url, "server offers update");
                ClientEvent::UpdateAvailable {
                    version,
                    download_url: url,
                }
            }
            Push::UpToDate => ClientEvent::UpToDate,
            Push::Message { text } => ClientEvent::Message(text),
            Push::Raw { line } => {
                debug!(line = %line, "unrecognized server line");
                ClientEvent::Raw(line)
            }
        };
        let _ = self.event_tx.send(event);
    }

    /// Carries out one front-end command on the wire.
    ///
    /// Only transport failures propagate; a command that is invalid on
    /// its own (unreadable file, bad name) becomes an `Error` event and
    /// the connection lives on.
    async fn execute<W: AsyncWriteExt + Unpin>(
        &self,
        writer: &mut W,
        command: ClientCommand,
    ) -> Result<(), ClientError> {
        match command {
            ClientCommand::SendText(text) => {
                self.send_line(writer, &encode(text.as_bytes())).await
            }
            ClientCommand::UploadFile(path) => match self.build_upload(&path).await {
                Some(request) => self.send_line(writer, &render_request(&request)).await,
                None => Ok(()),
            },
            ClientCommand::CheckVersion => {
                let check = Request::VersionCheck {
                    version: self.config.client_version.to_string(),
                };
                self.send_line(writer, &render_request(&check)).await
            }
        }
    }

    /// Reads a local file into an upload request, reporting problems as
    /// `Error` events rather than failing the connection.
    async fn build_upload(&self, path: &std::path::Path) -> Option<Request> {
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.contains('|') => name.to_string(),
            Some(name) => {
                warn!(filename = %name, "file name not representable on the wire");
                let _ = self.event_tx.send(ClientEvent::Error(format!(
                    "cannot upload {name:?}: name may not contain '|'"
                )));
                return None;
            }
            None => {
                let _ = self.event_tx.send(ClientEvent::Error(format!(
                    "cannot upload {}: not a file name",
                    path.display()
                )));
                return None;
            }
        };

        match tokio::fs::read(path).await {
            Ok(payload) => {
                info!(filename = %filename, bytes = payload.len(), "uploading file");
                Some(Request::FileUpload { filename, payload })
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read upload");
                let _ = self.event_tx.send(ClientEvent::Error(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
