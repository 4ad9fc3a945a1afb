//! Per-connection session engine.
//!
//! Each accepted connection runs one [`SessionHandler`]: a read loop that
//! frames every newline-terminated line, dispatches it to the
//! [`RequestHandler`], and writes the response before reading the next
//! line, so requests on one session are answered strictly in arrival
//! order. The write half is shared with the broadcast registry behind a
//! mutex, which keeps per-session responses and broadcast fan-out from
//! ever interleaving at the byte level.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferry_protocol::{parse_request, render_response, FrameError, Response, SessionState};

use crate::handler::RequestHandler;
use crate::registry::BroadcastRegistry;

/// Identifies one accepted connection in the registry and the logs.
pub type SessionId = u64;

/// Shared write half of a session.
///
/// Every write goes through [`write_line`], which holds the lock for the
/// whole line-plus-flush, so two writers can never interleave bytes.
pub type SessionWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Upper bound on a single wire line. Sized for single-line base64 file
/// payloads (roughly 24 MiB of raw file content).
pub const MAX_LINE_BYTES: usize = 32 * 1024 * 1024;

/// How long one write may stall before the session is given up on.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a session's read/write path.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write timed out")]
    WriteTimeout,

    #[error("line too large: {size} bytes (max: {max})")]
    LineTooLarge { size: usize, max: usize },
}

/// Writes one wire line (newline appended, then flushed) through a shared
/// session writer.
pub async fn write_line(writer: &SessionWriter, line: &str) -> Result<(), SessionError> {
    let mut writer = writer.lock().await;
    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Io(e)),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}

/// Runs one client connection from accept to cleanup.
pub struct SessionHandler {
    id: SessionId,
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: SessionWriter,
    handler: Arc<dyn RequestHandler>,
    registry: Arc<BroadcastRegistry>,
    cancel_token: CancellationToken,
    state: SessionState,
}

impl SessionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        read_half: OwnedReadHalf,
        writer: SessionWriter,
        handler: Arc<dyn RequestHandler>,
        registry: Arc<BroadcastRegistry>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            reader: BufReader::new(read_half),
            writer,
            handler,
            registry,
            cancel_token,
            state: SessionState::Connecting,
        }
    }

    /// Runs the session to completion: the read loop, then exactly one
    /// cleanup pass, whichever way the loop ended.
    pub async fn run(mut self) {
        self.transition(SessionState::Open);
        info!(session = self.id, peer = %self.peer, "session open");

        match self.read_loop().await {
            Ok(()) => debug!(session = self.id, peer = %self.peer, "session read loop done"),
            Err(e) => debug!(session = self.id, peer = %self.peer, error = %e, "session failed"),
        }

        self.close().await;
    }

    async fn read_loop(&mut self) -> Result<(), SessionError> {
        let mut line = String::new();
        loop {
            line.clear();
            // Sessions have no read deadline: an idle peer stays parked
            // here until it writes, disconnects, or the server shuts down.
            let bytes_read = tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(()),
                result = self.reader.read_line(&mut line) => result?,
            };

            if bytes_read == 0 {
                debug!(session = self.id, peer = %self.peer, "peer closed connection");
                return Ok(());
            }
            if line.len() > MAX_LINE_BYTES {
                return Err(SessionError::LineTooLarge {
                    size: line.len(),
                    max: MAX_LINE_BYTES,
                });
            }

            let frame = line.trim_end_matches(['\r', '\n']);
            self.dispatch(frame).await?;
        }
    }

    /// Frames one line and writes the single response it produces.
    async fn dispatch(&self, line: &str) -> Result<(), SessionError> {
        match parse_request(line) {
            Ok(request) => {
                let response = self.handler.handle(self.peer, request).await;
                self.respond(&response).await
            }
            Err(FrameError::Decode(e)) => {
                debug!(session = self.id, peer = %self.peer, error = %e, "undecodable payload");
                self.respond(&Response::DecodeError).await
            }
            Err(e @ FrameError::MalformedFrame { .. }) => {
                // Dropped without a reply; the connection stays open.
                warn!(session = self.id, peer = %self.peer, error = %e, "malformed frame dropped");
                Ok(())
            }
        }
    }

    async fn respond(&self, response: &Response) -> Result<(), SessionError> {
        write_line(&self.writer, &render_response(response)).await
    }

    /// Deregisters, then shuts the socket down. Runs exactly once per
    /// session; a repeat unregister of the same id is a no-op either way.
    async fn close(&mut self) {
        self.transition(SessionState::Closing);
        self.registry.unregister(self.id).await;
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(session = self.id, error = %e, "socket shutdown error");
            }
        }
        self.transition(SessionState::Closed);
        info!(session = self.id, peer = %self.peer, "session closed");
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            debug!(session = self.id, from = %self.state, to = %next, "session state change");
            self.state = next;
        } else {
            warn!(session = self.id, from = %self.state, to = %next, "ignored illegal state change");
        }
    }
}
