//! TCP accept loop for the relay.
//!
//! [`RelayServer`] owns the listener and hands each accepted connection to
//! a spawned [`SessionHandler`](session::SessionHandler) task. A session
//! is registered in the broadcast registry *before* its read loop starts,
//! so no broadcast can slip past a connection that is already live.

pub mod session;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::BufWriter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::handler::RequestHandler;
use crate::registry::BroadcastRegistry;
use session::{SessionHandler, SessionId, SessionWriter};

/// Default listen address; loopback unless configured otherwise.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:54321";

/// Default artifact location handed to outdated clients.
pub const DEFAULT_DOWNLOAD_URL: &str = "http://127.0.0.1:54322/download/ferry-client";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The relay's TCP front end.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<BroadcastRegistry>,
    handler: Arc<dyn RequestHandler>,
    cancel_token: CancellationToken,
    session_counter: AtomicU64,
}

impl RelayServer {
    /// Binds the listener eagerly, so callers can read [`local_addr`]
    /// (and clients can connect) before `run` is polled.
    ///
    /// [`local_addr`]: RelayServer::local_addr
    pub async fn bind(
        bind_addr: &str,
        registry: Arc<BroadcastRegistry>,
        handler: Arc<dyn RequestHandler>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: bind_addr.to_string(),
                source: e,
            })?;
        Ok(Self {
            listener,
            registry,
            handler,
            cancel_token,
            session_counter: AtomicU64::new(1),
        })
    }

    /// The bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the cancellation token fires, then closes
    /// the listener and every registered session.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "relay listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let id = self.session_counter.fetch_add(1, Ordering::Relaxed);
                            self.spawn_session(stream, peer, id).await;
                        }
                        Err(e) => {
                            // One bad accept must not take the server down.
                            error!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        // Stop accepting before tearing sessions down.
        drop(self.listener);
        let closed = self.registry.close_all().await;
        info!(closed, "relay stopped");
        Ok(())
    }

    async fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, id: SessionId) {
        info!(session = id, peer = %peer, "connection accepted");

        let (read_half, write_half) = stream.into_split();
        let writer: SessionWriter = Arc::new(Mutex::new(BufWriter::new(write_half)));

        // Registered before the first read, so the session sees every
        // broadcast issued after its accept.
        self.registry.register(id, writer.clone()).await;

        let session = SessionHandler::new(
            id,
            peer,
            read_half,
            writer,
            Arc::clone(&self.handler),
            Arc::clone(&self.registry),
            self.cancel_token.clone(),
        );
        tokio::spawn(session.run());
    }
}
