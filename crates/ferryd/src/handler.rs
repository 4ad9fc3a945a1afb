//! Request handling: the seam between the session engine and relay
//! behavior.
//!
//! The session layer knows how to frame lines and keep responses in
//! order; everything the relay *does* with a request lives behind
//! [`RequestHandler`] so tests can swap in recording fakes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use ferry_protocol::{needs_update, Request, Response, VersionTag};

use crate::logsink::LogSink;
use crate::storage::UploadStore;

/// Handles framed requests for one server.
///
/// Implementations are shared across every session, so they must be
/// internally synchronized; the production handler is stateless apart
/// from its store and sink.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produces exactly one response for one well-formed request.
    async fn handle(&self, peer: SocketAddr, request: Request) -> Response;
}

/// Production relay behavior: version negotiation, file relay, text echo.
pub struct RelayHandler {
    release_version: VersionTag,
    download_url: String,
    store: UploadStore,
    sink: Arc<dyn LogSink>,
}

impl RelayHandler {
    pub fn new(
        release_version: VersionTag,
        download_url: impl Into<String>,
        store: UploadStore,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            release_version,
            download_url: download_url.into(),
            store,
            sink,
        }
    }

    fn negotiate(&self, peer: SocketAddr, version: &str) -> Response {
        match VersionTag::parse(version) {
            Ok(client) => {
                if needs_update(&client, &self.release_version) {
                    info!(
                        peer = %peer,
                        client = %client,
                        release = %self.release_version,
                        "client outdated, offering update"
                    );
                    Response::UpdateAvailable {
                        version: self.release_version.to_string(),
                        download_url: self.download_url.clone(),
                    }
                } else {
                    Response::UpToDate
                }
            }
            Err(e) => {
                // Fail closed: a version we cannot parse is never told to
                // replace its own binary.
                warn!(peer = %peer, error = %e, "unparseable client version");
                Response::UpToDate
            }
        }
    }

    async fn store_upload(&self, peer: SocketAddr, filename: &str, payload: &[u8]) -> Response {
        match self.store.save(filename, payload) {
            Ok(path) => {
                info!(
                    peer = %peer,
                    filename,
                    bytes = payload.len(),
                    path = %path.display(),
                    "file stored"
                );
                self.sink.record_file_upload(peer, filename, &path).await;
                Response::Ack {
                    text: format!("received file: {filename} ({} bytes)", payload.len()),
                }
            }
            Err(e) => {
                warn!(peer = %peer, filename, error = %e, "upload rejected");
                Response::Ack {
                    text: format!("upload failed: {e}"),
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler for RelayHandler {
    async fn handle(&self, peer: SocketAddr, request: Request) -> Response {
        match request {
            Request::VersionCheck { version } => self.negotiate(peer, &version),
            Request::FileUpload { filename, payload } => {
                self.store_upload(peer, &filename, &payload).await
            }
            Request::TextMessage { text } => {
                info!(peer = %peer, bytes = text.len(), "text message");
                self.sink.record_message(peer, &text).await;
                Response::Ack {
                    text: format!("received: {text}"),
                }
            }
        }
    }
}
