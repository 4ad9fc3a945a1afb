//! Broadcast registry: the set of sessions eligible for fan-out.
//!
//! Live session writers sit in one map behind a single mutex. A broadcast
//! snapshots the map under the lock, releases it, then writes to each
//! session in turn; any session whose write fails is evicted in the same
//! cycle, so a dead peer never outlives one broadcast and never blocks
//! delivery to the rest.

use std::collections::HashMap;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::server::session::{write_line, SessionId, SessionWriter};

/// Outcome of one broadcast cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Sessions the line was delivered to.
    pub delivered: usize,
    /// Sessions evicted because their write failed.
    pub removed: Vec<SessionId>,
}

/// Tracks the write half of every live session.
#[derive(Default)]
pub struct BroadcastRegistry {
    sessions: Mutex<HashMap<SessionId, SessionWriter>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a session's writer. Returns `false` when the id was
    /// already present; the entry is replaced either way, so the map never
    /// holds two writers for one id.
    pub async fn register(&self, id: SessionId, writer: SessionWriter) -> bool {
        let mut sessions = self.sessions.lock().await;
        let fresh = sessions.insert(id, writer).is_none();
        debug!(session = id, count = sessions.len(), "session registered");
        fresh
    }

    /// Removes a session. Returns `true` when it was present; removing an
    /// absent id is a no-op, which keeps session cleanup idempotent.
    pub async fn unregister(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(&id).is_some();
        if removed {
            debug!(session = id, count = sessions.len(), "session unregistered");
        }
        removed
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Writes one wire line to every registered session.
    ///
    /// The membership snapshot is taken under the lock; the writes happen
    /// outside it. Sessions joining mid-broadcast catch the next one.
    pub async fn broadcast(&self, line: &str) -> BroadcastSummary {
        let snapshot: Vec<(SessionId, SessionWriter)> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .map(|(id, writer)| (*id, writer.clone()))
                .collect()
        };

        let mut summary = BroadcastSummary::default();
        for (id, writer) in snapshot {
            match write_line(&writer, line).await {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(session = id, error = %e, "broadcast write failed, evicting session");
                    summary.removed.push(id);
                }
            }
        }

        if !summary.removed.is_empty() {
            let mut sessions = self.sessions.lock().await;
            for id in &summary.removed {
                sessions.remove(id);
            }
        }

        debug!(
            delivered = summary.delivered,
            removed = summary.removed.len(),
            "broadcast complete"
        );
        summary
    }

    /// Drains the registry and shuts down every writer. Used at server
    /// shutdown to close all connected peers.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(SessionId, SessionWriter)> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().collect()
        };
        let count = drained.len();

        for (id, writer) in drained {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(session = id, error = %e, "error shutting down session writer");
            }
        }

        if count > 0 {
            info!(count, "closed all registered sessions");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::{TcpListener, TcpStream};

    /// One accepted connection: the server-side writer plus the client
    /// side's read half for observing what was delivered.
    async fn session_pair() -> (SessionWriter, BufReader<OwnedReadHalf>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();

        let (_, write_half) = stream.into_split();
        let writer: SessionWriter = Arc::new(Mutex::new(BufWriter::new(write_half)));
        let (client_read, _client_write) = client.into_split();
        (writer, BufReader::new(client_read))
    }

    async fn recv(reader: &mut BufReader<OwnedReadHalf>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_register_same_id_twice_keeps_one_entry() {
        let registry = BroadcastRegistry::new();
        let (writer, _reader) = session_pair().await;

        assert!(registry.register(7, writer.clone()).await);
        assert!(!registry.register(7, writer).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_twice_is_harmless() {
        let registry = BroadcastRegistry::new();
        let (writer, _reader) = session_pair().await;
        registry.register(3, writer).await;

        assert!(registry.unregister(3).await);
        assert!(!registry.unregister(3).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_all_sessions() {
        let registry = BroadcastRegistry::new();
        let (writer_a, mut reader_a) = session_pair().await;
        let (writer_b, mut reader_b) = session_pair().await;
        registry.register(1, writer_a).await;
        registry.register(2, writer_b).await;

        let summary = registry.broadcast("aGVsbG8=").await;

        assert_eq!(summary.delivered, 2);
        assert!(summary.removed.is_empty());
        assert_eq!(recv(&mut reader_a).await, "aGVsbG8=");
        assert_eq!(recv(&mut reader_b).await, "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_broadcast_evicts_failed_session_and_reaches_rest() {
        let registry = BroadcastRegistry::new();
        let (writer_a, mut reader_a) = session_pair().await;
        let (writer_b, _reader_b) = session_pair().await;
        let (writer_c, mut reader_c) = session_pair().await;
        registry.register(1, writer_a).await;
        registry.register(2, writer_b.clone()).await;
        registry.register(3, writer_c).await;

        // Kill the middle session's write half so its write fails.
        writer_b.lock().await.shutdown().await.unwrap();

        let summary = registry.broadcast("cGluZw==").await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.removed, vec![2]);
        assert_eq!(registry.len().await, 2);
        assert_eq!(recv(&mut reader_a).await, "cGluZw==");
        assert_eq!(recv(&mut reader_c).await, "cGluZw==");

        // The next broadcast no longer sees the evicted session.
        let summary = registry.broadcast("cGluZw==").await;
        assert_eq!(summary.delivered, 2);
        assert!(summary.removed.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_drains_registry() {
        let registry = BroadcastRegistry::new();
        let (writer_a, mut reader_a) = session_pair().await;
        let (writer_b, _reader_b) = session_pair().await;
        registry.register(1, writer_a).await;
        registry.register(2, writer_b).await;

        assert_eq!(registry.close_all().await, 2);
        assert!(registry.is_empty().await);

        // Peers observe EOF.
        let mut line = String::new();
        let n = reader_a.read_line(&mut line).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_broadcast_on_empty_registry() {
        let registry = BroadcastRegistry::new();
        let summary = registry.broadcast("aGk=").await;
        assert_eq!(summary, BroadcastSummary::default());
    }
}
