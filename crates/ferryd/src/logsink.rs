//! Chat and upload record sink.
//!
//! Durable persistence of relay traffic is an external concern; the
//! handler only talks to a [`LogSink`]. Two implementations ship: an
//! append-only JSONL file for when `--log-file` is configured, and a
//! tracing-only fallback for when it is not.

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

/// Receives chat messages and completed file uploads.
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    async fn record_message(&self, client_addr: SocketAddr, text: &str);
    async fn record_file_upload(&self, client_addr: SocketAddr, filename: &str, path: &Path);
}

/// One line of the JSONL log.
#[derive(Serialize)]
struct LogRecord<'a> {
    ts: String,
    kind: &'static str,
    peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stored_path: Option<String>,
}

/// Append-only JSON-lines sink.
pub struct JsonlLogSink {
    file: Mutex<std::fs::File>,
    path: PathBuf,
}

impl JsonlLogSink {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &LogRecord<'_>) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize log record");
                return;
            }
        };
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{line}") {
            warn!(log = %self.path.display(), error = %e, "failed to append log record");
        }
    }
}

#[async_trait]
impl LogSink for JsonlLogSink {
    async fn record_message(&self, client_addr: SocketAddr, text: &str) {
        self.append(&LogRecord {
            ts: Utc::now().to_rfc3339(),
            kind: "message",
            peer: client_addr.to_string(),
            text: Some(text),
            filename: None,
            stored_path: None,
        });
    }

    async fn record_file_upload(&self, client_addr: SocketAddr, filename: &str, path: &Path) {
        self.append(&LogRecord {
            ts: Utc::now().to_rfc3339(),
            kind: "file_upload",
            peer: client_addr.to_string(),
            text: None,
            filename: Some(filename),
            stored_path: Some(path.display().to_string()),
        });
    }
}

/// Fallback sink: records land in the structured log only.
#[derive(Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn record_message(&self, client_addr: SocketAddr, text: &str) {
        info!(peer = %client_addr, text, "chat message");
    }

    async fn record_file_upload(&self, client_addr: SocketAddr, filename: &str, path: &Path) {
        info!(peer = %client_addr, filename, path = %path.display(), "file upload");
    }
}
