//! Client self-update pipeline.
//!
//! At most one update job exists at a time: `Idle -> Downloading ->
//! Staged -> Respawning -> Idle`, and every trigger races through a
//! single compare-and-swap on the shared state cell. The winner spawns
//! the job; everyone else merely observes that one is already running.
//!
//! A job downloads the artifact to a `.download` sibling, renames it over
//! the running binary, and respawns the replacement. The old binary keeps
//! working through every failure mode short of the rename succeeding.

pub mod download;
pub mod replace;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use download::fetch_artifact;
use replace::{replace_artifact, staging_path, Relauncher};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// States of the update pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateState {
    Idle = 0,
    Downloading = 1,
    Staged = 2,
    Respawning = 3,
}

impl UpdateState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Downloading,
            2 => Self::Staged,
            3 => Self::Respawning,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Downloading => "downloading",
            Self::Staged => "staged",
            Self::Respawning => "respawning",
        };
        write!(f, "{name}")
    }
}

/// Events emitted while an update job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Started { version: String },
    Progress { percent: u8 },
    Staged,
    /// The replacement process is running; the old one should exit.
    Completed { pid: u32 },
    Failed { reason: String },
}

/// Errors from the update pipeline.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("another update is already in progress")]
    AlreadyRunning,

    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("incomplete download: {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("update cancelled")]
    Cancelled,

    #[error("failed to replace artifact: {0}")]
    Replace(std::io::Error),

    #[error("failed to respawn replacement: {0}")]
    Respawn(std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Drives self-update jobs; cheap to clone and share between tasks.
#[derive(Clone)]
pub struct UpdateOrchestrator {
    artifact: PathBuf,
    relauncher: Arc<dyn Relauncher>,
    state: Arc<AtomicU8>,
    job_cancel: Arc<Mutex<CancellationToken>>,
}

impl UpdateOrchestrator {
    pub fn new(artifact: impl Into<PathBuf>, relauncher: Arc<dyn Relauncher>) -> Self {
        Self {
            artifact: artifact.into(),
            relauncher,
            state: Arc::new(AtomicU8::new(UpdateState::Idle as u8)),
            job_cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Current pipeline state.
    pub fn state(&self) -> UpdateState {
        UpdateState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Starts an update job unless one is already running.
    ///
    /// Deduplication is the compare-and-swap on the state cell: the
    /// winning trigger moves `Idle -> Downloading` and spawns the job;
    /// any concurrent or repeated trigger loses the swap and gets
    /// [`UpdateError::AlreadyRunning`].
    pub fn trigger(
        &self,
        version: &str,
        url: &str,
        events: mpsc::UnboundedSender<UpdateEvent>,
    ) -> Result<(), UpdateError> {
        if self
            .state
            .compare_exchange(
                UpdateState::Idle as u8,
                UpdateState::Downloading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(UpdateError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        {
            let mut slot = match self.job_cancel.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = cancel.clone();
        }

        info!(version, url, "update job started");
        let _ = events.send(UpdateEvent::Started {
            version: version.to_string(),
        });

        let orchestrator = self.clone();
        let version = version.to_string();
        let url = url.to_string();
        tokio::spawn(async move {
            orchestrator.run_job(&version, &url, cancel, events).await;
        });
        Ok(())
    }

    /// Requests cancellation of the running job, if any.
    ///
    /// The flag is polled: the job stops between chunk writes or before
    /// the swap, never mid-read. Cancelling when no job runs is a no-op.
    pub fn cancel_update(&self) {
        let slot = match self.job_cancel.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.cancel();
    }

    async fn run_job(
        &self,
        version: &str,
        url: &str,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<UpdateEvent>,
    ) {
        let staged = staging_path(&self.artifact);

        match self.run_pipeline(url, &staged, &cancel, &events).await {
            Ok(pid) => {
                info!(version, pid, "update complete, replacement running");
                self.set_state(UpdateState::Idle);
                let _ = events.send(UpdateEvent::Completed { pid });
            }
            Err(e) => {
                warn!(version, error = %e, "update failed");
                // A half-written staging file must not linger.
                if staged.exists() {
                    if let Err(rm) = std::fs::remove_file(&staged) {
                        warn!(path = %staged.display(), error = %rm, "failed to remove staging file");
                    }
                }
                self.set_state(UpdateState::Idle);
                let _ = events.send(UpdateEvent::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn run_pipeline(
        &self,
        url: &str,
        staged: &Path,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<UpdateEvent>,
    ) -> Result<u32, UpdateError> {
        // Built per job: a TLS setup failure fails this update like any
        // other download error instead of panicking at construction.
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let progress_events = events.clone();
        fetch_artifact(&http, url, staged, cancel, move |percent| {
            let _ = progress_events.send(UpdateEvent::Progress { percent });
        })
        .await?;

        // Last chance to abort; past this point the swap goes ahead.
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        self.set_state(UpdateState::Staged);
        let _ = events.send(UpdateEvent::Staged);
        replace_artifact(staged, &self.artifact)?;

        self.set_state(UpdateState::Respawning);
        let pid = self
            .relauncher
            .respawn(&self.artifact)
            .map_err(UpdateError::Respawn)?;
        Ok(pid)
    }

    fn set_state(&self, next: UpdateState) {
        self.state.store(next as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRelauncher;

    impl Relauncher for NoopRelauncher {
        fn respawn(&self, _artifact: &Path) -> std::io::Result<u32> {
            Ok(1)
        }
    }

    #[test]
    fn test_state_cell_round_trip() {
        for state in [
            UpdateState::Idle,
            UpdateState::Downloading,
            UpdateState::Staged,
            UpdateState::Respawning,
        ] {
            assert_eq!(UpdateState::from_u8(state as u8), state);
        }
        assert_eq!(UpdateState::from_u8(200), UpdateState::Idle);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(UpdateState::Downloading.to_string(), "downloading");
        assert_eq!(UpdateState::Idle.to_string(), "idle");
    }

    #[tokio::test]
    async fn test_second_trigger_loses_the_swap() {
        // A listener that never answers keeps the first job in
        // Downloading for as long as this test needs.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/artifact", listener.local_addr().unwrap());

        let dir = tempfile::tempdir().unwrap();
        let orchestrator =
            UpdateOrchestrator::new(dir.path().join("app"), Arc::new(NoopRelauncher));
        let (events, _event_rx) = mpsc::unbounded_channel();

        orchestrator.trigger("2.0", &url, events.clone()).unwrap();
        assert_eq!(orchestrator.state(), UpdateState::Downloading);

        let second = orchestrator.trigger("2.0", &url, events);
        assert!(matches!(second, Err(UpdateError::AlreadyRunning)));
    }
}
