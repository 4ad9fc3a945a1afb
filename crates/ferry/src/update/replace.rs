//! Atomic artifact replacement and respawn.
//!
//! The staged download becomes the live artifact through a single rename
//! in the same directory. Nothing touches the old artifact before the
//! rename itself, so any failure up to and including it leaves the
//! running version intact.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::UpdateError;

/// Derives the staging path for an artifact: a `.download` sibling in the
/// same directory, so the final rename never crosses filesystems.
pub fn staging_path(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| std::ffi::OsString::from("artifact"));
    name.push(".download");
    artifact.with_file_name(name)
}

/// Moves the staged file over the artifact in one rename.
pub fn replace_artifact(staged: &Path, artifact: &Path) -> Result<(), UpdateError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(staged)
            .map_err(UpdateError::Replace)?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(staged, perms).map_err(UpdateError::Replace)?;
    }

    std::fs::rename(staged, artifact).map_err(UpdateError::Replace)?;
    info!(artifact = %artifact.display(), "artifact replaced");
    Ok(())
}

/// How a staged update becomes the running process.
///
/// Kept behind a trait so the pipeline can be exercised without actually
/// spawning executables.
pub trait Relauncher: Send + Sync + 'static {
    /// Starts the replaced artifact; returns the child's pid.
    fn respawn(&self, artifact: &Path) -> io::Result<u32>;
}

/// Spawns the artifact as a detached child carrying the given arguments.
pub struct ProcessRelauncher {
    args: Vec<String>,
}

impl ProcessRelauncher {
    /// Carries the current process's arguments over to the replacement.
    pub fn new() -> Self {
        Self {
            args: std::env::args().skip(1).collect(),
        }
    }

    pub fn with_args(args: Vec<String>) -> Self {
        Self { args }
    }
}

impl Default for ProcessRelauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Relauncher for ProcessRelauncher {
    fn respawn(&self, artifact: &Path) -> io::Result<u32> {
        let child = Command::new(artifact).args(&self.args).spawn()?;
        let pid = child.id();
        debug!(pid, artifact = %artifact.display(), "respawned replacement process");
        Ok(pid)
    }
}
