//! Upload storage with staged writes.
//!
//! Files only ever appear in the store whole: the payload is written to a
//! temp file inside the destination directory and atomically persisted to
//! its final name, so a crash mid-write never leaves a truncated file
//! under the real filename.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid filename: {name:?}")]
    InvalidFilename { name: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory-backed store for relayed files.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `payload` under `filename`, replacing any previous file of
    /// the same name.
    ///
    /// The filename must be a bare name: separators, `..`, and empty
    /// names are rejected rather than resolved.
    pub fn save(&self, filename: &str, payload: &[u8]) -> Result<PathBuf, StorageError> {
        let name = sanitize(filename)?;
        let dest = self.root.join(name);

        let mut staged = NamedTempFile::new_in(&self.root)?;
        staged.write_all(payload)?;
        staged.flush()?;
        staged.persist(&dest).map_err(|e| StorageError::Io(e.error))?;

        debug!(filename, path = %dest.display(), "upload persisted");
        Ok(dest)
    }
}

fn sanitize(filename: &str) -> Result<&str, StorageError> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(StorageError::InvalidFilename {
            name: filename.to_string(),
        });
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();

        let path = store.save("report.txt", b"hi").unwrap();

        assert_eq!(path, dir.path().join("report.txt"));
        assert_eq!(std::fs::read(path).unwrap(), b"hi");
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();

        store.save("notes.txt", b"first").unwrap();
        store.save("notes.txt", b"second").unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("notes.txt")).unwrap(),
            b"second"
        );
    }

    #[test]
    fn test_save_leaves_no_staging_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();

        store.save("only.bin", &[0u8; 256]).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("only.bin")]);
    }

    #[test]
    fn test_empty_payload_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();

        let path = store.save("empty.txt", b"").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"");
    }

    #[test]
    fn test_rejects_unsafe_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();

        for name in ["", ".", "..", "../evil", "a/b", "a\\b", "nul\0byte"] {
            let err = store.save(name, b"x").unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidFilename { .. }),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("uploads").join("deep");

        let store = UploadStore::open(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.root(), nested);
    }
}
