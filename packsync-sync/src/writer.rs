//! Atomic file writes and idempotent create/delete helpers.
//!
//! ## `atomic_write` protocol
//!
//! 1. Normalise line endings to LF.
//! 2. Write to `<path>.packsync.tmp` in the same directory.
//! 3. Rename to the final path (atomic on POSIX).
//! 4. On rename failure remove the `.tmp` and report the error.
//!
//! "Already exists" on directory creation and "not found" on deletion are
//! steady-state outcomes and are never reported as errors.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of an individual filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (created or fully overwritten).
    Written { path: PathBuf },
    /// File or directory was removed.
    Deleted { path: PathBuf },
    /// `--dry-run` mode: the file *would* have been written.
    WouldWrite { path: PathBuf },
    /// `--dry-run` mode: the file or directory *would* have been removed.
    WouldDelete { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path }
            | WriteResult::Deleted { path }
            | WriteResult::WouldWrite { path }
            | WriteResult::WouldDelete { path } => path,
        }
    }

    /// True for results that describe a real (non-dry-run) mutation.
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteResult::Written { .. } | WriteResult::Deleted { .. })
    }
}

// ---------------------------------------------------------------------------
// atomic_write
// ---------------------------------------------------------------------------

/// Atomically write `content` to `path`, replacing any existing file.
pub fn atomic_write(path: &Path, content: &str, dry_run: bool) -> Result<WriteResult, SyncError> {
    let tmp = PathBuf::from(format!("{}.packsync.tmp", path.display()));
    atomic_write_with_tmp(path, content, dry_run, &tmp)
}

fn atomic_write_with_tmp(
    path: &Path,
    content: &str,
    dry_run: bool,
    tmp: &Path,
) -> Result<WriteResult, SyncError> {
    if dry_run {
        tracing::info!("[dry-run] would write: {}", path.display());
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
        });
    }

    let normalized = content.replace("\r\n", "\n");
    std::fs::write(tmp, normalized).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Idempotent create / delete
// ---------------------------------------------------------------------------

/// Create `dir` (and parents); an existing directory is not an error.
pub fn ensure_dir(dir: &Path) -> Result<(), SyncError> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(io_err(dir, err)),
    }
}

/// Remove a file. Returns `None` when there was nothing to remove.
pub fn remove_file(path: &Path, dry_run: bool) -> Result<Option<WriteResult>, SyncError> {
    if dry_run {
        return Ok(path.exists().then(|| WriteResult::WouldDelete {
            path: path.to_path_buf(),
        }));
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("deleted: {}", path.display());
            Ok(Some(WriteResult::Deleted {
                path: path.to_path_buf(),
            }))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Recursively remove a directory. Returns `None` when it was already gone.
pub fn remove_dir(path: &Path, dry_run: bool) -> Result<Option<WriteResult>, SyncError> {
    if dry_run {
        return Ok(path.exists().then(|| WriteResult::WouldDelete {
            path: path.to_path_buf(),
        }));
    }
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(Some(WriteResult::Deleted {
            path: path.to_path_buf(),
        })),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
