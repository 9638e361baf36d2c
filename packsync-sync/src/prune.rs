//! Removal of cached packs that are no longer desired.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{io_err, SyncError};
use crate::writer::{ensure_dir, remove_dir, WriteResult};

/// Remove every directory under `cache_root` whose name is not in `desired`.
///
/// Creates `cache_root` first when absent. Matching is exact and
/// case-sensitive; plain files at the root are left alone. Running it twice
/// with the same `desired` set removes nothing the second time.
pub fn prune(
    desired: &HashSet<&str>,
    cache_root: &Path,
    dry_run: bool,
) -> Result<Vec<WriteResult>, SyncError> {
    if dry_run {
        if !cache_root.exists() {
            return Ok(vec![]);
        }
    } else {
        ensure_dir(cache_root)?;
    }

    let mut stale = Vec::new();
    let entries = std::fs::read_dir(cache_root).map_err(|e| io_err(cache_root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(cache_root, e))?;
        let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
        if !ty.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let keep = name.to_str().is_some_and(|name| desired.contains(name));
        if !keep {
            stale.push(entry.path());
        }
    }
    stale.sort();

    let mut results = Vec::with_capacity(stale.len());
    for dir in stale {
        if let Some(result) = remove_dir(&dir, dry_run)? {
            tracing::info!(dir = %dir.display(), dry_run, "pruned pack directory");
            results.push(result);
        }
    }
    Ok(results)
}
