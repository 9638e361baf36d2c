//! Read-only listing of the packs currently in the cache.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;

use packsync_core::PackName;

use crate::error::{io_err, SyncError};
use crate::manifest::{self, manifest_path};

/// One pack directory found under the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedPack {
    pub name: String,
    pub dir: PathBuf,
    pub units: usize,
    pub dependencies: usize,
    /// Manifest mtime in Unix seconds; `None` without a manifest.
    pub modified_unix: Option<u64>,
    /// Set when the manifest could not be read.
    pub error: Option<String>,
}

/// List pack directories under `cache_root`, sorted by name.
///
/// A missing cache root is an empty cache. A broken manifest is reported on
/// its entry instead of failing the listing.
pub fn list_cached_packs(cache_root: &Path) -> Result<Vec<CachedPack>, SyncError> {
    let entries = match std::fs::read_dir(cache_root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(cache_root, err)),
    };

    let mut packs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(cache_root, e))?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let dir = entry.path();
        let modified_unix = std::fs::metadata(manifest_path(&dir))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());

        let mut pack = CachedPack {
            name: name.clone(),
            dir: dir.clone(),
            units: 0,
            dependencies: 0,
            modified_unix,
            error: None,
        };
        match manifest::load(&PackName::from(name), &dir) {
            Ok(loaded) => {
                pack.units = loaded.manifest.units.machine_versions.len();
                pack.dependencies = loaded.manifest.dependencies.len();
            }
            Err(err) => pack.error = Some(err.to_string()),
        }
        packs.push(pack);
    }
    packs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packs)
}
