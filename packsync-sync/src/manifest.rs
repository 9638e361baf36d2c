//! Loading and saving a pack's `package.json`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use packsync_core::{PackName, PersistedManifest};
use packsync_renderer::{manifest as canonical, MANIFEST_FILE};

use crate::error::{io_err, SyncError};
use crate::writer::{atomic_write, WriteResult};

/// A manifest as found on disk, with the text it is compared by.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedManifest {
    pub manifest: PersistedManifest,
    /// Canonical pretty-print of the document as it was on disk.
    pub canonical: String,
    /// False when no manifest file existed and an empty one was synthesized.
    pub existed: bool,
}

/// `<pack_dir>/package.json`
pub fn manifest_path(pack_dir: &Path) -> PathBuf {
    pack_dir.join(MANIFEST_FILE)
}

/// Load the manifest of `pack`, or an empty one when the file is absent.
///
/// The canonical text is produced from the document as parsed, including any
/// keys this tool does not own, so a manifest edited by hand compares unequal
/// and gets rewritten.
pub fn load(pack: &PackName, pack_dir: &Path) -> Result<LoadedManifest, SyncError> {
    let path = manifest_path(pack_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let manifest = PersistedManifest::default();
            return Ok(LoadedManifest {
                canonical: canonical::canonical(&manifest)?,
                manifest,
                existed: false,
            });
        }
        Err(err) => return Err(io_err(&path, err)),
    };

    let malformed = |source| SyncError::MalformedManifest {
        pack: pack.clone(),
        path: path.clone(),
        source,
    };
    let document: Value = serde_json::from_str(&contents).map_err(malformed)?;
    let canonical = canonical::canonical_value(&document)?;
    let manifest: PersistedManifest = serde_json::from_value(document).map_err(malformed)?;

    Ok(LoadedManifest {
        manifest,
        canonical,
        existed: true,
    })
}

/// Atomically write `manifest` to `<pack_dir>/package.json`.
pub fn save(
    pack_dir: &Path,
    manifest: &PersistedManifest,
    dry_run: bool,
) -> Result<WriteResult, SyncError> {
    let contents = canonical::file_contents(manifest)?;
    atomic_write(&manifest_path(pack_dir), &contents, dry_run)
}
