//! `packsync diff <pack>`: preview what sync would change for one pack.

use anyhow::{Context, Result};
use clap::Args;

use packsync_core::PackName;
use packsync_sync::{diff::diff_pack, reconcile::RewriteReason, SyncError};

use super::{runtime, GlobalArgs};

/// Arguments for `packsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Pack name to diff.
    pub pack: String,
}

impl DiffArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = global.session()?;
        let source = session.source()?;
        let desired = runtime()?
            .block_on(source.fetch())
            .with_context(|| format!("failed to fetch desired state from {}", source.describe()))?;

        let pack = PackName::from(self.pack);
        let spec = desired
            .packs
            .get(&pack)
            .ok_or_else(|| SyncError::UnknownPack(pack.clone()))?;
        let result = diff_pack(&pack, spec, &session.cache_root())
            .with_context(|| format!("diff failed for '{pack}'"))?;

        if result.is_empty() {
            println!("No differences for '{pack}'.");
            return Ok(());
        }

        for unit in &result.stale_units {
            println!("- unit {unit} (removed)");
        }
        for rewrite in &result.rewrites {
            let reason = match &rewrite.reason {
                RewriteReason::New => "new".to_string(),
                RewriteReason::VersionChanged { from } => format!("{from} -> {}", rewrite.version),
                RewriteReason::MissingFile => "file missing".to_string(),
            };
            println!("~ unit {}@{} ({reason})", rewrite.name, rewrite.version);
        }
        if let Some(diff) = &result.manifest_diff {
            print!("{diff}");
            if !diff.ends_with('\n') {
                println!();
            }
        }

        Ok(())
    }
}
