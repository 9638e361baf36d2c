//! Read-only preview for `packsync diff`.

use std::path::{Path, PathBuf};

use similar::TextDiff;

use packsync_core::{PackName, PackSpec};
use packsync_renderer::MANIFEST_FILE;

use crate::error::SyncError;
use crate::reconcile::{plan_pack, UnitRewrite};

/// What reconciling a pack would change. Nothing is written to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackDiff {
    pub pack: PackName,
    pub dir: PathBuf,
    /// Unified diff of `package.json`, present when its text would change.
    pub manifest_diff: Option<String>,
    pub rewrites: Vec<UnitRewrite>,
    pub stale_units: Vec<String>,
}

impl PackDiff {
    pub fn is_empty(&self) -> bool {
        self.manifest_diff.is_none() && self.rewrites.is_empty() && self.stale_units.is_empty()
    }
}

pub fn diff_pack(pack: &PackName, spec: &PackSpec, cache_root: &Path) -> Result<PackDiff, SyncError> {
    let dir = cache_root.join(&pack.0);
    let plan = plan_pack(pack, spec, &dir)?;

    let manifest_diff = plan.manifest_changed().then(|| {
        let existing = if plan.previous.existed {
            format!("{}\n", plan.previous.canonical)
        } else {
            String::new()
        };
        let rendered = format!("{}\n", plan.candidate_canonical);
        let old_header = format!("a/{}/{}", pack, MANIFEST_FILE);
        let new_header = format!("b/{}/{}", pack, MANIFEST_FILE);
        TextDiff::from_lines(&existing, &rendered)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string()
    });

    Ok(PackDiff {
        pack: pack.clone(),
        dir,
        manifest_diff,
        rewrites: plan.rewrites,
        stale_units: plan.stale_units,
    })
}
