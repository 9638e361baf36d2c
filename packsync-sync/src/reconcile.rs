//! Per-pack reconciliation.
//!
//! A pass runs strictly in order:
//!
//! 1. ensure `<cache_root>/<pack>/` exists,
//! 2. load the persisted manifest (absent → empty, malformed → error),
//! 3. delete unit files no longer desired,
//! 4. regenerate units whose version is new or different,
//! 5. compare canonical manifest text, stop if identical,
//! 6. write `package.json` and `index.js`, report the pack as changed.
//!
//! A unit whose version is unchanged is not regenerated even if its
//! definition changed upstream. Only a missing file forces regeneration.

use std::path::{Path, PathBuf};

use packsync_core::{types::validate_unit_name, PackName, PackSpec, PersistedManifest};
use packsync_renderer::{manifest as canonical, unit_file_name, Renderer, INDEX_FILE};

use crate::error::{io_err, SyncError};
use crate::manifest::{self, LoadedManifest};
use crate::writer::{atomic_write, ensure_dir, remove_file, WriteResult};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Why a unit file is regenerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteReason {
    /// No version was persisted for the unit.
    New,
    /// The persisted version differs from the desired one.
    VersionChanged { from: String },
    /// Versions match but the file is gone from disk.
    MissingFile,
}

/// One unit file to regenerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRewrite {
    pub name: String,
    pub version: String,
    pub reason: RewriteReason,
    /// Position of the unit in `PackSpec::units`.
    index: usize,
}

/// Everything a pack needs, computed without mutating disk.
#[derive(Debug, Clone)]
pub struct PackPlan {
    pub pack: PackName,
    pub dir: PathBuf,
    /// Persisted units absent from the desired spec.
    pub stale_units: Vec<String>,
    pub rewrites: Vec<UnitRewrite>,
    pub previous: LoadedManifest,
    pub candidate: PersistedManifest,
    pub candidate_canonical: String,
}

impl PackPlan {
    /// True when the manifest text would change.
    pub fn manifest_changed(&self) -> bool {
        self.previous.canonical != self.candidate_canonical
    }
}

/// Diff the persisted manifest in `dir` against `spec`.
pub fn plan_pack(pack: &PackName, spec: &PackSpec, dir: &Path) -> Result<PackPlan, SyncError> {
    let previous = manifest::load(pack, dir)?;

    let desired_names = spec.unit_names();
    let mut stale_units = Vec::new();
    for name in previous.manifest.unit_names() {
        if desired_names.contains(name) {
            continue;
        }
        if validate_unit_name(name).is_err() {
            tracing::warn!(pack = %pack, unit = name, "ignoring unsafe unit name in manifest");
            continue;
        }
        stale_units.push(name.to_owned());
    }

    let mut candidate = PersistedManifest {
        dependencies: spec.dependencies.clone(),
        ..PersistedManifest::default()
    };
    let mut rewrites = Vec::new();
    for (index, unit) in spec.units.iter().enumerate() {
        let name = &unit.key.name;
        let version = &unit.key.version;
        let reason = match previous.manifest.version_of(name) {
            None => Some(RewriteReason::New),
            Some(current) if current != version.as_str() => Some(RewriteReason::VersionChanged {
                from: current.to_owned(),
            }),
            Some(_) if !dir.join(unit_file_name(name)).exists() => {
                Some(RewriteReason::MissingFile)
            }
            Some(_) => None,
        };
        if let Some(reason) = reason {
            rewrites.push(UnitRewrite {
                name: name.clone(),
                version: version.clone(),
                reason,
                index,
            });
        }
        candidate.record(name, version);
    }

    let candidate_canonical = canonical::canonical(&candidate)?;
    Ok(PackPlan {
        pack: pack.clone(),
        dir: dir.to_path_buf(),
        stale_units,
        rewrites,
        previous,
        candidate,
        candidate_canonical,
    })
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Emitted when a pack's manifest was rewritten; its dependencies need installing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackChanged {
    pub pack: PackName,
    /// Absolute path of the pack directory.
    pub dir: PathBuf,
}

/// Result of reconciling one pack.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub pack: PackName,
    pub dir: PathBuf,
    pub writes: Vec<WriteResult>,
    /// Whether the manifest text differed (also set in dry-run).
    pub manifest_changed: bool,
    /// Present only when the manifest was actually rewritten.
    pub changed: Option<PackChanged>,
}

/// Reconcile `<cache_root>/<pack>` against `spec`.
pub fn reconcile_pack(
    pack: &PackName,
    spec: &PackSpec,
    cache_root: &Path,
    renderer: &Renderer,
    dry_run: bool,
) -> Result<ReconcileOutcome, SyncError> {
    let dir = cache_root.join(&pack.0);
    if !dry_run {
        ensure_dir(&dir)?;
    }

    let plan = plan_pack(pack, spec, &dir)?;
    let mut writes = Vec::new();

    for name in &plan.stale_units {
        let path = dir.join(unit_file_name(name));
        if let Some(result) = remove_file(&path, dry_run)? {
            writes.push(result);
        }
    }

    for rewrite in &plan.rewrites {
        let definition = &spec.units[rewrite.index].definition;
        let source = renderer.render_unit(definition)?;
        let path = dir.join(unit_file_name(&rewrite.name));
        tracing::debug!(
            pack = %pack,
            unit = %rewrite.name,
            version = %rewrite.version,
            reason = ?rewrite.reason,
            "regenerating unit",
        );
        writes.push(atomic_write(&path, &source, dry_run)?);
    }

    let manifest_changed = plan.manifest_changed();
    if !manifest_changed {
        tracing::debug!(pack = %pack, "manifest unchanged");
        return Ok(ReconcileOutcome {
            pack: pack.clone(),
            dir,
            writes,
            manifest_changed,
            changed: None,
        });
    }

    writes.push(manifest::save(&dir, &plan.candidate, dry_run)?);
    writes.push(atomic_write(
        &dir.join(INDEX_FILE),
        &renderer.render_index()?,
        dry_run,
    )?);

    let changed = if dry_run {
        None
    } else {
        let absolute = std::fs::canonicalize(&dir).map_err(|e| io_err(&dir, e))?;
        tracing::info!(pack = %pack, dir = %absolute.display(), "pack changed");
        Some(PackChanged {
            pack: pack.clone(),
            dir: absolute,
        })
    };

    Ok(ReconcileOutcome {
        pack: pack.clone(),
        dir,
        writes,
        manifest_changed,
        changed,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    use filetime::{set_file_mtime, FileTime};
    use packsync_core::DesiredState;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn spec_of(doc: Value, pack: &str) -> PackSpec {
        let mut state = DesiredState::from_value(doc).expect("valid document");
        state.packs.remove(&PackName::from(pack)).expect("pack present")
    }

    fn renderer() -> Renderer {
        Renderer::new("machine").expect("renderer")
    }

    fn pack_a(version: &str, body: &str) -> PackSpec {
        spec_of(
            json!({
                "packA": {
                    "machines": { format!("u1:{version}"): { "fn": body, "name": "u1" } },
                    "dependencies": { "request": "0.2.8" }
                }
            }),
            "packA",
        )
    }

    fn backdate(paths: &[PathBuf]) -> FileTime {
        let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
        for path in paths {
            set_file_mtime(path, old).expect("set mtime");
        }
        old
    }

    fn mtime(path: &Path) -> FileTime {
        FileTime::from_last_modification_time(&fs::metadata(path).expect("metadata"))
    }

    #[test]
    fn end_to_end_scenario_against_empty_cache() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("packA");
        let outcome = reconcile_pack(
            &pack,
            &pack_a("1.0", "function(i,e){e.success();}"),
            root.path(),
            &renderer(),
            false,
        )
        .unwrap();

        let dir = root.path().join("packA");
        let unit = fs::read_to_string(dir.join("u1.js")).unwrap();
        assert!(unit.starts_with("module.exports = {"));
        assert!(unit.contains("identity: \"u1\""));
        assert!(unit.contains("fn: function(i,e){e.success();}"));

        let manifest: Value =
            serde_json::from_str(&fs::read_to_string(dir.join("package.json")).unwrap()).unwrap();
        assert_eq!(manifest["machinepack"]["machineVersions"], json!({ "u1": "1.0" }));
        assert_eq!(manifest["machinepack"]["machines"], json!(["u1"]));
        assert_eq!(manifest["dependencies"], json!({ "request": "0.2.8" }));
        assert!(dir.join("index.js").exists());

        let changed = outcome.changed.expect("pack changed event");
        assert_eq!(changed.dir, fs::canonicalize(&dir).unwrap());
        assert!(changed.dir.is_absolute());
    }

    #[test]
    fn second_run_writes_nothing() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("packA");
        let spec = pack_a("1.0", "function(){}");
        reconcile_pack(&pack, &spec, root.path(), &renderer(), false).unwrap();

        let dir = root.path().join("packA");
        let files = vec![dir.join("u1.js"), dir.join("package.json"), dir.join("index.js")];
        let old = backdate(&files);

        let outcome = reconcile_pack(&pack, &spec, root.path(), &renderer(), false).unwrap();
        assert!(outcome.writes.is_empty(), "got writes: {:?}", outcome.writes);
        assert!(outcome.changed.is_none());
        for file in &files {
            assert_eq!(mtime(file), old, "{} was rewritten", file.display());
        }
    }

    #[test]
    fn version_bump_rewrites_unit_and_manifest() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("packA");
        reconcile_pack(&pack, &pack_a("1.0", "function(){ return 1; }"), root.path(), &renderer(), false)
            .unwrap();

        let outcome = reconcile_pack(
            &pack,
            &pack_a("1.1", "function(){ return 2; }"),
            root.path(),
            &renderer(),
            false,
        )
        .unwrap();
        let unit = fs::read_to_string(root.path().join("packA/u1.js")).unwrap();
        assert!(unit.contains("return 2;"));
        assert!(outcome.changed.is_some());
    }

    #[test]
    fn same_version_with_new_body_is_not_rewritten() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("packA");
        reconcile_pack(&pack, &pack_a("1.0", "function(){ return 1; }"), root.path(), &renderer(), false)
            .unwrap();

        let outcome = reconcile_pack(
            &pack,
            &pack_a("1.0", "function(){ return 2; }"),
            root.path(),
            &renderer(),
            false,
        )
        .unwrap();
        assert!(outcome.writes.is_empty());
        let unit = fs::read_to_string(root.path().join("packA/u1.js")).unwrap();
        assert!(unit.contains("return 1;"), "stale body is kept: {unit}");
    }

    #[test]
    fn version_text_difference_counts_as_change() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("packA");
        reconcile_pack(&pack, &pack_a("1.0", "f"), root.path(), &renderer(), false).unwrap();
        let outcome =
            reconcile_pack(&pack, &pack_a("1.0.0", "f"), root.path(), &renderer(), false).unwrap();
        assert!(outcome
            .writes
            .iter()
            .any(|w| w.path().ends_with("u1.js")));
        assert!(outcome.changed.is_some());
    }

    #[test]
    fn stale_units_are_deleted_and_manifest_matches_spec() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("p");
        let first = spec_of(
            json!({ "p": { "machines": {
                "keep:1": { "fn": "function(){}" },
                "drop:1": { "fn": "function(){}" }
            } } }),
            "p",
        );
        reconcile_pack(&pack, &first, root.path(), &renderer(), false).unwrap();
        assert!(root.path().join("p/drop.js").exists());

        let second = spec_of(
            json!({ "p": { "machines": {
                "keep:1": { "fn": "function(){}" },
                "added:1": { "fn": "function(){}" }
            } } }),
            "p",
        );
        let outcome = reconcile_pack(&pack, &second, root.path(), &renderer(), false).unwrap();

        assert!(!root.path().join("p/drop.js").exists());
        assert!(root.path().join("p/added.js").exists());
        assert!(matches!(outcome.writes[0], WriteResult::Deleted { .. }), "delete comes first");

        let loaded = manifest::load(&pack, &root.path().join("p")).unwrap();
        let mut names: Vec<_> = loaded.manifest.unit_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["added", "keep"]);
        assert_eq!(loaded.manifest.units.machines, vec!["keep", "added"]);
    }

    #[test]
    fn persisted_index_unit_never_deletes_the_loader_stub() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("p");
        let spec = spec_of(json!({ "p": { "machines": { "keep:1": { "fn": "f" } } } }), "p");
        reconcile_pack(&pack, &spec, root.path(), &renderer(), false).unwrap();

        let dir = root.path().join("p");
        let mut loaded = manifest::load(&pack, &dir).unwrap();
        loaded.manifest.record("index", "1");
        manifest::save(&dir, &loaded.manifest, false).unwrap();

        let outcome = reconcile_pack(&pack, &spec, root.path(), &renderer(), false).unwrap();
        let index = dir.join(INDEX_FILE);
        assert!(
            !outcome
                .writes
                .iter()
                .any(|w| matches!(w, WriteResult::Deleted { path } if *path == index)),
            "{:?}",
            outcome.writes
        );
        assert!(fs::read_to_string(&index).unwrap().contains("require('machine')"));
    }

    #[test]
    fn missing_unit_file_is_regenerated_without_event() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("packA");
        let spec = pack_a("1.0", "function(){}");
        reconcile_pack(&pack, &spec, root.path(), &renderer(), false).unwrap();
        fs::remove_file(root.path().join("packA/u1.js")).unwrap();

        let outcome = reconcile_pack(&pack, &spec, root.path(), &renderer(), false).unwrap();
        assert_eq!(outcome.writes.len(), 1);
        assert!(root.path().join("packA/u1.js").exists());
        assert!(outcome.changed.is_none());
    }

    #[test]
    fn empty_pack_against_empty_cache_emits_nothing() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("empty");
        let outcome =
            reconcile_pack(&pack, &PackSpec::default(), root.path(), &renderer(), false).unwrap();
        assert!(root.path().join("empty").is_dir());
        assert!(outcome.writes.is_empty());
        assert!(outcome.changed.is_none());
    }

    #[test]
    fn malformed_manifest_aborts_pack() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("packA");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), "{{{").unwrap();

        let err = reconcile_pack(
            &PackName::from("packA"),
            &pack_a("1.0", "f"),
            root.path(),
            &renderer(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedManifest { .. }));
        assert!(!dir.join("u1.js").exists(), "no unit written after a bad manifest");
    }

    #[test]
    fn dependency_change_alone_rewrites_manifest() {
        let root = TempDir::new().unwrap();
        let pack = PackName::from("packA");
        reconcile_pack(&pack, &pack_a("1.0", "f"), root.path(), &renderer(), false).unwrap();

        let mut spec = pack_a("1.0", "f");
        spec.dependencies.insert("lodash".into(), json!("4.17.21"));
        let outcome = reconcile_pack(&pack, &spec, root.path(), &renderer(), false).unwrap();

        let paths: Vec<_> = outcome.writes.iter().map(|w| w.path().to_path_buf()).collect();
        assert_eq!(
            paths,
            vec![
                root.path().join("packA/package.json"),
                root.path().join("packA/index.js")
            ]
        );
        assert!(outcome.changed.is_some());
    }

    #[test]
    fn dry_run_plans_without_touching_disk() {
        let root = TempDir::new().unwrap();
        let outcome = reconcile_pack(
            &PackName::from("packA"),
            &pack_a("1.0", "f"),
            root.path(),
            &renderer(),
            true,
        )
        .unwrap();
        assert!(outcome.manifest_changed);
        assert!(outcome.changed.is_none());
        assert_eq!(outcome.writes.len(), 3);
        assert!(outcome.writes.iter().all(|w| !w.is_applied()));
        assert!(!root.path().join("packA").exists());
    }
}
