//! Shared sync entrypoint used by the CLI and the daemon.
//!
//! Fetch → prune → fan-out reconcile → enqueue installs for changed packs.
//! Returns once every reconcile pass has joined; installs keep running on the
//! queue and are observable through the returned tickets.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use packsync_core::{DesiredState, PackName};
use packsync_renderer::Renderer;

use crate::error::SyncError;
use crate::fetch::DesiredStateSource;
use crate::prune::prune;
use crate::queue::{InstallQueue, InstallTicket};
use crate::reconcile::{reconcile_pack, PackChanged, ReconcileOutcome};
use crate::writer::WriteResult;

/// Knobs for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub cache_root: PathBuf,
    pub dry_run: bool,
    /// Reconcile only this pack and skip pruning.
    pub only: Option<PackName>,
    /// `cache_root` is an export directory holding unrelated files; only
    /// single-pack runs are accepted there.
    pub export: bool,
}

impl SyncOptions {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            dry_run: false,
            only: None,
            export: false,
        }
    }
}

/// A pack whose reconcile pass failed; siblings are unaffected.
#[derive(Debug)]
pub struct PackFailure {
    pub pack: PackName,
    pub error: SyncError,
}

/// Everything one run did.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub pruned: Vec<WriteResult>,
    /// Successful reconciles, in pack-name order.
    pub packs: Vec<ReconcileOutcome>,
    pub failures: Vec<PackFailure>,
    /// One ticket per changed pack, in enqueue order.
    pub tickets: Vec<InstallTicket>,
}

impl SyncReport {
    pub fn changed(&self) -> impl Iterator<Item = &PackChanged> {
        self.packs.iter().filter_map(|p| p.changed.as_ref())
    }

    /// Total filesystem mutations (or would-be mutations in dry-run).
    pub fn write_count(&self) -> usize {
        self.pruned.len() + self.packs.iter().map(|p| p.writes.len()).sum::<usize>()
    }
}

/// Fetch from `source`, then [`sync_state`].
///
/// A fetch failure aborts before the cache is touched.
pub async fn run(
    source: &dyn DesiredStateSource,
    queue: Option<&InstallQueue>,
    renderer: Arc<Renderer>,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let desired = source.fetch().await?;
    tracing::info!(
        source = %source.describe(),
        packs = desired.packs.len(),
        "fetched desired state",
    );
    sync_state(desired, queue, renderer, options).await
}

/// Prune and reconcile against an already-fetched desired state.
///
/// Without a queue (or in dry-run) no installs are enqueued.
pub async fn sync_state(
    desired: DesiredState,
    queue: Option<&InstallQueue>,
    renderer: Arc<Renderer>,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    if options.export && options.only.is_none() {
        return Err(SyncError::ExportNeedsPack {
            root: options.cache_root.clone(),
        });
    }

    let mut packs = desired.packs;
    let mut report = SyncReport::default();

    match &options.only {
        Some(name) => {
            let spec = packs
                .remove(name)
                .ok_or_else(|| SyncError::UnknownPack(name.clone()))?;
            packs = BTreeMap::from([(name.clone(), spec)]);
        }
        None => {
            let names: Vec<String> = packs.keys().map(|p| p.0.clone()).collect();
            let root = options.cache_root.clone();
            let dry_run = options.dry_run;
            report.pruned = tokio::task::spawn_blocking(move || {
                let desired: HashSet<&str> = names.iter().map(String::as_str).collect();
                prune(&desired, &root, dry_run)
            })
            .await
            .map_err(|e| SyncError::Join {
                pack: "<prune>".to_owned(),
                message: e.to_string(),
            })??;
        }
    }

    let mut handles = Vec::with_capacity(packs.len());
    for (pack, spec) in packs {
        let renderer = renderer.clone();
        let root = options.cache_root.clone();
        let dry_run = options.dry_run;
        let task_pack = pack.clone();
        let handle = tokio::task::spawn_blocking(move || {
            reconcile_pack(&task_pack, &spec, &root, &renderer, dry_run)
        });
        handles.push((pack, handle));
    }

    for (pack, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(SyncError::Join {
                pack: pack.to_string(),
                message: e.to_string(),
            }),
        };
        match result {
            Ok(outcome) => {
                if let (Some(changed), Some(queue)) = (&outcome.changed, queue) {
                    report.tickets.push(queue.enqueue(changed.dir.clone()));
                }
                report.packs.push(outcome);
            }
            Err(error) => {
                tracing::error!(pack = %pack, error = %error, "pack reconcile failed");
                report.failures.push(PackFailure { pack, error });
            }
        }
    }

    tracing::info!(
        pruned = report.pruned.len(),
        reconciled = report.packs.len(),
        failed = report.failures.len(),
        installs = report.tickets.len(),
        dry_run = options.dry_run,
        "sync finished",
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::error::InstallError;
    use crate::fetch::{FileSource, StaticSource};
    use crate::queue::Installer;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PathBuf>>);

    #[async_trait]
    impl Installer for Recorder {
        async fn install(&self, dir: &Path) -> Result<(), InstallError> {
            self.0.lock().unwrap().push(dir.to_path_buf());
            Ok(())
        }
    }

    fn state(doc: serde_json::Value) -> DesiredState {
        DesiredState::from_value(doc).unwrap()
    }

    fn renderer() -> Arc<Renderer> {
        Arc::new(Renderer::new("machine").unwrap())
    }

    #[tokio::test]
    async fn end_to_end_enqueues_one_install() {
        let root = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let queue = InstallQueue::spawn(recorder.clone());
        let source = StaticSource(state(json!({
            "packA": {
                "machines": { "u1:1.0": { "fn": "function(i,e){e.success();}", "name": "u1" } },
                "dependencies": { "request": "0.2.8" }
            }
        })));

        let report = run(&source, Some(&queue), renderer(), &SyncOptions::new(root.path()))
            .await
            .unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(report.tickets.len(), 1);
        for ticket in report.tickets {
            ticket.wait().await.unwrap();
        }
        let expected = fs::canonicalize(root.path().join("packA")).unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec![expected]);
    }

    #[tokio::test]
    async fn unchanged_second_run_enqueues_nothing() {
        let root = TempDir::new().unwrap();
        let queue = InstallQueue::spawn(Arc::new(Recorder::default()));
        let desired = state(json!({ "p": { "machines": { "u:1": { "fn": "f" } } } }));
        let options = SyncOptions::new(root.path());

        sync_state(desired.clone(), Some(&queue), renderer(), &options)
            .await
            .unwrap();
        let second = sync_state(desired, Some(&queue), renderer(), &options)
            .await
            .unwrap();
        assert_eq!(second.write_count(), 0);
        assert!(second.tickets.is_empty());
    }

    #[tokio::test]
    async fn malformed_manifest_fails_only_its_pack() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("bad")).unwrap();
        fs::write(root.path().join("bad/package.json"), "not json").unwrap();
        let desired = state(json!({
            "bad": { "machines": { "u:1": { "fn": "f" } } },
            "good": { "machines": { "u:1": { "fn": "f" } } }
        }));

        let report = sync_state(desired, None, renderer(), &SyncOptions::new(root.path()))
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].pack, PackName::from("bad"));
        assert!(report.failures[0].error.to_string().contains("bad"));
        assert!(root.path().join("good/u.js").exists());
    }

    #[tokio::test]
    async fn stale_packs_are_pruned_before_reconcile() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("gone/sub")).unwrap();
        let desired = state(json!({ "kept": { "machines": {} } }));

        let report = sync_state(desired, None, renderer(), &SyncOptions::new(root.path()))
            .await
            .unwrap();
        assert_eq!(report.pruned.len(), 1);
        assert!(!root.path().join("gone").exists());
        assert!(root.path().join("kept").is_dir());
    }

    #[tokio::test]
    async fn only_skips_pruning_and_other_packs() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("other")).unwrap();
        let desired = state(json!({
            "a": { "machines": { "u:1": { "fn": "f" } } },
            "b": { "machines": { "u:1": { "fn": "f" } } }
        }));
        let options = SyncOptions {
            only: Some(PackName::from("a")),
            ..SyncOptions::new(root.path())
        };

        let report = sync_state(desired, None, renderer(), &options).await.unwrap();
        assert!(report.pruned.is_empty());
        assert_eq!(report.packs.len(), 1);
        assert!(root.path().join("other").exists());
        assert!(!root.path().join("b").exists());
    }

    #[tokio::test]
    async fn only_with_unknown_pack_is_an_error() {
        let root = TempDir::new().unwrap();
        let options = SyncOptions {
            only: Some(PackName::from("missing")),
            ..SyncOptions::new(root.path())
        };
        let err = sync_state(DesiredState::default(), None, renderer(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownPack(_)));
    }

    #[tokio::test]
    async fn export_directory_refuses_full_sync() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join(".git")).unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();
        let options = SyncOptions {
            export: true,
            ..SyncOptions::new(root.path())
        };

        let err = sync_state(state(json!({ "packA": {} })), None, renderer(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ExportNeedsPack { .. }), "got: {err}");
        assert!(root.path().join(".git").is_dir());
        assert!(root.path().join("src").is_dir());
        assert!(!root.path().join("packA").exists());
    }

    #[tokio::test]
    async fn export_directory_accepts_single_pack() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();
        let options = SyncOptions {
            export: true,
            only: Some(PackName::from("packA")),
            ..SyncOptions::new(root.path())
        };

        let desired = state(json!({ "packA": { "machines": { "u:1": { "fn": "f" } } } }));
        let report = sync_state(desired, None, renderer(), &options).await.unwrap();
        assert!(report.pruned.is_empty());
        assert!(root.path().join("src").is_dir());
        assert!(root.path().join("packA/u.js").is_file());
    }

    #[tokio::test]
    async fn fetch_failure_leaves_cache_untouched() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let source = FileSource::new(tmp.path().join("missing.json"));

        let err = run(&source, None, renderer(), &SyncOptions::new(&root))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Fetch(_)));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn dry_run_enqueues_nothing_and_writes_nothing() {
        let root = TempDir::new().unwrap();
        let queue = InstallQueue::spawn(Arc::new(Recorder::default()));
        let desired = state(json!({ "p": { "machines": { "u:1": { "fn": "f" } } } }));
        let options = SyncOptions {
            dry_run: true,
            ..SyncOptions::new(root.path())
        };

        let report = sync_state(desired, Some(&queue), renderer(), &options)
            .await
            .unwrap();
        assert!(report.write_count() > 0);
        assert!(report.tickets.is_empty());
        assert!(!root.path().join("p").exists());
        assert!(!queue.maintenance().is_set());
    }
}
