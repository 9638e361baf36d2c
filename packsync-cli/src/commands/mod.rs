pub mod daemon;
pub mod diff;
pub mod export;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use packsync_core::{config, PackSyncConfig};
use packsync_renderer::Renderer;
use packsync_sync::{
    DesiredStateSource, FileSource, HttpSource, InstallTicket, ReconcileOutcome, SyncReport,
    WriteResult,
};

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Project directory holding `packsync.yaml` (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// Read the desired state from a local JSON file instead of the pack service.
    #[arg(long, global = true, value_name = "FILE")]
    pub from_file: Option<PathBuf>,
}

/// Resolved project, config and source selection for one invocation.
pub struct Session {
    pub project_dir: PathBuf,
    pub cwd: PathBuf,
    pub config: PackSyncConfig,
    pub from_file: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn session(&self) -> Result<Session> {
        let cwd = std::env::current_dir().context("could not determine current directory")?;
        let project_dir = match &self.project_dir {
            Some(dir) => cwd.join(dir),
            None => cwd.clone(),
        };
        let config = config::load(&project_dir)
            .with_context(|| format!("failed to load config for {}", project_dir.display()))?;
        Ok(Session {
            project_dir,
            from_file: self.from_file.as_ref().map(|f| cwd.join(f)),
            cwd,
            config,
        })
    }
}

impl Session {
    pub fn source(&self) -> Result<Arc<dyn DesiredStateSource>> {
        if let Some(path) = &self.from_file {
            return Ok(Arc::new(FileSource::new(path)));
        }
        let source = HttpSource::from_config(&self.config)
            .context("no pack service configured; set base_url and secret or pass --from-file")?;
        Ok(Arc::new(source))
    }

    pub fn renderer(&self) -> Result<Arc<Renderer>> {
        let template_dir = self.config.template_dir_at(&self.project_dir);
        let renderer = Renderer::with_templates(self.config.loader_module.clone(), template_dir.as_deref())
            .context("failed to load templates")?;
        Ok(Arc::new(renderer))
    }

    pub fn cache_root(&self) -> PathBuf {
        self.config.cache_root(&self.project_dir, &self.cwd)
    }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

// ---------------------------------------------------------------------------
// Shared output
// ---------------------------------------------------------------------------

pub fn print_report(report: &SyncReport, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    for pruned in &report.pruned {
        println!("{prefix}{} pruned {}", "✗".red(), pruned.path().display());
    }
    for outcome in &report.packs {
        print_outcome(outcome, prefix);
    }
    for failure in &report.failures {
        eprintln!("{} '{}' failed: {}", "✗".red().bold(), failure.pack, failure.error);
    }
}

fn print_outcome(outcome: &ReconcileOutcome, prefix: &str) {
    if outcome.writes.is_empty() {
        println!("{prefix}✓ '{}': nothing to do", outcome.pack);
        return;
    }

    let deleted = outcome
        .writes
        .iter()
        .filter(|w| matches!(w, WriteResult::Deleted { .. } | WriteResult::WouldDelete { .. }))
        .count();
    println!(
        "{prefix}✓ '{}' synced ({} written, {} deleted)",
        outcome.pack,
        outcome.writes.len() - deleted,
        deleted
    );
    for write in &outcome.writes {
        match write {
            WriteResult::Written { path } => println!("  ✎  {}", path.display()),
            WriteResult::Deleted { path } => println!("  ✗  {}", path.display()),
            WriteResult::WouldWrite { path } => println!("  ~  {}", path.display()),
            WriteResult::WouldDelete { path } => println!("  -  {}", path.display()),
        }
    }
}

/// Wait for every install and print its outcome. Returns the failure count.
pub async fn await_installs(tickets: Vec<InstallTicket>) -> usize {
    if tickets.is_empty() {
        return 0;
    }
    println!("installing dependencies for {} pack(s)", tickets.len());
    let mut failed = 0;
    for ticket in tickets {
        let dir = ticket.dir.clone();
        match ticket.wait().await {
            Ok(()) => println!("  {} {}", "✓".green(), dir.display()),
            Err(err) => {
                failed += 1;
                eprintln!("  {} {err}", "!".yellow().bold());
            }
        }
    }
    failed
}

/// Error for a run where some packs could not be reconciled.
pub fn failures_to_result(report: &SyncReport) -> Result<()> {
    if report.failures.is_empty() {
        return Ok(());
    }
    let packs: Vec<&str> = report.failures.iter().map(|f| f.pack.0.as_str()).collect();
    anyhow::bail!("{} pack(s) failed: {}", packs.len(), packs.join(", "))
}
