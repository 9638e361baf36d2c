//! `packsync sync`: bring the cache in line with the desired state.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use packsync_core::PackName;
use packsync_sync::{pipeline, CommandInstaller, InstallQueue, Installer, SyncOptions};

use super::{await_installs, failures_to_result, print_report, runtime, GlobalArgs, Session};

/// Arguments for `packsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Reconcile only this pack; other cached packs are left alone.
    #[arg(long)]
    pub pack: Option<String>,

    /// Show what would change without touching the cache.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not run the dependency installer for changed packs.
    #[arg(long)]
    pub skip_install: bool,
}

impl SyncArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = global.session()?;
        let options = SyncOptions {
            cache_root: session.cache_root(),
            dry_run: self.dry_run,
            only: self.pack.map(PackName::from),
            export: session.config.export_mode,
        };
        execute(&session, &options, self.skip_install)
    }
}

/// Run one sync and wait for the installs it triggered.
///
/// Install failures are reported but do not fail the command; packs that
/// could not be reconciled do.
pub fn execute(session: &Session, options: &SyncOptions, skip_install: bool) -> Result<()> {
    let source = session.source()?;
    let renderer = session.renderer()?;
    let installer: Option<Arc<dyn Installer>> = if skip_install || options.dry_run {
        None
    } else {
        let installer = CommandInstaller::from_argv(&session.config.install_command)
            .context("invalid install_command in config")?;
        Some(Arc::new(installer))
    };

    runtime()?.block_on(async {
        let queue = installer.map(InstallQueue::spawn);
        let mut report = pipeline::run(source.as_ref(), queue.as_ref(), renderer, options)
            .await
            .with_context(|| format!("sync from {} failed", source.describe()))?;

        print_report(&report, options.dry_run);
        let tickets = std::mem::take(&mut report.tickets);
        let failed_installs = await_installs(tickets).await;
        if failed_installs > 0 {
            eprintln!("warning: {failed_installs} dependency install(s) failed");
        }
        failures_to_result(&report)
    })
}
