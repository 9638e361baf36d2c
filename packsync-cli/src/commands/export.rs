//! `packsync export <pack>`: materialize one pack into the current directory.

use anyhow::Result;
use clap::Args;

use packsync_core::PackName;
use packsync_sync::SyncOptions;

use super::{sync::execute, GlobalArgs};

/// Arguments for `packsync export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Pack to export.
    pub pack: String,

    /// Show what would change without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not run the dependency installer.
    #[arg(long)]
    pub skip_install: bool,
}

impl ExportArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let mut session = global.session()?;
        session.config.export_mode = true;
        let options = SyncOptions {
            cache_root: session.cache_root(),
            dry_run: self.dry_run,
            only: Some(PackName::from(self.pack)),
            export: true,
        };
        execute(&session, &options, self.skip_install)
    }
}
