//! packsync: keep a local cache of unit packs in line with a pack service.
//!
//! # Usage
//!
//! ```text
//! packsync sync [--pack <name>] [--dry-run] [--skip-install]
//! packsync export <pack> [--dry-run] [--skip-install]
//! packsync diff <pack>
//! packsync status [--json]
//! packsync daemon start|stop|status|sync [--pack <name>]
//! ```
//!
//! Every command accepts `--project-dir <DIR>` and `--from-file <FILE>`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, diff::DiffArgs, export::ExportArgs, status::StatusArgs,
    sync::SyncArgs, GlobalArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "packsync",
    version,
    about = "Sync unit packs from a pack service into a local module cache",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every pack in the cache with the desired state.
    Sync(SyncArgs),

    /// Write one pack into the current directory.
    Export(ExportArgs),

    /// Show what sync would change for one pack.
    Diff(DiffArgs),

    /// List the packs currently in the cache.
    Status(StatusArgs),

    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    packsync_daemon::init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(&cli.global),
        Commands::Export(args) => args.run(&cli.global),
        Commands::Diff(args) => args.run(&cli.global),
        Commands::Status(args) => args.run(&cli.global),
        Commands::Daemon { command } => commands::daemon::run(command, &cli.global),
    }
}
