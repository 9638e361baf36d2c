//! `packsync daemon`: long-running poller and its control socket.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use packsync_daemon::paths::socket_path;
use packsync_daemon::{
    request_status, request_stop, request_sync, start_blocking, DaemonContext, DaemonError,
};
use packsync_sync::{DesiredStateSource, FileSource};

use super::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (poller + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the running daemon to sync now.
    Sync {
        /// Reconcile only this pack.
        #[arg(long)]
        pack: Option<String>,
    },
}

pub fn run(command: DaemonCommand, global: &GlobalArgs) -> Result<()> {
    let session = global.session()?;
    let project_dir = session.project_dir.clone();

    match command {
        DaemonCommand::Start => {
            let source = session
                .from_file
                .as_ref()
                .map(|path| Arc::new(FileSource::new(path)) as Arc<dyn DesiredStateSource>);
            let ctx = DaemonContext::from_config(&project_dir, &session.cwd, &session.config, source)
                .context("failed to configure daemon")?;
            start_blocking(ctx).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&project_dir) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let status = match request_status(&project_dir) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&project_dir).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render daemon status JSON")?
            );
        }
        DaemonCommand::Sync { pack } => {
            let summary = request_sync(&project_dir, pack).context("daemon sync failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary)
                    .context("failed to render sync summary JSON")?
            );
        }
    }

    Ok(())
}
