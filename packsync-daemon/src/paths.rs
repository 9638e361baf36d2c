use std::path::{Path, PathBuf};

/// Per-project runtime state directory, next to `packsync.yaml`.
pub const STATE_DIR: &str = ".packsync";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}

pub fn socket_path(project_dir: &Path) -> PathBuf {
    state_dir(project_dir).join(DAEMON_SOCKET)
}
