//! Error types for packsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use packsync_core::{CoreError, PackName};
use packsync_renderer::RenderError;

/// Failure to obtain a desired-state document. Aborts the whole sync.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The pack-listing endpoint answered with a non-success status.
    #[error("pack listing at {url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (DNS, TLS, connection, timeout).
    #[error("pack listing at {url} failed: {message}")]
    Transport { url: String, message: String },

    /// A local desired-state file could not be read.
    #[error("failed to read desired state from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The response was not JSON.
    #[error("desired state from {origin} is not valid JSON: {source}")]
    Malformed {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// The response was JSON of the wrong shape or carried unsafe names.
    #[error("desired state from {origin} rejected: {source}")]
    InvalidDocument {
        origin: String,
        #[source]
        source: CoreError,
    },

    /// The blocking fetch task panicked or was cancelled.
    #[error("fetch task failed: {0}")]
    Join(String),
}

/// All errors that can arise from pruning and reconciling.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Desired state could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// An error from the rendering engine.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An error from config or document validation.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pack's `package.json` exists but is not a valid manifest.
    #[error("pack '{pack}': malformed manifest at {path}: {source}")]
    MalformedManifest {
        pack: PackName,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A single-pack operation named a pack absent from the desired state.
    #[error("pack '{0}' is not in the desired state")]
    UnknownPack(PackName),

    /// A full sync was asked to prune an export directory.
    #[error("{root} is an export directory; name the pack to export instead of syncing everything")]
    ExportNeedsPack { root: PathBuf },

    /// A blocking reconcile task panicked or was cancelled.
    #[error("reconcile task for '{pack}' failed: {message}")]
    Join { pack: String, message: String },
}

/// Failure of one dependency installation. Reported to that task's ticket only.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The install program could not be started.
    #[error("failed to start `{program}` in {dir}: {source}")]
    Spawn {
        program: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The install program exited unsuccessfully.
    #[error("`{program}` failed in {dir} (exit code {code:?}): {stderr}")]
    Failed {
        program: String,
        dir: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// The installer panicked while handling this directory.
    #[error("installer panicked in {dir}: {message}")]
    Panicked { dir: PathBuf, message: String },

    /// No install command is configured.
    #[error("install command is empty")]
    EmptyCommand,

    /// The queue worker is gone; the task never ran.
    #[error("install queue closed before {dir} was processed")]
    QueueClosed { dir: PathBuf },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
