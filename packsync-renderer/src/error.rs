//! Error types for packsync-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from generating pack files.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (unit values, manifest, tera context).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while loading user templates.
    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
