//! Error types for packsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from config loading and document validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on config load: includes file path and line context.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The desired-state document has the wrong shape or carries unsafe names.
    #[error("invalid desired-state document: {reason}")]
    InvalidDocument { reason: String },

    /// A setting needed by the requested operation is not configured.
    #[error("missing required setting `{0}`; set it in packsync.yaml or the environment")]
    MissingSetting(&'static str),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidDocument {
        reason: reason.into(),
    }
}
