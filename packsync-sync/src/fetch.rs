//! Desired-state sources.
//!
//! Every source yields a validated [`DesiredState`]; a document that fails
//! validation is rejected before anything touches the cache.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use packsync_core::{DesiredState, PackSyncConfig};

use crate::error::FetchError;

/// Path of the pack-listing endpoint under the configured base URL.
pub const PACKS_ENDPOINT: &str = "packs";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the desired state comes from.
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    async fn fetch(&self) -> Result<DesiredState, FetchError>;

    /// Human-readable origin, used in logs and errors.
    fn describe(&self) -> String;
}

/// Parse and validate a desired-state document.
pub fn parse_document(origin: &str, text: &str) -> Result<DesiredState, FetchError> {
    let document: Value = serde_json::from_str(text).map_err(|source| FetchError::Malformed {
        origin: origin.to_owned(),
        source,
    })?;
    DesiredState::from_value(document).map_err(|source| FetchError::InvalidDocument {
        origin: origin.to_owned(),
        source,
    })
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// `GET <base_url>/packs?secret=<secret>`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    secret: String,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret: secret.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build from config; fails when `base_url` or `secret` is unset.
    pub fn from_config(config: &PackSyncConfig) -> Result<Self, packsync_core::CoreError> {
        let (base_url, secret) = config.remote()?;
        Ok(Self::new(base_url, secret))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint URL without the secret.
    pub fn url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), PACKS_ENDPOINT)
    }

    fn get_blocking(&self) -> Result<String, FetchError> {
        let url = self.url();
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        match agent.get(&url).query("secret", &self.secret).call() {
            Ok(response) => response.into_string().map_err(|e| FetchError::Transport {
                url,
                message: self.redact(format!("reading response body: {e}")),
            }),
            Err(ureq::Error::Status(status, response)) => Err(FetchError::Status {
                url,
                status,
                body: self.redact(response.into_string().unwrap_or_default()),
            }),
            Err(ureq::Error::Transport(transport)) => Err(FetchError::Transport {
                url,
                message: self.redact(transport_message(&transport)),
            }),
        }
    }

    fn redact(&self, text: String) -> String {
        if self.secret.is_empty() {
            text
        } else {
            text.replace(&self.secret, "<redacted>")
        }
    }
}

/// ureq's `Display` for a transport error leads with the request URL, query
/// string included. Rebuild the text from the parts that carry no URL.
fn transport_message(transport: &ureq::Transport) -> String {
    let mut message = transport.kind().to_string();
    if let Some(detail) = transport.message() {
        message.push_str(": ");
        message.push_str(detail);
    }
    if let Some(source) = std::error::Error::source(transport) {
        message.push_str(&format!(": {source}"));
    }
    message
}

#[async_trait]
impl DesiredStateSource for HttpSource {
    async fn fetch(&self) -> Result<DesiredState, FetchError> {
        let this = self.clone();
        let body = tokio::task::spawn_blocking(move || this.get_blocking())
            .await
            .map_err(|e| FetchError::Join(e.to_string()))??;
        tracing::debug!(url = %self.url(), bytes = body.len(), "fetched pack listing");
        parse_document(&self.url(), &body)
    }

    fn describe(&self) -> String {
        self.url()
    }
}

// ---------------------------------------------------------------------------
// Local file
// ---------------------------------------------------------------------------

/// Reads the same document shape from a local JSON file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DesiredStateSource for FileSource {
    async fn fetch(&self) -> Result<DesiredState, FetchError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| FetchError::Io {
                path: self.path.clone(),
                source,
            })?;
        parse_document(&self.describe(), &text)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// An already-validated document; used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct StaticSource(pub DesiredState);

#[async_trait]
impl DesiredStateSource for StaticSource {
    async fn fetch(&self) -> Result<DesiredState, FetchError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".to_owned()
    }
}
