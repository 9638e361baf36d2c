//! Layered configuration.
//!
//! # Layers (lowest first)
//!
//! ```text
//! built-in defaults
//! <config dir>/packsync/config.yaml   (user; holds the shared secret)
//! <project>/packsync.yaml             (project)
//! PACKSYNC_URL / PACKSYNC_SECRET / PACKSYNC_EXPORT
//! ```
//!
//! Every file-reading function has an `_at` form taking explicit paths; tests
//! must use those and never the wrappers that consult `dirs` or the process
//! environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

/// Project-level config file name.
pub const PROJECT_CONFIG_FILE: &str = "packsync.yaml";

/// Default cache root, relative to the project directory.
pub const DEFAULT_CACHE_DIR: &str = "node_modules/.packsync";

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSyncConfig {
    /// Base URL of the pack-listing service.
    pub base_url: Option<String>,
    /// Shared secret sent with the pack-listing request.
    pub secret: Option<String>,
    /// Cache root relative to the project (absolute paths are used as-is).
    pub cache_dir: PathBuf,
    /// Export mode: the cache root is the current directory.
    pub export_mode: bool,
    /// Dependency installer argv, run inside each changed pack directory.
    pub install_command: Vec<String>,
    /// Module the generated `index.js` loads packs through.
    pub loader_module: String,
    /// Directory of `.tera` overrides for the generated files.
    pub template_dir: Option<PathBuf>,
    /// Daemon re-sync interval.
    pub poll_interval_secs: u64,
}

impl Default for PackSyncConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            secret: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            export_mode: false,
            install_command: ["npm", "install", "--no-audit", "--no-fund"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            loader_module: "machine".to_owned(),
            template_dir: None,
            poll_interval_secs: 300,
        }
    }
}

/// One config file; every field optional so layers only override what they set.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigLayer {
    base_url: Option<String>,
    secret: Option<String>,
    cache_dir: Option<PathBuf>,
    export_mode: Option<bool>,
    install_command: Option<Vec<String>>,
    loader_module: Option<String>,
    template_dir: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
}

impl PackSyncConfig {
    fn apply(&mut self, layer: ConfigLayer) {
        if layer.base_url.is_some() {
            self.base_url = layer.base_url;
        }
        if layer.secret.is_some() {
            self.secret = layer.secret;
        }
        if let Some(dir) = layer.cache_dir {
            self.cache_dir = dir;
        }
        if let Some(export) = layer.export_mode {
            self.export_mode = export;
        }
        if let Some(cmd) = layer.install_command {
            self.install_command = cmd;
        }
        if let Some(loader) = layer.loader_module {
            self.loader_module = loader;
        }
        if layer.template_dir.is_some() {
            self.template_dir = layer.template_dir;
        }
        if let Some(secs) = layer.poll_interval_secs {
            self.poll_interval_secs = secs;
        }
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PACKSYNC_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = Some(url);
        }
        if let Some(secret) = lookup("PACKSYNC_SECRET").filter(|v| !v.is_empty()) {
            self.secret = Some(secret);
        }
        if let Some(flag) = lookup("PACKSYNC_EXPORT") {
            let normalized = flag.trim().to_ascii_lowercase();
            self.export_mode = matches!(normalized.as_str(), "1" | "true" | "yes" | "on");
        }
    }

    /// Resolve the cache root: `cwd` in export mode, otherwise
    /// `<project_dir>/<cache_dir>`.
    pub fn cache_root(&self, project_dir: &Path, cwd: &Path) -> PathBuf {
        if self.export_mode {
            cwd.to_path_buf()
        } else {
            project_dir.join(&self.cache_dir)
        }
    }

    /// Base URL and secret, or the first missing setting.
    pub fn remote(&self) -> Result<(&str, &str), CoreError> {
        let url = self
            .base_url
            .as_deref()
            .ok_or(CoreError::MissingSetting("base_url"))?;
        let secret = self
            .secret
            .as_deref()
            .ok_or(CoreError::MissingSetting("secret"))?;
        Ok((url, secret))
    }

    /// Template override directory, resolved against `project_dir`.
    pub fn template_dir_at(&self, project_dir: &Path) -> Option<PathBuf> {
        self.template_dir.as_ref().map(|dir| project_dir.join(dir))
    }
}

/// `<config dir>/packsync/config.yaml`, when the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("packsync").join("config.yaml"))
}

/// Load defaults, then `user_config` (if given and present), then the
/// project's `packsync.yaml`. Environment is not consulted.
pub fn load_at(project_dir: &Path, user_config: Option<&Path>) -> Result<PackSyncConfig, CoreError> {
    let mut config = PackSyncConfig::default();
    if let Some(path) = user_config {
        if let Some(layer) = read_layer(path)? {
            config.apply(layer);
        }
    }
    if let Some(layer) = read_layer(&project_dir.join(PROJECT_CONFIG_FILE))? {
        config.apply(layer);
    }
    Ok(config)
}

/// Full layering: [`load_at`] with the user config path plus environment overrides.
pub fn load(project_dir: &Path) -> Result<PackSyncConfig, CoreError> {
    let user = user_config_path();
    let mut config = load_at(project_dir, user.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

fn read_layer(path: &Path) -> Result<Option<ConfigLayer>, CoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(Some(ConfigLayer::default()));
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
}
