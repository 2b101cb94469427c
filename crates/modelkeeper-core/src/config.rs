//! Centralized configuration for ModelKeeper.
//!
//! Constant tables hold timeouts, directory names and defaults. [`KeeperConfig`]
//! carries the runtime settings: defaults, overlaid by an optional JSON file,
//! overlaid by the environment (`OLLAMA_HOST`, `OLLAMA_MODELS`).

use crate::error::{KeeperError, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:11434";
    /// Budget for short API calls (tags, delete).
    pub const API_TIMEOUT: Duration = Duration::from_secs(10);
    /// Budget for the live-catalog query made during reconciliation.
    pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(3);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Longest silence tolerated on an open pull stream.
    pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const USER_AGENT: &'static str = "modelkeeper";
}

/// On-disk layout of the model store.
pub struct PathsConfig;

impl PathsConfig {
    pub const MANIFESTS_DIR_NAME: &'static str = "manifests";
    pub const BLOBS_DIR_NAME: &'static str = "blobs";
    /// Suffix of the in-flight data file written next to a blob.
    pub const PARTIAL_SUFFIX: &'static str = "-partial";
    pub const DEFAULT_REGISTRY: &'static str = "registry.ollama.ai";
    pub const DEFAULT_NAMESPACE: &'static str = "library";
    pub const DEFAULT_TAG: &'static str = "latest";
}

/// Download orchestration settings.
pub struct DownloadConfig;

impl DownloadConfig {
    pub const CLI_PROGRAM: &'static str = "ollama";
    /// Capacity of the per-transfer line channel.
    pub const LINE_BUFFER: usize = 256;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;
}

/// How the orchestrator drives a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Stream `POST /api/pull` directly.
    #[default]
    Http,
    /// Invoke the serving process CLI and parse its output.
    Cli,
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct KeeperConfig {
    pub base_url: String,
    pub models_root: PathBuf,
    pub transfer_mode: TransferMode,
    pub cli_program: String,
    #[serde(with = "duration_secs")]
    pub catalog_timeout: Duration,
    pub retry: RetryConfig,
    /// Optional path to a JSON catalog replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            base_url: NetworkConfig::DEFAULT_BASE_URL.to_string(),
            models_root: default_models_root(),
            transfer_mode: TransferMode::default(),
            cli_program: DownloadConfig::CLI_PROGRAM.to_string(),
            catalog_timeout: NetworkConfig::CATALOG_TIMEOUT,
            retry: RetryConfig::default(),
            catalog_path: None,
        }
    }
}

impl KeeperConfig {
    /// Load configuration: defaults, then `path` if given, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a JSON configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| KeeperError::io_with_path(e, path))?;
        serde_json::from_str(&text).map_err(|e| KeeperError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Overlay environment variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
            self.base_url = normalize_host(&host);
            debug!("Using serving base URL from OLLAMA_HOST: {}", self.base_url);
        }
        if let Some(root) = lookup("OLLAMA_MODELS").filter(|r| !r.trim().is_empty()) {
            self.models_root = PathBuf::from(root);
            debug!("Using models root from OLLAMA_MODELS: {}", self.models_root.display());
        }
    }
}

/// Default models root: `~/.ollama/models`.
pub fn default_models_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ollama")
        .join("models")
}

/// Turn an `OLLAMA_HOST`-style value into a base URL.
///
/// Accepts `host`, `host:port`, or a full URL.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    let authority = with_scheme
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if authority.contains(':') {
        with_scheme
    } else {
        format!("{}:11434", with_scheme)
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
