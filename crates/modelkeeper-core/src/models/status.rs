//! Artifact status types derived from the local manifest/blob layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One content-addressed layer of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStatus {
    pub digest: String,
    #[serde(default)]
    pub media_type: Option<String>,
    /// Bytes declared by the manifest.
    pub expected_size: u64,
    /// Bytes present in the blob store (0 if absent).
    pub observed_size: u64,
    /// The blob exists and its size matches exactly.
    pub complete: bool,
}

impl LayerStatus {
    /// Build a layer status from what was found on disk.
    ///
    /// `blob_len` is the length of the final blob file when it exists;
    /// `partial_len` the length of an in-flight partial file. Only the final
    /// blob can make a layer complete.
    pub fn observe(
        digest: impl Into<String>,
        media_type: Option<String>,
        expected_size: u64,
        blob_len: Option<u64>,
        partial_len: Option<u64>,
    ) -> Self {
        let (observed_size, complete) = match blob_len {
            Some(len) => (len, len == expected_size),
            None => (partial_len.unwrap_or(0), false),
        };
        Self {
            digest: digest.into(),
            media_type,
            expected_size,
            observed_size,
            complete,
        }
    }
}

/// Lifecycle state of one named artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    NotInstalled,
    Downloading,
    Partial,
    Complete,
    Corrupted,
}

impl ModelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelState::NotInstalled => "not_installed",
            ModelState::Downloading => "downloading",
            ModelState::Partial => "partial",
            ModelState::Complete => "complete",
            ModelState::Corrupted => "corrupted",
        }
    }
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of one named artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub name: String,
    pub state: ModelState,
    pub total_size: u64,
    pub downloaded_size: u64,
    /// Whole percent in `0..=100`; 100 only when `state == Complete`.
    pub percent: u8,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
    #[serde(default)]
    pub blob_store_path: Option<PathBuf>,
    #[serde(default)]
    pub layers: Vec<LayerStatus>,
}

/// Snapshot of every known artifact, keyed by canonical name.
pub type StatusMap = BTreeMap<String, ModelStatus>;

impl ModelStatus {
    /// An artifact nothing is known about locally.
    pub fn not_installed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ModelState::NotInstalled,
            total_size: 0,
            downloaded_size: 0,
            percent: 0,
            error: None,
            manifest_path: None,
            blob_store_path: None,
            layers: Vec::new(),
        }
    }

    /// An artifact whose manifest could not be parsed or is invalid.
    pub fn corrupted(
        name: impl Into<String>,
        manifest_path: PathBuf,
        blob_store_path: PathBuf,
        error: impl Into<String>,
    ) -> Self {
        Self {
            state: ModelState::Corrupted,
            error: Some(error.into()),
            manifest_path: Some(manifest_path),
            blob_store_path: Some(blob_store_path),
            ..Self::not_installed(name)
        }
    }

    /// Aggregate per-layer observations into a model status.
    ///
    /// `downloaded_size` and `total_size` are sums over the layers, and the
    /// state follows from them: Complete when every layer is complete,
    /// NotInstalled when nothing is on disk, Partial otherwise.
    pub fn from_layers(
        name: impl Into<String>,
        manifest_path: PathBuf,
        blob_store_path: PathBuf,
        layers: Vec<LayerStatus>,
    ) -> Self {
        let total_size = layers
            .iter()
            .fold(0u64, |sum, l| sum.saturating_add(l.expected_size));
        let downloaded_size = layers
            .iter()
            .fold(0u64, |sum, l| sum.saturating_add(l.observed_size));
        let all_complete = layers.iter().all(|l| l.complete);

        let state = if all_complete && downloaded_size == total_size {
            ModelState::Complete
        } else if downloaded_size > 0 {
            ModelState::Partial
        } else {
            ModelState::NotInstalled
        };

        Self {
            name: name.into(),
            state,
            total_size,
            downloaded_size,
            percent: percent_of(downloaded_size, total_size, state == ModelState::Complete),
            error: None,
            manifest_path: Some(manifest_path),
            blob_store_path: Some(blob_store_path),
            layers,
        }
    }

    /// Mark this status corrupted with a reason, keeping its layer data.
    pub fn into_corrupted(mut self, error: impl Into<String>) -> Self {
        self.state = ModelState::Corrupted;
        self.error = Some(error.into());
        self.percent = percent_of(self.downloaded_size, self.total_size, false);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.state == ModelState::Complete
    }

    /// Layers whose blob is missing or does not match its declared size.
    pub fn incomplete_layers(&self) -> impl Iterator<Item = &LayerStatus> {
        self.layers.iter().filter(|l| !l.complete)
    }
}

/// Whole-percent progress.
///
/// Complete artifacts are always 100; anything else is capped at 99 so that
/// an oversized or not-yet-verified blob never reads as finished.
pub fn percent_of(done: u64, total: u64, complete: bool) -> u8 {
    if complete {
        return 100;
    }
    if total == 0 {
        return 0;
    }
    let pct = (u128::from(done) * 100 / u128::from(total)).min(99);
    pct as u8
}
