//! Paths inside the models root.

use super::naming::ModelName;
use crate::config::PathsConfig;
use std::path::{Path, PathBuf};

/// Resolves manifest and blob paths under one models root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::MANIFESTS_DIR_NAME)
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::BLOBS_DIR_NAME)
    }

    pub fn manifest_path(&self, name: &ModelName) -> PathBuf {
        self.manifests_dir().join(name.manifest_relative_path())
    }

    /// Final blob path for `digest`, or `None` if the digest is malformed.
    pub fn blob_path(&self, digest: &str) -> Option<PathBuf> {
        blob_file_name(digest).map(|file| self.blobs_dir().join(file))
    }

    /// Path of the in-flight data file for `digest`.
    pub fn partial_path(&self, digest: &str) -> Option<PathBuf> {
        blob_file_name(digest)
            .map(|file| self.blobs_dir().join(format!("{}{}", file, PathsConfig::PARTIAL_SUFFIX)))
    }
}

/// Filesystem-safe file name for a digest: `sha256:ab12..` -> `sha256-ab12..`.
///
/// Accepts either separator on input. Returns `None` unless the digest is
/// `<algorithm>:<hex>` with an alphanumeric algorithm and a hex body.
pub fn blob_file_name(digest: &str) -> Option<String> {
    let (algorithm, hex) = digest.split_once(':').or_else(|| digest.split_once('-'))?;
    let algorithm_ok =
        !algorithm.is_empty() && algorithm.chars().all(|c| c.is_ascii_alphanumeric());
    let hex_ok = !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    if algorithm_ok && hex_ok {
        Some(format!("{}-{}", algorithm, hex.to_ascii_lowercase()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_file_name() {
        assert_eq!(blob_file_name("sha256:ABcd01").as_deref(), Some("sha256-abcd01"));
        assert_eq!(blob_file_name("sha256-abcd01").as_deref(), Some("sha256-abcd01"));
        assert_eq!(blob_file_name("sha256:"), None);
        assert_eq!(blob_file_name("sha256:../../x"), None);
        assert_eq!(blob_file_name("nodigest"), None);
    }

    #[test]
    fn test_paths() {
        let layout = StoreLayout::new("/models");
        let name = ModelName::parse("llama3").unwrap();
        assert_eq!(
            layout.manifest_path(&name),
            PathBuf::from("/models/manifests/registry.ollama.ai/library/llama3/latest")
        );
        assert_eq!(
            layout.blob_path("sha256:ff").unwrap(),
            PathBuf::from("/models/blobs/sha256-ff")
        );
        assert_eq!(
            layout.partial_path("sha256:ff").unwrap(),
            PathBuf::from("/models/blobs/sha256-ff-partial")
        );
    }
}
