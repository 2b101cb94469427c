//! Removal of incomplete artifacts from the store.

use super::layout::StoreLayout;
use super::naming::ModelName;
use super::scanner::BlobStoreScanner;
use crate::error::{KeeperError, Result};
use crate::models::{ModelState, ModelStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a clean pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanReport {
    pub name: String,
    pub removed_files: Vec<PathBuf>,
    pub freed_bytes: u64,
    pub manifest_removed: bool,
}

/// Deletes manifests and incomplete blobs.
///
/// Complete blobs are never touched: they are content-addressed and may be
/// shared with other artifacts.
#[derive(Debug, Clone)]
pub struct StoreCleaner {
    layout: StoreLayout,
    scanner: BlobStoreScanner,
}

impl StoreCleaner {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            scanner: BlobStoreScanner::new(layout.clone()),
            layout,
        }
    }

    pub fn scanner(&self) -> &BlobStoreScanner {
        &self.scanner
    }

    /// Remove the manifest of `name` together with its incomplete blobs.
    ///
    /// Refuses to clean a Complete artifact; removing an installed artifact
    /// goes through the serving process instead.
    pub fn clean(&self, name: &str) -> Result<CleanReport> {
        let model = ModelName::parse(name)?;
        let status = self.scanner.status_of(name)?;
        if status.state == ModelState::Complete {
            return Err(KeeperError::Other(format!(
                "{} is complete; remove it through the serving process",
                status.name
            )));
        }

        let mut report = self.remove_incomplete(&status)?;

        let manifest = self.layout.manifest_path(&model);
        if let Some(len) = remove_if_present(&manifest)? {
            report.removed_files.push(manifest.clone());
            report.freed_bytes += len;
            report.manifest_removed = true;
            self.prune_empty_parents(&manifest);
        }

        info!(
            "Cleaned {}: {} files, {} bytes",
            report.name,
            report.removed_files.len(),
            report.freed_bytes
        );
        Ok(report)
    }

    /// Remove only the incomplete blobs and partial files of `name`.
    ///
    /// The manifest and every complete layer stay in place, so a following
    /// pull only refetches what is missing.
    pub fn clean_incomplete(&self, name: &str) -> Result<CleanReport> {
        let status = self.scanner.status_of(name)?;
        let report = self.remove_incomplete(&status)?;
        debug!(
            "Removed {} incomplete files of {}",
            report.removed_files.len(),
            report.name
        );
        Ok(report)
    }

    fn remove_incomplete(&self, status: &ModelStatus) -> Result<CleanReport> {
        let mut report = CleanReport {
            name: status.name.clone(),
            ..CleanReport::default()
        };

        for layer in status.incomplete_layers() {
            let candidates = [
                self.layout.blob_path(&layer.digest),
                self.layout.partial_path(&layer.digest),
            ];
            for path in candidates.into_iter().flatten() {
                if let Some(len) = remove_if_present(&path)? {
                    report.removed_files.push(path);
                    report.freed_bytes += len;
                }
            }
        }
        Ok(report)
    }

    /// Drop empty `model/` and `namespace/` directories left behind.
    fn prune_empty_parents(&self, manifest: &Path) {
        let root = self.layout.manifests_dir();
        let mut dir = manifest.parent();
        while let Some(current) = dir {
            if current == root || !current.starts_with(&root) {
                break;
            }
            // Only succeeds if empty.
            if std::fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// Delete a regular file, returning its size, or `None` if it was absent.
fn remove_if_present(path: &Path) -> Result<Option<u64>> {
    let len = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            warn!("Not removing non-file {}", path.display());
            return Ok(None);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(KeeperError::io_with_path(e, path)),
    };
    match std::fs::remove_file(path) {
        Ok(()) => Ok(Some(len)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KeeperError::io_with_path(e, path)),
    }
}
