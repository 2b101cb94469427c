//! Blob store scanner.
//!
//! Walks the manifest tree, parses each manifest and stats every referenced
//! blob to derive a per-artifact [`ModelStatus`]. Purely local and read-only,
//! so it is safe to run while transfers are writing into the store. All I/O
//! here is blocking; async callers go through `spawn_blocking`.

use super::layout::StoreLayout;
use super::manifest::Manifest;
use super::naming::ModelName;
use crate::error::{KeeperError, Result};
use crate::models::{LayerStatus, ModelState, ModelStatus, StatusMap};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const HASH_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Derives artifact completeness from the on-disk manifest/blob layout.
#[derive(Debug, Clone)]
pub struct BlobStoreScanner {
    layout: StoreLayout,
}

impl BlobStoreScanner {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Scan every manifest under the manifests root.
    ///
    /// A manifest that cannot be read or parsed yields a Corrupted entry and
    /// the scan moves on. A missing manifests root is an empty store. Only a
    /// root that exists but is not a directory fails the whole scan.
    pub fn scan(&self) -> Result<StatusMap> {
        let root = self.layout.manifests_dir();
        let mut statuses = StatusMap::new();

        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(KeeperError::Config {
                    message: format!("manifest root {} is not a directory", root.display()),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Manifest root {} does not exist yet", root.display());
                return Ok(statuses);
            }
            Err(e) => return Err(KeeperError::io_with_path(e, &root)),
        }

        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable manifest tree entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_hidden(entry.path()) {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let Some(name) = ModelName::from_manifest_path(relative) else {
                debug!("Ignoring stray file in manifest tree: {}", relative.display());
                continue;
            };

            let status = self.scan_manifest(&name, entry.path());
            statuses.insert(status.name.clone(), status);
        }

        let corrupted = statuses
            .values()
            .filter(|s| s.state == ModelState::Corrupted)
            .count();
        info!(
            "Scanned {} manifests ({} corrupted) under {}",
            statuses.len(),
            corrupted,
            root.display()
        );
        Ok(statuses)
    }

    /// Status of a single artifact; NotInstalled when it has no manifest.
    pub fn status_of(&self, name: &str) -> Result<ModelStatus> {
        let name = ModelName::parse(name)?;
        let path = self.layout.manifest_path(&name);
        if !path.is_file() {
            return Ok(ModelStatus::not_installed(name.to_string()));
        }
        Ok(self.scan_manifest(&name, &path))
    }

    /// Scan one artifact and hash every complete blob.
    ///
    /// A blob whose content does not match its digest turns the artifact
    /// Corrupted and the layer is reported incomplete, so a later clean will
    /// remove it.
    pub fn verify(&self, name: &str) -> Result<ModelStatus> {
        let mut status = self.status_of(name)?;
        if status.state == ModelState::Corrupted {
            return Ok(status);
        }

        let mut mismatches = Vec::new();
        for layer in status.layers.iter_mut().filter(|l| l.complete) {
            let Some(expected) = layer.digest.strip_prefix("sha256:") else {
                debug!("Skipping verification of non-sha256 layer {}", layer.digest);
                continue;
            };
            let Some(path) = self.layout.blob_path(&layer.digest) else {
                continue;
            };
            let actual = sha256_file(&path)?;
            if !actual.eq_ignore_ascii_case(expected) {
                warn!("Digest mismatch for {}: got sha256:{}", layer.digest, actual);
                layer.complete = false;
                mismatches.push(layer.digest.clone());
            }
        }

        if !mismatches.is_empty() {
            status = status.into_corrupted(format!(
                "content does not match digest for {}",
                mismatches.join(", ")
            ));
        }
        Ok(status)
    }

    /// Derive the status of one manifest file.
    fn scan_manifest(&self, name: &ModelName, path: &Path) -> ModelStatus {
        let canonical = name.to_string();
        let blobs_dir = self.layout.blobs_dir();

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read manifest {}: {}", path.display(), e);
                return ModelStatus::corrupted(
                    canonical,
                    path.to_path_buf(),
                    blobs_dir,
                    format!("unreadable manifest: {}", e),
                );
            }
        };

        let manifest = match Manifest::parse(&bytes) {
            Ok(manifest) => manifest,
            Err(reason) => {
                warn!("Corrupted manifest {}: {}", path.display(), reason);
                return ModelStatus::corrupted(canonical, path.to_path_buf(), blobs_dir, reason);
            }
        };

        let layers = manifest
            .layers
            .iter()
            .map(|layer| {
                let blob_len = self
                    .layout
                    .blob_path(&layer.digest)
                    .and_then(|p| file_len(&p));
                let partial_len = if blob_len.is_none() {
                    self.layout
                        .partial_path(&layer.digest)
                        .and_then(|p| file_len(&p))
                } else {
                    None
                };
                LayerStatus::observe(
                    layer.digest.clone(),
                    layer.media_type.clone(),
                    layer.size,
                    blob_len,
                    partial_len,
                )
            })
            .collect();

        let status = ModelStatus::from_layers(canonical, path.to_path_buf(), blobs_dir, layers);
        debug!(
            "{}: {} ({}/{} bytes)",
            status.name, status.state, status.downloaded_size, status.total_size
        );
        status
    }
}

/// Length of a regular file, `None` if it is absent or not a file.
fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| KeeperError::io_with_path(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| KeeperError::io_with_path(e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
