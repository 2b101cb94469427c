//! State reconciliation.
//!
//! Merges three sources into one status per artifact, highest precedence
//! first:
//!
//! 1. an active transfer in the orchestrator reports Downloading with live
//!    byte counts
//! 2. the serving process listing the artifact as installed reports Complete
//! 3. otherwise the blob store scan decides
//!
//! Catalog names always appear, as NotInstalled when nothing else is known.

mod list;

pub use list::build_list;

use crate::catalog::Catalog;
use crate::download::DownloadOrchestrator;
use crate::models::{DownloadProgress, ModelState, ModelStatus, StatusMap};
use crate::store::BlobStoreScanner;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Owns the unified status map.
///
/// Every refresh builds a new map and swaps it in, so a snapshot held by a
/// reader is never modified underneath it.
pub struct StateReconciler {
    catalog: Arc<Catalog>,
    scanner: BlobStoreScanner,
    orchestrator: DownloadOrchestrator,
    live_timeout: Duration,
    snapshot: RwLock<Arc<StatusMap>>,
}

impl StateReconciler {
    pub fn new(
        catalog: Arc<Catalog>,
        scanner: BlobStoreScanner,
        orchestrator: DownloadOrchestrator,
        live_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            scanner,
            orchestrator,
            live_timeout,
            snapshot: RwLock::new(Arc::new(StatusMap::new())),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Rebuild the status map from all sources.
    ///
    /// Never fails: an unreachable serving process or an unreadable store
    /// only narrows what is known.
    pub async fn refresh(&self) -> Arc<StatusMap> {
        let scanned = self.scan().await;
        let live = self.live_names().await;
        let active: HashMap<String, DownloadProgress> = self
            .orchestrator
            .all_progress()
            .await
            .into_iter()
            .filter(|p| p.state.is_active())
            .map(|p| (p.name.clone(), p))
            .collect();

        let merged = Arc::new(merge(
            &self.catalog,
            scanned,
            live.as_ref(),
            &active,
        ));
        debug!(
            "Reconciled {} artifacts ({} active, live catalog {})",
            merged.len(),
            active.len(),
            if live.is_some() { "available" } else { "unavailable" }
        );

        *self.snapshot.write().await = merged.clone();
        merged
    }

    /// The map produced by the last refresh.
    pub async fn snapshot(&self) -> Arc<StatusMap> {
        self.snapshot.read().await.clone()
    }

    /// Status of one artifact in the last snapshot.
    pub async fn status(&self, name: &str) -> Option<ModelStatus> {
        let name = crate::store::canonical_name(name);
        self.snapshot.read().await.get(&name).cloned()
    }

    /// Drop `name` from the current snapshot after it was cleaned.
    ///
    /// Catalog entries come back as NotInstalled on the next refresh.
    pub async fn forget(&self, name: &str) -> bool {
        let name = crate::store::canonical_name(name);
        let mut snapshot = self.snapshot.write().await;
        if !snapshot.contains_key(&name) {
            return false;
        }
        let mut next = StatusMap::clone(&snapshot);
        next.remove(&name);
        *snapshot = Arc::new(next);
        info!("Forgot {}", name);
        true
    }

    async fn scan(&self) -> StatusMap {
        let scanner = self.scanner.clone();
        match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(Ok(map)) => map,
            Ok(Err(e)) => {
                error!("Store scan failed, continuing without local data: {}", e);
                StatusMap::new()
            }
            Err(e) => {
                error!("Store scan task failed: {}", e);
                StatusMap::new()
            }
        }
    }

    async fn live_names(&self) -> Option<HashSet<String>> {
        match tokio::time::timeout(self.live_timeout, self.orchestrator.installed_names()).await {
            Ok(Ok(names)) => Some(
                names
                    .iter()
                    .map(|n| crate::store::canonical_name(n))
                    .collect(),
            ),
            Ok(Err(e)) => {
                warn!("Serving process unavailable, using local data only: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Serving process did not answer within {:?}, using local data only",
                    self.live_timeout
                );
                None
            }
        }
    }
}

/// Merge the three sources by precedence.
fn merge(
    catalog: &Catalog,
    mut scanned: StatusMap,
    live: Option<&HashSet<String>>,
    active: &HashMap<String, DownloadProgress>,
) -> StatusMap {
    let mut names: BTreeSet<String> = catalog.names().map(str::to_string).collect();
    names.extend(scanned.keys().cloned());
    names.extend(active.keys().cloned());
    if let Some(live) = live {
        names.extend(live.iter().cloned());
    }

    names
        .into_iter()
        .map(|name| {
            let scan = scanned.remove(&name);
            let status = if let Some(progress) = active.get(&name) {
                downloading(&name, scan, progress)
            } else if live.is_some_and(|live| live.contains(&name)) {
                installed(&name, scan)
            } else {
                scan.unwrap_or_else(|| ModelStatus::not_installed(name.clone()))
            };
            (name, status)
        })
        .collect()
}

fn downloading(name: &str, scan: Option<ModelStatus>, progress: &DownloadProgress) -> ModelStatus {
    let base = scan.unwrap_or_else(|| ModelStatus::not_installed(name));
    ModelStatus {
        state: ModelState::Downloading,
        total_size: progress.total_bytes,
        downloaded_size: progress.current_bytes,
        percent: progress.percent.min(99),
        error: None,
        // Disk layers lag the live counts; they would contradict the totals.
        layers: Vec::new(),
        ..base
    }
}

fn installed(name: &str, scan: Option<ModelStatus>) -> ModelStatus {
    match scan {
        Some(status) if status.is_complete() => status,
        other => ModelStatus {
            state: ModelState::Complete,
            percent: 100,
            manifest_path: other.as_ref().and_then(|s| s.manifest_path.clone()),
            blob_store_path: other.and_then(|s| s.blob_store_path),
            ..ModelStatus::not_installed(name)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::models::{LayerStatus, TransferState};
    use std::path::PathBuf;

    fn partial(name: &str) -> ModelStatus {
        ModelStatus::from_layers(
            name,
            PathBuf::from("/m"),
            PathBuf::from("/b"),
            vec![LayerStatus::observe("sha256:a", None, 100, Some(40), None)],
        )
    }

    fn active(name: &str, current: u64, total: u64, percent: u8) -> HashMap<String, DownloadProgress> {
        let mut progress = DownloadProgress::queued(name);
        progress.state = TransferState::Downloading;
        progress.current_bytes = current;
        progress.total_bytes = total;
        progress.percent = percent;
        HashMap::from([(name.to_string(), progress)])
    }

    #[test]
    fn test_active_transfer_beats_disk_and_live() {
        let scanned = StatusMap::from([("x:latest".to_string(), partial("x:latest"))]);
        let live = HashSet::from(["x:latest".to_string()]);
        let merged = merge(
            &Catalog::empty(),
            scanned,
            Some(&live),
            &active("x:latest", 70, 100, 70),
        );
        let status = &merged["x:latest"];
        assert_eq!(status.state, ModelState::Downloading);
        assert_eq!(status.downloaded_size, 70);
        assert_eq!(status.percent, 70);
        assert!(status.layers.is_empty());
        assert_eq!(status.manifest_path, Some(PathBuf::from("/m")));
    }

    #[test]
    fn test_live_installed_without_manifest_is_complete_with_zero_sizes() {
        let live = HashSet::from(["y:latest".to_string()]);
        let merged = merge(&Catalog::empty(), StatusMap::new(), Some(&live), &HashMap::new());
        let status = &merged["y:latest"];
        assert_eq!(status.state, ModelState::Complete);
        assert_eq!(status.percent, 100);
        assert_eq!(status.total_size, 0);
        assert_eq!(status.downloaded_size, 0);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_live_unavailable_falls_back_to_scan() {
        let scanned = StatusMap::from([("x:latest".to_string(), partial("x:latest"))]);
        let merged = merge(&Catalog::empty(), scanned, None, &HashMap::new());
        assert_eq!(merged["x:latest"].state, ModelState::Partial);
        assert_eq!(merged["x:latest"].percent, 40);
    }

    #[test]
    fn test_catalog_names_always_present() {
        let catalog = Catalog::from_entries([CatalogEntry {
            name: "phi3:mini".into(),
            display_name: "Phi-3 Mini".into(),
            size_label: String::new(),
            memory_label: String::new(),
            section: None,
        }])
        .unwrap();
        let merged = merge(&catalog, StatusMap::new(), None, &HashMap::new());
        assert_eq!(merged["phi3:mini"].state, ModelState::NotInstalled);
    }

    #[test]
    fn test_live_percent_capped_below_complete() {
        let merged = merge(
            &Catalog::empty(),
            StatusMap::new(),
            None,
            &active("z:latest", 100, 100, 100),
        );
        assert_eq!(merged["z:latest"].percent, 99);
    }
}
