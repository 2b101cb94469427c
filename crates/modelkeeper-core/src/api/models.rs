//! Status, listing and store maintenance.

use std::sync::Arc;

use crate::error::{KeeperError, Result};
use crate::models::{ListItem, ModelStatus, StatusMap};
use crate::reconcile::build_list;
use crate::store::CleanReport;
use crate::KeeperApi;

impl KeeperApi {
    /// Reconcile all sources and return the new snapshot.
    pub async fn refresh(&self) -> Arc<StatusMap> {
        self.reconciler.refresh().await
    }

    /// The last reconciled snapshot.
    pub async fn snapshot(&self) -> Arc<StatusMap> {
        self.reconciler.snapshot().await
    }

    /// Refresh and group the result into list rows.
    pub async fn list(&self) -> Vec<ListItem> {
        let snapshot = self.refresh().await;
        build_list(&snapshot, &self.catalog)
    }

    /// Reconciled status of one artifact from a fresh refresh.
    pub async fn status(&self, name: &str) -> Result<ModelStatus> {
        let canonical = crate::store::ModelName::parse(name)?.to_string();
        let snapshot = self.refresh().await;
        Ok(snapshot
            .get(&canonical)
            .cloned()
            .unwrap_or_else(|| ModelStatus::not_installed(canonical)))
    }

    /// Hash every complete blob of `name` against its digest.
    pub async fn verify(&self, name: &str) -> Result<ModelStatus> {
        let scanner = self.scanner.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || scanner.verify(&name))
            .await
            .map_err(|e| KeeperError::Other(format!("verify task failed: {}", e)))?
    }

    /// Remove the manifest and incomplete blobs of a Partial or Corrupted
    /// artifact and drop it from the snapshot.
    pub async fn clean(&self, name: &str) -> Result<CleanReport> {
        if let Some(progress) = self.orchestrator.progress(name).await {
            if progress.state.is_active() {
                return Err(KeeperError::AlreadyInProgress {
                    name: progress.name,
                });
            }
        }

        let cleaner = self.cleaner.clone();
        let owned = name.to_string();
        let report = tokio::task::spawn_blocking(move || cleaner.clean(&owned))
            .await
            .map_err(|e| KeeperError::Other(format!("clean task failed: {}", e)))??;
        self.reconciler.forget(&report.name).await;
        Ok(report)
    }

    /// Ask the serving process to delete an installed artifact.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let canonical = crate::store::ModelName::parse(name)?.to_string();
        self.client.delete_model(&canonical).await?;
        self.reconciler.forget(&canonical).await;
        Ok(())
    }
}
