//! Serving-process HTTP API.
//!
//! The serving process is the ground truth for which artifacts are usable
//! right now. [`ServingClient`] wraps its REST API; [`ServingCatalog`] is the
//! narrow seam the orchestrator and reconciler depend on, so tests can swap
//! in a fake.

mod client;
mod lines;

pub use client::{InstalledModel, PullStream, ServingClient};
pub use lines::LineBuffer;

use crate::error::Result;
use async_trait::async_trait;

/// Source of the live "installed" list.
#[async_trait]
pub trait ServingCatalog: Send + Sync {
    /// Canonical names of the artifacts the serving process reports ready.
    async fn installed_names(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl ServingCatalog for ServingClient {
    async fn installed_names(&self) -> Result<Vec<String>> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .map(|m| crate::store::canonical_name(&m.name))
            .collect())
    }
}
