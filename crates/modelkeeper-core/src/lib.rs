//! ModelKeeper Core - Headless library tracking local model artifacts.
//!
//! Artifacts are fetched by a separate serving process and stored as a
//! manifest plus content-addressed blobs. This crate answers "what is the
//! state of each artifact" by reconciling three sources: a static catalog,
//! the serving process's live list, and the on-disk manifest/blob layout. It
//! also drives transfers with live progress, retries and resume.
//!
//! # Example
//!
//! ```rust,ignore
//! use modelkeeper_core::KeeperApi;
//!
//! #[tokio::main]
//! async fn main() -> modelkeeper_core::Result<()> {
//!     let api = KeeperApi::builder().build()?;
//!
//!     for (name, status) in api.refresh().await.iter() {
//!         println!("{name}: {} ({}%)", status.state, status.percent);
//!     }
//!
//!     api.pull("llama3.2:3b").await?;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod retry;
pub mod serving;
pub mod store;

mod api;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use catalog::{Catalog, CatalogEntry};
pub use config::{KeeperConfig, TransferMode};
pub use download::{DownloadOrchestrator, PullTransport};
pub use error::{ErrorCategory, KeeperError, Result};
pub use models::{
    format_bytes, DownloadProgress, LayerStatus, ListItem, ModelState, ModelStatus, StatusMap,
    TransferState,
};
pub use reconcile::{build_list, StateReconciler};
pub use retry::{pull_with_retry, resume, RetryConfig, RetryStats};
pub use serving::{ServingCatalog, ServingClient};
pub use store::{BlobStoreScanner, CleanReport, ModelName, StoreCleaner, StoreLayout};

pub use api::KeeperApiBuilder;

use std::sync::Arc;

/// Main API struct for ModelKeeper operations.
///
/// Owns one of each component, wired to the same models root and serving
/// process. Methods live in the `api` submodules.
pub struct KeeperApi {
    config: KeeperConfig,
    catalog: Arc<Catalog>,
    client: ServingClient,
    scanner: BlobStoreScanner,
    cleaner: StoreCleaner,
    orchestrator: DownloadOrchestrator,
    reconciler: StateReconciler,
    retries: api::RetryTokens,
}

impl KeeperApi {
    /// Create a builder with the default configuration.
    pub fn builder() -> KeeperApiBuilder {
        KeeperApiBuilder::new()
    }

    /// Create an instance from a loaded configuration.
    pub fn new(config: KeeperConfig) -> Result<Self> {
        KeeperApiBuilder::from_config(config).build()
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn orchestrator(&self) -> &DownloadOrchestrator {
        &self.orchestrator
    }

    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }

    pub fn scanner(&self) -> &BlobStoreScanner {
        &self.scanner
    }
}
