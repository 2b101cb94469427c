//! Builder for configuring KeeperApi initialization.

use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::{KeeperConfig, TransferMode};
use crate::download::{CliPullTransport, DownloadOrchestrator, HttpPullTransport, PullTransport};
use crate::error::{KeeperError, Result};
use crate::reconcile::StateReconciler;
use crate::retry::RetryConfig;
use crate::serving::{ServingCatalog, ServingClient};
use crate::store::{BlobStoreScanner, StoreCleaner, StoreLayout};
use crate::KeeperApi;

/// Builder for configuring KeeperApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use modelkeeper_core::KeeperApi;
///
/// let api = KeeperApi::builder()
///     .models_root("/srv/ollama/models")
///     .base_url("http://10.0.0.5:11434")
///     .build()?;
/// ```
pub struct KeeperApiBuilder {
    config: KeeperConfig,
    catalog: Option<Catalog>,
    transport: Option<Arc<dyn PullTransport>>,
    serving_catalog: Option<Arc<dyn ServingCatalog>>,
    create_root: bool,
}

impl KeeperApiBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::from_config(KeeperConfig::default())
    }

    pub fn from_config(config: KeeperConfig) -> Self {
        Self {
            config,
            catalog: None,
            transport: None,
            serving_catalog: None,
            create_root: false,
        }
    }

    pub fn models_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.models_root = root.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn transfer_mode(mut self, mode: TransferMode) -> Self {
        self.config.transfer_mode = mode;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Use this catalog instead of the configured file or the built-in list.
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Override how transfers are driven.
    pub fn transport(mut self, transport: Arc<dyn PullTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override where the live "installed" list comes from.
    pub fn serving_catalog(mut self, catalog: Arc<dyn ServingCatalog>) -> Self {
        self.serving_catalog = Some(catalog);
        self
    }

    /// Create the models root if it does not exist.
    ///
    /// Default: `false` (a missing root reads as an empty store)
    pub fn create_root(mut self, enable: bool) -> Self {
        self.create_root = enable;
        self
    }

    /// Build the KeeperApi instance.
    pub fn build(self) -> Result<KeeperApi> {
        let config = self.config;

        if self.create_root && !config.models_root.exists() {
            std::fs::create_dir_all(&config.models_root).map_err(|e| KeeperError::Io {
                message: format!(
                    "Failed to create models root: {}",
                    config.models_root.display()
                ),
                path: Some(config.models_root.clone()),
                source: Some(e),
            })?;
        }

        let catalog = match (self.catalog, &config.catalog_path) {
            (Some(catalog), _) => catalog,
            (None, Some(path)) => Catalog::load(path)?,
            (None, None) => Catalog::builtin(),
        };
        let catalog = Arc::new(catalog);

        let client = ServingClient::new(Some(&config.base_url))?;
        let transport: Arc<dyn PullTransport> = match self.transport {
            Some(transport) => transport,
            None => match config.transfer_mode {
                TransferMode::Http => Arc::new(HttpPullTransport::new(client.clone())),
                TransferMode::Cli => Arc::new(CliPullTransport::new(config.cli_program.clone())),
            },
        };
        let serving_catalog: Arc<dyn ServingCatalog> = match self.serving_catalog {
            Some(catalog) => catalog,
            None => Arc::new(client.clone()),
        };

        let layout = StoreLayout::new(&config.models_root);
        let scanner = BlobStoreScanner::new(layout.clone());
        let cleaner = StoreCleaner::new(layout);
        let orchestrator = DownloadOrchestrator::new(transport, serving_catalog);
        let reconciler = StateReconciler::new(
            catalog.clone(),
            scanner.clone(),
            orchestrator.clone(),
            config.catalog_timeout,
        );

        tracing::debug!(
            "KeeperApi ready: root={}, serving={}, mode={:?}",
            config.models_root.display(),
            config.base_url,
            config.transfer_mode
        );

        Ok(KeeperApi {
            config,
            catalog,
            client,
            scanner,
            cleaner,
            orchestrator,
            reconciler,
            retries: Default::default(),
        })
    }
}

impl Default for KeeperApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}
