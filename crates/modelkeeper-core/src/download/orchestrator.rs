//! One transfer per artifact, with live progress.

use super::parser::{ProgressEvent, ProgressParser};
use super::speed::{eta_seconds, SpeedSampler};
use super::transport::PullTransport;
use crate::cancel::CancellationToken;
use crate::config::DownloadConfig;
use crate::error::{ErrorCategory, KeeperError, Result};
use crate::models::{format_eta, format_speed, DownloadProgress, TransferState};
use crate::serving::ServingCatalog;
use crate::store::ModelName;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, trace, warn};

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq)]
enum Finish {
    Completed,
    Failed(ErrorCategory, String),
    Cancelled,
}

struct TransferEntry {
    /// Distinguishes this attempt from earlier ones for the same name, so a
    /// stale task can never write into a fresh record.
    id: u64,
    progress: DownloadProgress,
    cancel: CancellationToken,
    finish: watch::Sender<Option<Finish>>,
}

type TransferMap = Arc<RwLock<HashMap<String, TransferEntry>>>;

/// Drives and observes transfers, at most one per artifact name.
///
/// The map is the only shared mutable state. Structural changes take the
/// write lock; snapshots take the read lock and return copies. Byte-level
/// updates for one transfer come only from the task that owns it.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    transport: Arc<dyn PullTransport>,
    catalog: Arc<dyn ServingCatalog>,
    parser: Arc<ProgressParser>,
    transfers: TransferMap,
    next_id: Arc<AtomicU64>,
}

impl DownloadOrchestrator {
    pub fn new(transport: Arc<dyn PullTransport>, catalog: Arc<dyn ServingCatalog>) -> Self {
        Self::with_parser(transport, catalog, ProgressParser::default())
    }

    pub fn with_parser(
        transport: Arc<dyn PullTransport>,
        catalog: Arc<dyn ServingCatalog>,
        parser: ProgressParser,
    ) -> Self {
        Self {
            transport,
            catalog,
            parser: Arc::new(parser),
            transfers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a Queued record for `name` and start the transfer in the
    /// background. Returns as soon as the record exists.
    pub async fn start(&self, name: &str) -> Result<()> {
        let name = ModelName::parse(name)?.to_string();
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut transfers = self.transfers.write().await;
            if transfers
                .get(&name)
                .is_some_and(|entry| entry.progress.state.is_active())
            {
                return Err(KeeperError::AlreadyInProgress { name });
            }
            let (finish, _) = watch::channel(None);
            transfers.insert(
                name.clone(),
                TransferEntry {
                    id,
                    progress: DownloadProgress::queued(&name),
                    cancel: cancel.clone(),
                    finish,
                },
            );
        }

        info!("Queued transfer for {}", name);

        let transport = self.transport.clone();
        let parser = self.parser.clone();
        let transfers = self.transfers.clone();
        tokio::spawn(async move {
            Self::run_transfer(transport, parser, transfers, name, id, cancel).await;
        });

        Ok(())
    }

    /// Snapshot of the record for `name`, including terminal ones.
    pub async fn progress(&self, name: &str) -> Option<DownloadProgress> {
        let name = crate::store::canonical_name(name);
        let transfers = self.transfers.read().await;
        transfers.get(&name).map(|entry| entry.progress.clone())
    }

    /// Snapshots of every record.
    pub async fn all_progress(&self) -> Vec<DownloadProgress> {
        let transfers = self.transfers.read().await;
        let mut all: Vec<_> = transfers.values().map(|e| e.progress.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Names with a Queued or Downloading transfer.
    pub async fn active_names(&self) -> Vec<String> {
        let transfers = self.transfers.read().await;
        let mut names: Vec<_> = transfers
            .values()
            .filter(|e| e.progress.state.is_active())
            .map(|e| e.progress.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop the active transfer for `name`.
    ///
    /// The record turns Cancelled immediately and stays readable until the
    /// next `start` for the same name.
    pub async fn cancel(&self, name: &str) -> Result<()> {
        let name = crate::store::canonical_name(name);
        let mut transfers = self.transfers.write().await;
        let Some(entry) = transfers.get_mut(&name) else {
            return Err(KeeperError::NotFound { name });
        };
        if !entry.progress.transition(TransferState::Cancelled) {
            return Err(KeeperError::NotFound { name });
        }

        entry.cancel.cancel();
        let progress = &mut entry.progress;
        progress.speed.clear();
        progress.speed_bytes_per_sec = 0.0;
        progress.eta.clear();
        progress.eta_seconds = None;
        progress.last_update = Utc::now();
        entry.finish.send_replace(Some(Finish::Cancelled));

        info!("Cancelled transfer for {}", name);
        Ok(())
    }

    /// Wait until the current transfer for `name` reaches a terminal state.
    ///
    /// Completed maps to `Ok`, Cancelled to [`KeeperError::Cancelled`] and
    /// Failed to a [`KeeperError::Transfer`] carrying the failure category.
    pub async fn wait(&self, name: &str) -> Result<()> {
        let name = crate::store::canonical_name(name);
        let mut finish = {
            let transfers = self.transfers.read().await;
            transfers
                .get(&name)
                .map(|entry| entry.finish.subscribe())
                .ok_or_else(|| KeeperError::NotFound { name: name.clone() })?
        };

        let outcome = match finish.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Finish::Completed) => Ok(()),
            Some(Finish::Cancelled) => Err(KeeperError::Cancelled { name }),
            Some(Finish::Failed(category, message)) => Err(KeeperError::Transfer {
                name,
                category,
                message,
            }),
            None => Err(KeeperError::Other(format!(
                "transfer record for {} was dropped before finishing",
                name
            ))),
        }
    }

    /// Start a transfer and wait for it to finish.
    pub async fn pull(&self, name: &str) -> Result<()> {
        self.start(name).await?;
        self.wait(name).await
    }

    /// Drop every terminal record; returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let mut transfers = self.transfers.write().await;
        let before = transfers.len();
        transfers.retain(|_, entry| !entry.progress.state.is_terminal());
        before - transfers.len()
    }

    /// Names the serving process reports as installed.
    pub async fn installed_names(&self) -> Result<Vec<String>> {
        self.catalog.installed_names().await
    }

    async fn run_transfer(
        transport: Arc<dyn PullTransport>,
        parser: Arc<ProgressParser>,
        transfers: TransferMap,
        name: String,
        id: u64,
        cancel: CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::channel::<String>(DownloadConfig::LINE_BUFFER);
        let mut tally = ProgressTally::new(Instant::now());

        let pull = transport.pull(&name, tx, cancel.clone());
        let consume = async {
            while let Some(line) = rx.recv().await {
                match parser.parse(&line) {
                    Some(event) => {
                        tally.apply(event, now());
                        Self::publish(&transfers, &name, id, &tally).await;
                    }
                    None => trace!("Skipping unparsable line for {}: {:?}", name, line),
                }
            }
        };
        let (result, ()) = tokio::join!(pull, consume);

        let finish = tally.outcome(&name, result, cancel.is_cancelled());
        Self::complete(&transfers, &name, id, &tally, finish).await;
    }

    /// Copy the tally into the record, unless the record moved on.
    async fn publish(transfers: &TransferMap, name: &str, id: u64, tally: &ProgressTally) {
        let mut transfers = transfers.write().await;
        let Some(entry) = transfers.get_mut(name) else {
            return;
        };
        if entry.id != id {
            return;
        }

        let progress = &mut entry.progress;
        let was_queued = progress.state == TransferState::Queued;
        if !progress.transition(TransferState::Downloading) {
            return;
        }
        if was_queued {
            debug!("Transfer for {} is downloading", name);
        }
        progress.current_bytes = tally.current();
        progress.total_bytes = tally.total();
        progress.percent = tally.percent();
        progress.speed_bytes_per_sec = tally.speed;
        progress.speed = format_speed(tally.speed);
        progress.eta_seconds = eta_seconds(tally.current(), tally.total(), tally.speed);
        progress.eta = progress.eta_seconds.map(format_eta).unwrap_or_default();
        if let Some(status) = &tally.status_text {
            progress.status_text = Some(status.clone());
        }
        progress.last_update = Utc::now();
    }

    async fn complete(
        transfers: &TransferMap,
        name: &str,
        id: u64,
        tally: &ProgressTally,
        finish: Finish,
    ) {
        let mut transfers = transfers.write().await;
        let Some(entry) = transfers.get_mut(name) else {
            return;
        };
        let next = match &finish {
            Finish::Completed => TransferState::Completed,
            Finish::Failed(..) => TransferState::Failed,
            Finish::Cancelled => TransferState::Cancelled,
        };
        // A cancel already settled this record; the exit observed afterwards
        // must not turn it into a failure.
        if entry.id != id || !entry.progress.transition(next) {
            return;
        }

        let progress = &mut entry.progress;
        progress.current_bytes = tally.current();
        progress.total_bytes = tally.total();
        progress.speed.clear();
        progress.speed_bytes_per_sec = 0.0;
        progress.eta.clear();
        progress.eta_seconds = None;
        progress.last_update = Utc::now();

        match &finish {
            Finish::Completed => {
                progress.percent = 100;
                progress.current_bytes = progress.total_bytes.max(progress.current_bytes);
                info!("Transfer for {} completed", name);
            }
            Finish::Failed(category, message) => {
                progress.error = Some(message.clone());
                warn!("Transfer for {} failed ({}): {}", name, category, message);
            }
            Finish::Cancelled => {
                info!("Transfer for {} cancelled", name);
            }
        }
        entry.finish.send_replace(Some(finish));
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Running totals for one transfer, owned by its task.
#[derive(Debug)]
struct ProgressTally {
    /// `(completed, total)` per layer key.
    layers: BTreeMap<String, (u64, u64)>,
    percent_hint: Option<f64>,
    status_text: Option<String>,
    success: bool,
    error: Option<(ErrorCategory, String)>,
    sampler: SpeedSampler,
    speed: f64,
}

impl ProgressTally {
    fn new(started: Instant) -> Self {
        Self {
            layers: BTreeMap::new(),
            percent_hint: None,
            status_text: None,
            success: false,
            error: None,
            sampler: SpeedSampler::new(started),
            speed: 0.0,
        }
    }

    fn apply(&mut self, event: ProgressEvent, at: Instant) {
        match event {
            ProgressEvent::Status(text) => self.status_text = Some(text),
            ProgressEvent::Bytes {
                digest,
                completed,
                total,
                status,
            } => {
                let key = digest.unwrap_or_default();
                self.layers.insert(key, (completed.min(total), total));
                if status.is_some() {
                    self.status_text = status;
                }
                self.speed = self.sampler.sample_at(self.current(), at);
            }
            ProgressEvent::Percent(percent) => self.percent_hint = Some(percent),
            ProgressEvent::Success => self.success = true,
            ProgressEvent::Error { category, message } => {
                self.error = Some((category, message));
            }
        }
    }

    fn current(&self) -> u64 {
        self.layers.values().map(|(done, _)| done).sum()
    }

    fn total(&self) -> u64 {
        self.layers.values().map(|(_, total)| total).sum()
    }

    /// In-flight percent; 100 is reserved for a Completed record.
    fn percent(&self) -> u8 {
        let total = self.total();
        let raw = if total > 0 {
            (self.current().saturating_mul(100) / total) as f64
        } else {
            self.percent_hint.unwrap_or(0.0)
        };
        raw.clamp(0.0, 99.0) as u8
    }

    /// Decide how the transfer ended.
    ///
    /// Cancellation wins over everything, then the success marker, then an
    /// error reported in the stream, then the transport's own result.
    fn outcome(&self, name: &str, result: Result<()>, cancelled: bool) -> Finish {
        if cancelled || matches!(result, Err(KeeperError::Cancelled { .. })) {
            return Finish::Cancelled;
        }
        if self.success {
            return Finish::Completed;
        }
        if let Some((category, message)) = &self.error {
            return Finish::Failed(*category, message.clone());
        }
        match result {
            Ok(()) => Finish::Completed,
            Err(KeeperError::Transfer {
                category, message, ..
            }) => Finish::Failed(category, message),
            Err(e) => {
                debug!("Transfer for {} ended with {:?}", name, e);
                Finish::Failed(e.category().unwrap_or(ErrorCategory::Other), e.to_string())
            }
        }
    }
}
