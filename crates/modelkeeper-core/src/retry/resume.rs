//! Pulling with retries, and resuming partial artifacts.
//!
//! Resume never continues a byte stream. It removes the incomplete layers of
//! an artifact and issues a full pull again; layers that are already complete
//! are content-addressed, so the serving process skips them.

use super::{retry_async, RetryConfig, RetryStats};
use crate::cancel::CancellationToken;
use crate::download::DownloadOrchestrator;
use crate::error::{KeeperError, Result};
use crate::models::ModelState;
use crate::store::{CleanReport, StoreCleaner};
use tracing::{debug, info, warn};

/// Pull `name`, retrying retryable failures with capped backoff.
///
/// Before every retry the incomplete layers left by the failed attempt are
/// removed. A fatal failure is returned as-is after one attempt; running out
/// of attempts returns [`KeeperError::RetriesExhausted`] wrapping the last
/// error.
///
/// Cancelling `cancel` stops the loop at any point: between attempts it ends
/// the backoff, during an attempt it cancels the running transfer. Either way
/// the result is [`KeeperError::Cancelled`].
pub async fn pull_with_retry(
    orchestrator: &DownloadOrchestrator,
    cleaner: &StoreCleaner,
    name: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<RetryStats> {
    let (result, stats) = retry_async(
        config,
        cancel,
        |attempt| async move {
            if cancel.is_cancelled() {
                return Err(cancelled(name));
            }
            if attempt > 1 {
                clean_incomplete_logged(cleaner, name).await;
            }
            if let Err(e) = orchestrator.start(name).await {
                return Err(e);
            }
            // A cancel that raced the start found no record to settle.
            if cancel.is_cancelled() {
                if let Err(e) = orchestrator.cancel(name).await {
                    debug!("Transfer for {} finished before cancel: {}", name, e);
                }
            }
            orchestrator.wait(name).await
        },
        KeeperError::is_retryable,
    )
    .await;

    if stats.cancelled {
        info!("Stopped retrying {} after {} attempt(s)", name, stats.attempts);
        return Err(cancelled(name));
    }

    match result {
        Ok(()) => {
            info!("Pulled {} in {} attempt(s)", name, stats.attempts);
            Ok(stats)
        }
        Err(e) if e.is_retryable() => Err(KeeperError::RetriesExhausted {
            name: crate::store::canonical_name(name),
            attempts: stats.attempts,
            last: Box::new(e),
        }),
        Err(e) => Err(e),
    }
}

/// Resume a Partial (or Corrupted) artifact.
///
/// Complete artifacts are left alone. Anything else has its incomplete layers
/// removed and is pulled again under the retry policy.
pub async fn resume(
    orchestrator: &DownloadOrchestrator,
    cleaner: &StoreCleaner,
    name: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<RetryStats> {
    let status = {
        let cleaner = cleaner.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || cleaner.scanner().status_of(&name))
            .await
            .map_err(|e| KeeperError::Other(format!("status task failed: {}", e)))??
    };

    if status.state == ModelState::Complete {
        info!("{} is already complete; nothing to resume", status.name);
        return Ok(RetryStats {
            success: true,
            ..RetryStats::default()
        });
    }

    let report = clean_incomplete(cleaner, name).await?;
    info!(
        "Resuming {} ({}): removed {} incomplete files",
        status.name,
        status.state,
        report.removed_files.len()
    );
    pull_with_retry(orchestrator, cleaner, name, config, cancel).await
}

fn cancelled(name: &str) -> KeeperError {
    KeeperError::Cancelled {
        name: crate::store::canonical_name(name),
    }
}

async fn clean_incomplete(cleaner: &StoreCleaner, name: &str) -> Result<CleanReport> {
    let cleaner = cleaner.clone();
    let name = name.to_string();
    tokio::task::spawn_blocking(move || cleaner.clean_incomplete(&name))
        .await
        .map_err(|e| KeeperError::Other(format!("cleanup task failed: {}", e)))?
}

/// Cleanup before a retry is best effort: the pull itself rewrites the layers.
async fn clean_incomplete_logged(cleaner: &StoreCleaner, name: &str) {
    if let Err(e) = clean_incomplete(cleaner, name).await {
        warn!("Could not clean incomplete layers of {}: {}", name, e);
    }
}
