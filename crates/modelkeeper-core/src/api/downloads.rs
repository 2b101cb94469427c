//! Transfers: start, observe, cancel, retry and resume.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cancel::CancellationToken;
use crate::error::{KeeperError, Result};
use crate::models::DownloadProgress;
use crate::retry::{self, RetryStats};
use crate::KeeperApi;

/// Tokens of the retry loops currently running, by canonical name.
pub(crate) type RetryTokens = Mutex<HashMap<String, CancellationToken>>;

/// Removes a retry token when its loop ends or is dropped.
struct RetryGuard<'a> {
    tokens: &'a RetryTokens,
    name: String,
    cancel: CancellationToken,
}

impl Drop for RetryGuard<'_> {
    fn drop(&mut self) {
        lock(self.tokens).remove(&self.name);
    }
}

fn lock(tokens: &RetryTokens) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    tokens.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KeeperApi {
    /// Start a transfer in the background.
    pub async fn start_pull(&self, name: &str) -> Result<()> {
        self.orchestrator.start(name).await
    }

    /// Pull under the configured retry policy and wait for the result.
    ///
    /// The snapshot is refreshed afterwards, whether the pull succeeded or not.
    pub async fn pull(&self, name: &str) -> Result<RetryStats> {
        let guard = self.register_retry(name)?;
        let result = retry::pull_with_retry(
            &self.orchestrator,
            &self.cleaner,
            name,
            &self.config.retry,
            &guard.cancel,
        )
        .await;
        drop(guard);
        self.reconciler.refresh().await;
        result
    }

    /// Remove incomplete layers of a partial artifact and pull it again.
    pub async fn resume(&self, name: &str) -> Result<RetryStats> {
        let guard = self.register_retry(name)?;
        let result = retry::resume(
            &self.orchestrator,
            &self.cleaner,
            name,
            &self.config.retry,
            &guard.cancel,
        )
        .await;
        drop(guard);
        self.reconciler.refresh().await;
        result
    }

    /// Cancel the transfer for `name`, including a retry loop waiting to
    /// start its next attempt.
    pub async fn cancel(&self, name: &str) -> Result<()> {
        let canonical = crate::store::canonical_name(name);
        let retrying = match lock(&self.retries).get(&canonical) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };

        match self.orchestrator.cancel(name).await {
            Err(KeeperError::NotFound { .. }) if retrying => Ok(()),
            other => other,
        }
    }

    pub async fn progress(&self, name: &str) -> Option<DownloadProgress> {
        self.orchestrator.progress(name).await
    }

    pub async fn wait(&self, name: &str) -> Result<()> {
        self.orchestrator.wait(name).await
    }

    fn register_retry(&self, name: &str) -> Result<RetryGuard<'_>> {
        let canonical = crate::store::canonical_name(name);
        let cancel = CancellationToken::new();
        let mut tokens = lock(&self.retries);
        if tokens.contains_key(&canonical) {
            return Err(KeeperError::AlreadyInProgress { name: canonical });
        }
        tokens.insert(canonical.clone(), cancel.clone());
        Ok(RetryGuard {
            tokens: &self.retries,
            name: canonical,
            cancel,
        })
    }
}
