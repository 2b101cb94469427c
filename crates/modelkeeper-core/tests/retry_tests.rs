//! Integration tests for pulling under the retry policy and for resume.
//!
//! Time is paused so backoff delays elapse instantly.

use async_trait::async_trait;
use modelkeeper_core::{
    CancellationToken, Catalog, ErrorCategory, KeeperApi, KeeperError, ModelName, ModelState,
    PullTransport, Result, RetryConfig, ServingCatalog, StoreLayout,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const DIGEST: &str = "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

struct NothingInstalled;

#[async_trait]
impl ServingCatalog for NothingInstalled {
    async fn installed_names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Fails with `category` for the first `failures` calls, then succeeds.
///
/// Records whether the partial file existed at the start of each call.
struct FlakyTransport {
    failures: u32,
    category: ErrorCategory,
    calls: Arc<AtomicU32>,
    partial: Option<PathBuf>,
    partial_seen: Arc<Mutex<Vec<bool>>>,
}

impl FlakyTransport {
    fn new(failures: u32, category: ErrorCategory) -> Self {
        Self {
            failures,
            category,
            calls: Arc::new(AtomicU32::new(0)),
            partial: None,
            partial_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl PullTransport for FlakyTransport {
    async fn pull(
        &self,
        name: &str,
        lines: mpsc::Sender<String>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(partial) = &self.partial {
            self.partial_seen.lock().unwrap().push(partial.exists());
            // Each failed attempt leaves a fresh partial behind.
            std::fs::write(partial, vec![0u8; 10]).unwrap();
        }
        if call <= self.failures {
            return Err(KeeperError::transfer(name, self.category, "transfer interrupted"));
        }
        let _ = lines.send(r#"{"status":"success"}"#.to_string()).await;
        Ok(())
    }
}

fn retry_config(max_retries: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_retries(max_retries)
        .with_initial_delay(Duration::from_secs(1))
        .with_backoff_factor(1.5)
        .with_max_delay(Duration::from_secs(4))
}

fn build(root: &Path, transport: FlakyTransport, retry: RetryConfig) -> KeeperApi {
    KeeperApi::builder()
        .models_root(root)
        .catalog(Catalog::empty())
        .retry(retry)
        .transport(Arc::new(transport))
        .serving_catalog(Arc::new(NothingInstalled))
        .build()
        .unwrap()
}

fn seed_manifest(root: &Path, name: &str, size: u64) {
    let manifest = StoreLayout::new(root).manifest_path(&ModelName::parse(name).unwrap());
    std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
    std::fs::write(
        manifest,
        format!(r#"{{"layers":[{{"digest":"{}","size":{}}}]}}"#, DIGEST, size),
    )
    .unwrap();
    std::fs::create_dir_all(StoreLayout::new(root).blobs_dir()).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_then_success() {
    let tmp = TempDir::new().unwrap();
    let transport = FlakyTransport::new(3, ErrorCategory::ConnectionReset);
    let calls = transport.calls.clone();
    let api = build(tmp.path(), transport, retry_config(5));

    let started = tokio::time::Instant::now();
    let stats = api.pull("qwen2.5-coder:7b").await.unwrap();

    assert_eq!(stats.attempts, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(stats.delays.len(), 3);
    assert!(stats.delays.windows(2).all(|w| w[0] < w[1]));
    assert!(stats.delays.iter().all(|d| *d <= Duration::from_secs(4)));
    assert!(started.elapsed() >= stats.total_delay());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_makes_one_attempt() {
    let tmp = TempDir::new().unwrap();
    let transport = FlakyTransport::new(1, ErrorCategory::NotFound);
    let calls = transport.calls.clone();
    let api = build(tmp.path(), transport, retry_config(5));

    let err = api.pull("missing:tag").await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.category(), Some(ErrorCategory::NotFound));
    assert!(matches!(err, KeeperError::Transfer { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_wraps_last_error() {
    let tmp = TempDir::new().unwrap();
    let transport = FlakyTransport::new(u32::MAX, ErrorCategory::Network);
    let calls = transport.calls.clone();
    let api = build(tmp.path(), transport, retry_config(2));

    let err = api.pull("phi3:mini").await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        KeeperError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.category(), Some(ErrorCategory::Network));
        }
        other => panic!("expected RetriesExhausted, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_partial_layers_removed_between_attempts() {
    let tmp = TempDir::new().unwrap();
    seed_manifest(tmp.path(), "gemma2:2b", 100);
    let partial = StoreLayout::new(tmp.path()).partial_path(DIGEST).unwrap();

    let mut transport = FlakyTransport::new(2, ErrorCategory::Timeout);
    transport.partial = Some(partial);
    let seen = transport.partial_seen.clone();
    let api = build(tmp.path(), transport, retry_config(3));

    api.pull("gemma2:2b").await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![false, false, false]);
}

#[tokio::test(start_paused = true)]
async fn test_resume_complete_artifact_is_noop() {
    let tmp = TempDir::new().unwrap();
    seed_manifest(tmp.path(), "llama3.2:1b", 4);
    let blob = StoreLayout::new(tmp.path()).blob_path(DIGEST).unwrap();
    std::fs::write(&blob, b"done").unwrap();

    let transport = FlakyTransport::new(0, ErrorCategory::Network);
    let calls = transport.calls.clone();
    let api = build(tmp.path(), transport, retry_config(3));

    let stats = api.resume("llama3.2:1b").await.unwrap();
    assert!(stats.success);
    assert_eq!(stats.attempts, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(blob.exists());
}

#[tokio::test(start_paused = true)]
async fn test_resume_partial_cleans_then_pulls() {
    let tmp = TempDir::new().unwrap();
    seed_manifest(tmp.path(), "llama3.2:1b", 100);
    let layout = StoreLayout::new(tmp.path());
    let partial = layout.partial_path(DIGEST).unwrap();
    std::fs::write(&partial, vec![0u8; 60]).unwrap();

    let mut transport = FlakyTransport::new(0, ErrorCategory::Network);
    transport.partial = Some(partial);
    let seen = transport.partial_seen.clone();
    let calls = transport.calls.clone();
    let api = build(tmp.path(), transport, retry_config(3));

    assert_eq!(api.scanner().status_of("llama3.2:1b").unwrap().state, ModelState::Partial);
    let stats = api.resume("llama3.2:1b").await.unwrap();
    assert_eq!(stats.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec![false]);
    // The manifest is kept so the serving process can skip complete layers.
    assert!(layout
        .manifest_path(&ModelName::parse("llama3.2:1b").unwrap())
        .exists());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_to_retry() {
    let tmp = TempDir::new().unwrap();
    let transport = FlakyTransport::new(u32::MAX, ErrorCategory::ConnectionReset);
    let calls = transport.calls.clone();
    let retry = retry_config(5)
        .with_initial_delay(Duration::from_secs(30))
        .with_max_delay(Duration::from_secs(60));
    let api = Arc::new(build(tmp.path(), transport, retry));

    let pull = {
        let api = api.clone();
        tokio::spawn(async move { api.pull("qwen2.5-coder:7b").await })
    };

    // The first attempt has failed and the loop is sleeping.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        api.pull("qwen2.5-coder:7b").await,
        Err(KeeperError::AlreadyInProgress { .. })
    ));

    let started = tokio::time::Instant::now();
    api.cancel("qwen2.5-coder:7b").await.unwrap();
    let err = pull.await.unwrap().unwrap_err();

    assert!(matches!(err, KeeperError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Nothing is left running, so a cancel now has nothing to stop.
    assert!(matches!(
        api.cancel("qwen2.5-coder:7b").await,
        Err(KeeperError::NotFound { .. })
    ));
}
