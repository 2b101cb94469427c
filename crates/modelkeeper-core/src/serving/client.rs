//! HTTP client for a running serving process.
//!
//! Operations:
//! - `GET /api/tags` lists installed artifacts
//! - `POST /api/pull` streams NDJSON progress objects until `{"status":"success"}`
//! - `DELETE /api/delete` removes an installed artifact

use super::lines::LineBuffer;
use crate::config::NetworkConfig;
use crate::error::{category_of_reqwest, ErrorCategory, KeeperError, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

/// An artifact registered in the serving process, as returned by `GET /api/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<InstalledModel>>,
}

/// HTTP client for the serving process.
#[derive(Debug, Clone)]
pub struct ServingClient {
    base_url: String,
    client: reqwest::Client,
    /// No total timeout: a pull stream lives as long as the transfer, but
    /// a stream that goes silent fails with a Timeout.
    stream_client: reqwest::Client,
}

impl ServingClient {
    /// Create a client for `base_url`, or the default local address.
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(NetworkConfig::DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(NetworkConfig::API_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| config_err(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            client,
            stream_client: build_stream_client(NetworkConfig::STREAM_IDLE_TIMEOUT)?,
        })
    }

    /// Replace the idle timeout applied to pull streams.
    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Result<Self> {
        self.stream_client = build_stream_client(idle)?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List artifacts registered in the serving process.
    pub async fn list_models(&self) -> Result<Vec<InstalledModel>> {
        let url = format!("{}/api/tags", self.base_url);
        debug!("Listing installed models from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            serving_err(
                category_of_reqwest(&e),
                format!("Failed to connect to serving process at {}: {}", url, e),
            )
        })?;
        let response = check_status(response, "tags").await?;

        let tags: TagsResponse = response.json().await.map_err(|e| {
            serving_err(
                ErrorCategory::Invalid,
                format!("Failed to parse tags response: {}", e),
            )
        })?;

        let models = tags.models.unwrap_or_default();
        debug!("Serving process has {} installed models", models.len());
        Ok(models)
    }

    /// Start a pull and return its progress stream.
    ///
    /// Errors before the stream opens are tagged with the artifact name and a
    /// category derived from the transport error or HTTP status.
    pub async fn pull_stream(&self, name: &str) -> Result<PullStream> {
        let url = format!("{}/api/pull", self.base_url);
        info!("Pulling {} via {}", name, url);

        let body = serde_json::json!({ "model": name, "stream": true });
        let response = self
            .stream_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                KeeperError::transfer(
                    name,
                    category_of_reqwest(&e),
                    format!("Failed to send pull request: {}", e),
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(KeeperError::transfer(
                name,
                ErrorCategory::from_status(status.as_u16()),
                format!("Pull API returned {}: {}", status, text.trim()),
            ));
        }

        Ok(PullStream::new(name, response.bytes_stream().boxed()))
    }

    /// Remove an installed artifact from the serving process.
    pub async fn delete_model(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.base_url);
        info!("Deleting model '{}'", name);

        let body = serde_json::json!({ "model": name });
        let response = self
            .client
            .delete(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                serving_err(
                    category_of_reqwest(&e),
                    format!("Failed to send delete request: {}", e),
                )
            })?;
        check_status(response, "delete").await?;

        info!("Deleted model '{}'", name);
        Ok(())
    }
}

/// Line-oriented view of a streaming pull response.
pub struct PullStream {
    name: String,
    chunks: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    finished: bool,
}

impl PullStream {
    fn new(name: &str, chunks: BoxStream<'static, reqwest::Result<Bytes>>) -> Self {
        Self {
            name: name.to_string(),
            chunks,
            buffer: LineBuffer::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// Next non-empty line, or `None` once the server closed the stream.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(None);
            }
            match self.chunks.next().await {
                Some(Ok(chunk)) => self.ready.extend(self.buffer.push(&chunk)),
                Some(Err(e)) => {
                    return Err(KeeperError::transfer(
                        &self.name,
                        category_of_reqwest(&e),
                        format!("Error reading pull stream: {}", e),
                    ))
                }
                None => {
                    self.finished = true;
                    self.ready.extend(self.buffer.finish());
                }
            }
        }
    }
}

impl std::fmt::Debug for PullStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullStream")
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(serving_err(
        ErrorCategory::from_status(status.as_u16()),
        format!("{} API returned {}: {}", what, status, body.trim()),
    ))
}

fn build_stream_client(idle: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
        .read_timeout(idle)
        .user_agent(NetworkConfig::USER_AGENT)
        .build()
        .map_err(|e| config_err(format!("Failed to build streaming HTTP client: {}", e)))
}

fn serving_err(category: ErrorCategory, message: String) -> KeeperError {
    KeeperError::Serving { category, message }
}

fn config_err(message: String) -> KeeperError {
    KeeperError::Config { message }
}
