//! Ways of driving a pull.
//!
//! A transport runs one pull to completion and forwards every raw output line
//! to the orchestrator. It does not interpret progress; it only reports how
//! the pull ended. On cancellation it must stop promptly (drop the stream or
//! kill the process) and return [`KeeperError::Cancelled`].

use crate::cancel::CancellationToken;
use crate::error::{ErrorCategory, KeeperError, Result};
use crate::serving::{LineBuffer, ServingClient};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

#[async_trait]
pub trait PullTransport: Send + Sync {
    /// Run a pull of `name`, sending each output line to `lines`.
    async fn pull(
        &self,
        name: &str,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Streams `POST /api/pull` from the serving process.
#[derive(Debug, Clone)]
pub struct HttpPullTransport {
    client: ServingClient,
}

impl HttpPullTransport {
    pub fn new(client: ServingClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PullTransport for HttpPullTransport {
    async fn pull(
        &self,
        name: &str,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(name)),
            stream = self.client.pull_stream(name) => stream?,
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Dropping pull stream for {}", name);
                    return Err(cancelled(name));
                }
                line = stream.next_line() => match line? {
                    Some(line) => {
                        if lines.send(line).await.is_err() {
                            debug!("Progress receiver for {} went away", name);
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Runs `<program> pull <name>` and reads its output.
#[derive(Debug, Clone)]
pub struct CliPullTransport {
    program: String,
}

impl CliPullTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl PullTransport for CliPullTransport {
    async fn pull(
        &self,
        name: &str,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        debug!("Running {} pull {}", self.program, name);
        let mut child = Command::new(&self.program)
            .arg("pull")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KeeperError::transfer(
                    name,
                    ErrorCategory::from_io_kind(e.kind()),
                    format!("Failed to start {}: {}", self.program, e),
                )
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            child.kill().await.ok();
            return Err(KeeperError::Other(format!(
                "{} was started without piped output",
                self.program
            )));
        };

        let output = futures::future::join(
            forward_lines(stdout, lines.clone()),
            forward_lines(stderr, lines),
        );
        let (last_out, last_err) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                child.kill().await.ok();
                return Err(cancelled(name));
            }
            tails = output => tails,
        };

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                child.kill().await.ok();
                return Err(cancelled(name));
            }
            status = child.wait() => status.map_err(|e| {
                KeeperError::transfer(
                    name,
                    ErrorCategory::from_io_kind(e.kind()),
                    format!("{} process error: {}", self.program, e),
                )
            })?,
        };

        if status.success() {
            return Ok(());
        }

        // The CLI reports its failure reason as the last line it printed.
        let reason = last_err.or(last_out).unwrap_or_default();
        let reason = reason.trim_start_matches("Error:").trim().to_string();
        warn!("{} pull {} exited with {}: {}", self.program, name, status, reason);
        Err(KeeperError::transfer(
            name,
            ErrorCategory::from_server_message(&reason),
            if reason.is_empty() {
                format!("{} exited with {}", self.program, status)
            } else {
                reason
            },
        ))
    }
}

/// Forward every line of `reader` to `lines`, returning the last line seen.
///
/// Lines are split on `\n` and `\r`; the CLI redraws its progress bar with
/// carriage returns.
async fn forward_lines<R: AsyncRead + Unpin>(
    mut reader: R,
    lines: mpsc::Sender<String>,
) -> Option<String> {
    let mut buffer = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut last = None;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Error reading pull output: {}", e);
                break;
            }
        };
        for line in buffer.push(&chunk[..n]) {
            last = Some(line.clone());
            // A closed receiver only means nobody is watching; keep draining
            // so the child never blocks on a full pipe.
            let _ = lines.send(line).await;
        }
    }
    if let Some(line) = buffer.finish() {
        last = Some(line.clone());
        let _ = lines.send(line).await;
    }
    last
}

fn cancelled(name: &str) -> KeeperError {
    KeeperError::Cancelled {
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_lines_returns_last_line() {
        let (tx, mut rx) = mpsc::channel(16);
        let input: &[u8] = b"pulling manifest\rpulling a: 50%\nError: boom";
        let last = forward_lines(input, tx).await;
        assert_eq!(last.as_deref(), Some("Error: boom"));

        let mut seen = Vec::new();
        while let Some(line) = rx.recv().await {
            seen.push(line);
        }
        assert_eq!(seen, vec!["pulling manifest", "pulling a: 50%", "Error: boom"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_fatal() {
        let transport = CliPullTransport::new("modelkeeper-no-such-program");
        let (tx, _rx) = mpsc::channel(1);
        let err = transport
            .pull("llama3:latest", tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_exit_failure_is_classified() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = tmp.path().join("fake-cli");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'pulling manifest'\necho 'Error: pull model manifest: file does not exist' >&2\nexit 1\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transport = CliPullTransport::new(script.to_string_lossy());
        let (tx, mut rx) = mpsc::channel(16);
        let err = transport
            .pull("nope:latest", tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::NotFound));

        let mut seen = Vec::new();
        while let Some(line) = rx.recv().await {
            seen.push(line);
        }
        assert!(seen.contains(&"pulling manifest".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_cancel_kills_process() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = tmp.path().join("slow-cli");
        std::fs::write(&script, "#!/bin/sh\necho 'pulling manifest'\nexec sleep 30\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transport = CliPullTransport::new(script.to_string_lossy());
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            if rx.recv().await.is_some() {
                trigger.cancel();
            }
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            transport.pull("slow:latest", tx, cancel),
        )
        .await
        .expect("cancel should stop the pull");
        assert!(result.unwrap_err().is_cancelled());
    }
}
