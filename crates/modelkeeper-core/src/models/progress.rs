//! Transfer progress records owned by the download orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a single transfer attempt.
///
/// `Idle -> Queued -> Downloading -> {Completed | Failed | Cancelled}`.
/// Terminal states are never left; a new attempt gets a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Idle,
    Queued,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    /// Queued or Downloading.
    pub fn is_active(self) -> bool {
        matches!(self, TransferState::Queued | TransferState::Downloading)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }

    /// Whether moving from `self` to `next` respects the one-way state machine.
    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Idle, Queued) => true,
            (Queued, Downloading) => true,
            (Queued | Downloading, Completed | Failed | Cancelled) => true,
            (a, b) => a == b && !a.is_terminal(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Queued => "queued",
            TransferState::Downloading => "downloading",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one transfer's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub name: String,
    pub state: TransferState,
    /// Whole percent in `0..=100`.
    pub percent: u8,
    pub current_bytes: u64,
    pub total_bytes: u64,
    /// Human-formatted speed, e.g. `"12.5 MB/s"`; empty when unknown.
    pub speed: String,
    pub speed_bytes_per_sec: f64,
    /// Human-formatted remaining time, e.g. `"3m12s"`; empty when unknown.
    pub eta: String,
    #[serde(default)]
    pub eta_seconds: Option<u64>,
    /// Last status text reported by the transfer ("pulling manifest", ...).
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl DownloadProgress {
    /// A fresh record in the Queued state.
    pub fn queued(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            state: TransferState::Queued,
            percent: 0,
            current_bytes: 0,
            total_bytes: 0,
            speed: String::new(),
            speed_bytes_per_sec: 0.0,
            eta: String::new(),
            eta_seconds: None,
            status_text: None,
            error: None,
            start_time: now,
            last_update: now,
        }
    }

    /// Move to `next` if the state machine allows it; otherwise leave the
    /// record untouched and return false.
    pub fn transition(&mut self, next: TransferState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.last_update = Utc::now();
        true
    }
}

/// Format a byte count in decimal units, e.g. `"1.50 GB"` for 1.5e9 bytes.
///
/// Decimal matches the units the serving CLI prints, so sizes parsed from
/// its output read back unchanged.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1000;
    const MB: u64 = KB * 1000;
    const GB: u64 = MB * 1000;
    const TB: u64 = GB * 1000;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a transfer rate, e.g. `"12.00 MB/s"`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return String::new();
    }
    format!("{}/s", format_bytes(bytes_per_sec.round() as u64))
}

/// Format a remaining duration, e.g. `"1h02m"`, `"3m12s"`, `"45s"`.
pub fn format_eta(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h{:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m{:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
