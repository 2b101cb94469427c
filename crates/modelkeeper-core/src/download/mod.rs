//! Download orchestration.
//!
//! [`DownloadOrchestrator`] runs at most one transfer per artifact through a
//! [`PullTransport`], parses the transfer's output with [`ProgressParser`] and
//! keeps a [`DownloadProgress`](crate::models::DownloadProgress) record per
//! name with speed and ETA.

mod orchestrator;
mod parser;
mod speed;
mod transport;

pub use orchestrator::DownloadOrchestrator;
pub use parser::{
    CliBarParser, JsonEventParser, LineParser, MarkerParser, PercentParser, ProgressEvent,
    ProgressParser, StatusTextParser,
};
pub use speed::{eta_seconds, SpeedSampler};
pub use transport::{CliPullTransport, HttpPullTransport, PullTransport};
