//! Progress line parsing.
//!
//! A transfer emits a mix of line shapes depending on transport and version:
//!
//! ```text
//! {"status":"pulling 6a0746a1ec1a","digest":"sha256:6a07..","total":4661211424,"completed":1048576}
//! {"status":"success"}
//! {"error":"pull model manifest: file does not exist"}
//! pulling 6a0746a1ec1a...  45% ▕████████          ▏ 2.1 GB/4.7 GB   35 MB/s   1m12s
//! verifying sha256 digest
//! Error: pull model manifest: file does not exist
//! ```
//!
//! Each shape is handled by one [`LineParser`]; [`ProgressParser`] tries them
//! in order and the first match wins. A line nothing matches is dropped.

use crate::error::ErrorCategory;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ansi escape regex must compile")
});

static CLI_BAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^pulling\s+(?P<digest>[0-9a-f]{6,})\S*\s+
        (?P<percent>\d{1,3})%
        .*?
        (?P<done>\d+(?:\.\d+)?)\s*(?P<done_unit>[KMGT]?B)\s*/\s*
        (?P<total>\d+(?:\.\d+)?)\s*(?P<total_unit>[KMGT]?B)",
    )
    .expect("cli progress regex must compile")
});

static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<percent>\d{1,3}(?:\.\d+)?)\s*%").expect("percent regex must compile")
});

/// One decoded progress observation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Free-form status text ("pulling manifest", "verifying sha256 digest").
    Status(String),
    /// Byte counts for one layer. `digest` identifies the layer so counts from
    /// several layers can be summed.
    Bytes {
        digest: Option<String>,
        completed: u64,
        total: u64,
        status: Option<String>,
    },
    /// A bare percentage without byte counts.
    Percent(f64),
    /// The terminal success marker.
    Success,
    /// A terminal error reported by the serving process.
    Error {
        category: ErrorCategory,
        message: String,
    },
}

/// One line-shape strategy. Returns `None` for lines it does not recognize.
pub trait LineParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<ProgressEvent>;
}

/// NDJSON objects from the HTTP pull stream.
#[derive(Debug, Default)]
pub struct JsonEventParser;

#[derive(Debug, Deserialize)]
struct PullEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl LineParser for JsonEventParser {
    fn parse(&self, line: &str) -> Option<ProgressEvent> {
        if !line.starts_with('{') {
            return None;
        }
        let event: PullEvent = serde_json::from_str(line).ok()?;

        if let Some(message) = event.error {
            return Some(ProgressEvent::Error {
                category: ErrorCategory::from_server_message(&message),
                message,
            });
        }
        if event.status.as_deref() == Some("success") {
            return Some(ProgressEvent::Success);
        }
        match (event.total, event.completed) {
            (Some(total), completed) if total > 0 => Some(ProgressEvent::Bytes {
                digest: event.digest,
                completed: completed.unwrap_or(0),
                total,
                status: event.status,
            }),
            _ => event.status.map(ProgressEvent::Status),
        }
    }
}

/// Plain-text terminal markers printed by the CLI.
#[derive(Debug, Default)]
pub struct MarkerParser;

impl LineParser for MarkerParser {
    fn parse(&self, line: &str) -> Option<ProgressEvent> {
        if line.eq_ignore_ascii_case("success") {
            return Some(ProgressEvent::Success);
        }
        let message = line
            .strip_prefix("Error:")
            .or_else(|| line.strip_prefix("error:"))?
            .trim()
            .to_string();
        Some(ProgressEvent::Error {
            category: ErrorCategory::from_server_message(&message),
            message,
        })
    }
}

/// CLI progress bars with a percentage and `done/total` sizes.
#[derive(Debug, Default)]
pub struct CliBarParser;

impl LineParser for CliBarParser {
    fn parse(&self, line: &str) -> Option<ProgressEvent> {
        let caps = CLI_BAR.captures(line)?;
        let completed = parse_size(&caps["done"], &caps["done_unit"])?;
        let total = parse_size(&caps["total"], &caps["total_unit"])?;
        if total == 0 {
            return None;
        }
        Some(ProgressEvent::Bytes {
            digest: Some(caps["digest"].to_string()),
            completed: completed.min(total),
            total,
            status: Some(format!("pulling {}", &caps["digest"])),
        })
    }
}

/// Any line carrying a bare percentage.
#[derive(Debug, Default)]
pub struct PercentParser;

impl LineParser for PercentParser {
    fn parse(&self, line: &str) -> Option<ProgressEvent> {
        let caps = PERCENT.captures(line)?;
        let percent: f64 = caps["percent"].parse().ok()?;
        (0.0..=100.0)
            .contains(&percent)
            .then_some(ProgressEvent::Percent(percent))
    }
}

/// Fallback: keep the text as status.
#[derive(Debug, Default)]
pub struct StatusTextParser;

impl LineParser for StatusTextParser {
    fn parse(&self, line: &str) -> Option<ProgressEvent> {
        let has_text = line.chars().any(|c| c.is_alphanumeric());
        has_text.then(|| ProgressEvent::Status(line.to_string()))
    }
}

/// Ordered set of strategies.
pub struct ProgressParser {
    strategies: Vec<Box<dyn LineParser>>,
}

impl ProgressParser {
    pub fn new(strategies: Vec<Box<dyn LineParser>>) -> Self {
        Self { strategies }
    }

    /// Decode one raw line. Terminal control sequences are stripped first.
    pub fn parse(&self, raw: &str) -> Option<ProgressEvent> {
        let cleaned = ANSI_ESCAPE.replace_all(raw, "");
        let line = cleaned.trim();
        if line.is_empty() {
            return None;
        }
        self.strategies.iter().find_map(|s| s.parse(line))
    }
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new(vec![
            Box::new(JsonEventParser),
            Box::new(MarkerParser),
            Box::new(CliBarParser),
            Box::new(PercentParser),
            Box::new(StatusTextParser),
        ])
    }
}

impl std::fmt::Debug for ProgressParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressParser")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

/// Parse a CLI size such as `2.1 GB`. The CLI prints decimal units.
fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let scale = match unit {
        "B" => 1.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * scale).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<ProgressEvent> {
        ProgressParser::default().parse(line)
    }

    #[test]
    fn test_json_bytes() {
        let event = parse(
            r#"{"status":"pulling 6a07","digest":"sha256:6a07","total":1000,"completed":250}"#,
        );
        assert_eq!(
            event,
            Some(ProgressEvent::Bytes {
                digest: Some("sha256:6a07".into()),
                completed: 250,
                total: 1000,
                status: Some("pulling 6a07".into()),
            })
        );
    }

    #[test]
    fn test_json_status_success_and_error() {
        assert_eq!(
            parse(r#"{"status":"pulling manifest"}"#),
            Some(ProgressEvent::Status("pulling manifest".into()))
        );
        assert_eq!(parse(r#"{"status":"success"}"#), Some(ProgressEvent::Success));
        assert_eq!(
            parse(r#"{"error":"pull model manifest: file does not exist"}"#),
            Some(ProgressEvent::Error {
                category: ErrorCategory::NotFound,
                message: "pull model manifest: file does not exist".into(),
            })
        );
    }

    #[test]
    fn test_cli_bar() {
        let line = "pulling 6a0746a1ec1a...  45% ▕████████          ▏ 2.1 GB/4.7 GB   35 MB/s   1m12s";
        assert_eq!(
            parse(line),
            Some(ProgressEvent::Bytes {
                digest: Some("6a0746a1ec1a".into()),
                completed: 2_100_000_000,
                total: 4_700_000_000,
                status: Some("pulling 6a0746a1ec1a".into()),
            })
        );
    }

    #[test]
    fn test_cli_bar_with_ansi() {
        let line = "\x1b[?25l\x1b[2Kpulling 6a0746a1ec1a: 100% ▕██▏ 4.7 GB/4.7 GB\x1b[?25h";
        match parse(line) {
            Some(ProgressEvent::Bytes { completed, total, .. }) => assert_eq!(completed, total),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cli_markers() {
        assert_eq!(parse("success"), Some(ProgressEvent::Success));
        assert_eq!(
            parse("Error: max retries exceeded: unexpected EOF"),
            Some(ProgressEvent::Error {
                category: ErrorCategory::ConnectionReset,
                message: "max retries exceeded: unexpected EOF".into(),
            })
        );
    }

    #[test]
    fn test_percent_only_and_status_fallback() {
        assert_eq!(parse("downloading 37.5%"), Some(ProgressEvent::Percent(37.5)));
        assert_eq!(
            parse("verifying sha256 digest"),
            Some(ProgressEvent::Status("verifying sha256 digest".into()))
        );
    }

    #[test]
    fn test_unparsable_lines_are_skipped() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("   "), None);
        assert_eq!(parse("▕▏ ..."), None);
        // Truncated JSON degrades to status text rather than failing.
        assert!(matches!(
            parse(r#"{"status":"pull"#),
            Some(ProgressEvent::Status(_))
        ));
    }

    #[test]
    fn test_custom_strategy_order() {
        let parser = ProgressParser::new(vec![Box::new(PercentParser)]);
        assert_eq!(parser.parse("pulling manifest"), None);
        assert_eq!(parser.parse("5%"), Some(ProgressEvent::Percent(5.0)));
    }
}
