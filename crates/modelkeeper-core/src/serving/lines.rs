//! Splitting a chunked byte stream into text lines.

use tracing::warn;

/// Longest line kept, in bytes. Progress objects are a few hundred bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Accumulates byte chunks and yields complete lines.
///
/// Chunk boundaries may fall anywhere, including inside a multi-byte UTF-8
/// sequence; bytes are only decoded once a full line is available. Both
/// `\n` and `\r` end a line, since CLI progress output redraws with `\r`.
/// A line longer than [`MAX_LINE_LEN`] is dropped up to its terminator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators.
    /// Empty lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(line) = self.take() {
                    lines.push(line);
                }
            } else if !self.discarding {
                if self.pending.len() >= MAX_LINE_LEN {
                    warn!("Dropping output line longer than {} bytes", MAX_LINE_LEN);
                    self.pending.clear();
                    self.discarding = true;
                } else {
                    self.pending.push(byte);
                }
            }
        }
        lines
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!line.is_empty()).then_some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(br#"{"status":"pull"#).is_empty());
        assert_eq!(
            buffer.push(b"ing manifest\"}\n{\"status\":"),
            vec![r#"{"status":"pulling manifest"}"#]
        );
        assert_eq!(buffer.push(br#""success"}"#), Vec::<String>::new());
        assert_eq!(buffer.finish().as_deref(), Some(r#"{"status":"success"}"#));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_carriage_returns_and_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"pulling a: 10%\rpulling a: 20%\r\n\n");
        assert_eq!(lines, vec!["pulling a: 10%", "pulling a: 20%"]);
    }

    #[test]
    fn test_oversized_line_dropped_until_terminator() {
        let mut buffer = LineBuffer::new();
        let noise = vec![b'x'; MAX_LINE_LEN + 10];
        assert!(buffer.push(&noise).is_empty());
        assert!(buffer.pending.len() <= MAX_LINE_LEN);
        assert!(buffer.push(&noise).is_empty());
        assert_eq!(buffer.push(b"tail\nnext\n"), vec!["next"]);
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let mut buffer = LineBuffer::new();
        let mut line = vec![b'y'; MAX_LINE_LEN];
        line.push(b'\n');
        let lines = buffer.push(&line);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_LEN);
    }

    #[test]
    fn test_unterminated_oversized_tail_not_flushed() {
        let mut buffer = LineBuffer::new();
        buffer.push(&vec![b'z'; MAX_LINE_LEN + 1]);
        assert_eq!(buffer.finish(), None);
        assert_eq!(buffer.push(b"ok\n"), vec!["ok"]);
    }

    #[test]
    fn test_multibyte_split() {
        let bar = "▕██▏\n".as_bytes();
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&bar[..2]).is_empty());
        assert_eq!(buffer.push(&bar[2..]), vec!["▕██▏"]);
    }
}
