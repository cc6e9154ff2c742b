//! Newline framing for raw child output.
//!
//! `\n` is the only delimiter. There is no escaping. Lines longer than the
//! configured limit are dropped whole, so a runaway producer cannot grow the
//! line buffer without bound.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One unit read from a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A line with its delimiter removed. Invalid UTF-8 is replaced with U+FFFD.
    Line(String),
    /// A line that exceeded the limit and was skipped; `discarded` counts the
    /// bytes consumed including the delimiter.
    Oversized { discarded: usize },
}

/// Incremental line reader over an async buffered byte source.
pub struct LineReader<R> {
    inner: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            max_line_bytes,
            buf: Vec::new(),
        }
    }

    /// Read the next frame. Returns `Ok(None)` at end of stream.
    ///
    /// A trailing fragment without a final newline is returned as a line.
    /// Not cancellation safe: bytes of a partially read line are lost if the
    /// future is dropped.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        self.buf.clear();
        let mut consumed = 0usize;
        let mut oversized = false;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if consumed == 0 {
                    return Ok(None);
                }
                break;
            }

            let (take, found) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            let content = if found { take - 1 } else { take };

            if !oversized {
                if self.buf.len() + content > self.max_line_bytes {
                    oversized = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(&available[..content]);
                }
            }

            self.inner.consume(take);
            consumed += take;
            if found {
                break;
            }
        }

        if oversized {
            return Ok(Some(Frame::Oversized {
                discarded: consumed,
            }));
        }
        Ok(Some(Frame::Line(
            String::from_utf8_lossy(&self.buf).into_owned(),
        )))
    }
}

/// Strip trailing whitespace (including `\r`). Returns `None` when nothing
/// is left, which callers treat as a line to skip.
pub fn trim_line(line: &str) -> Option<&str> {
    let trimmed = line.trim_end();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn collect(input: &[u8], max: usize) -> Vec<Frame> {
        let mut reader = LineReader::new(input, max);
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await.unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn line(s: &str) -> Frame {
        Frame::Line(s.to_string())
    }

    #[tokio::test]
    async fn splits_on_newline_in_order() {
        let frames = collect(b"one\ntwo\nthree\n", 64).await;
        assert_eq!(frames, vec![line("one"), line("two"), line("three")]);
    }

    #[tokio::test]
    async fn empty_lines_are_framed_not_dropped() {
        let frames = collect(b"\n\nx\n", 64).await;
        assert_eq!(frames, vec![line(""), line(""), line("x")]);
    }

    #[tokio::test]
    async fn trailing_fragment_is_returned_before_eof() {
        let frames = collect(b"done\npartial", 64).await;
        assert_eq!(frames, vec![line("done"), line("partial")]);
    }

    #[tokio::test]
    async fn empty_input_is_immediate_eof() {
        assert!(collect(b"", 64).await.is_empty());
    }

    #[tokio::test]
    async fn oversized_line_is_skipped_and_reading_resumes() {
        let frames = collect(b"ok\n0123456789\nafter\n", 5).await;
        assert_eq!(
            frames,
            vec![line("ok"), Frame::Oversized { discarded: 11 }, line("after")]
        );
    }

    #[tokio::test]
    async fn line_exactly_at_limit_is_kept() {
        let frames = collect(b"12345\n", 5).await;
        assert_eq!(frames, vec![line("12345")]);
    }

    #[tokio::test]
    async fn limit_counts_bytes_before_trimming() {
        // Fits once the trailing CR and spaces are trimmed, but the limit
        // applies to the raw line.
        let frames = collect(b"12345\r\n123  \n", 5).await;
        assert_eq!(
            frames,
            vec![Frame::Oversized { discarded: 7 }, line("123  ")]
        );
    }

    #[tokio::test]
    async fn lines_spanning_buffer_refills_are_joined() {
        // A 4-byte BufReader forces every line across several fill_buf calls.
        let reader = BufReader::with_capacity(4, &b"abcdefghij\nklm\n"[..]);
        let mut lines = LineReader::new(reader, 64);
        assert_eq!(lines.next_frame().await.unwrap(), Some(line("abcdefghij")));
        assert_eq!(lines.next_frame().await.unwrap(), Some(line("klm")));
        assert_eq!(lines.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let frames = collect(b"bad \xff byte\n", 64).await;
        assert_eq!(frames, vec![line("bad \u{fffd} byte")]);
    }

    #[test]
    fn trim_line_strips_trailing_whitespace_only() {
        assert_eq!(trim_line("  ping \r"), Some("  ping"));
        assert_eq!(trim_line("warn: low memory"), Some("warn: low memory"));
        assert_eq!(trim_line(" \t\r"), None);
        assert_eq!(trim_line(""), None);
    }
}
