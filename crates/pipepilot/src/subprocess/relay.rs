//! The three relay loops bridging child pipes and line channels.
//!
//! Each loop owns exactly one stream end and drops it when it stops, so every
//! pipe is closed once, by one owner. All loops race their I/O against the
//! shared cancellation token; cancellation wins ties.

use std::sync::Arc;

use pipepilot_core::framing::trim_line;
use pipepilot_core::{Error, Frame, LineReader, StreamKind};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Callback receiving one trimmed, non-empty line. The stdout and stderr
/// callbacks may run concurrently with each other.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Why a relay loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The cancellation token fired.
    Cancelled,
    /// Every sender of the inbound channel was dropped (input loop only).
    InputClosed,
    /// The child closed its end of the pipe (output loops only).
    EndOfStream,
    WriteFailed { message: String },
    ReadFailed { message: String },
}

impl LoopExit {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::WriteFailed { .. } | Self::ReadFailed { .. })
    }
}

/// Termination reasons of all three loops of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub stdin: LoopExit,
    pub stdout: LoopExit,
    pub stderr: LoopExit,
}

/// Forward lines from `lines` to `writer`, one `\n` appended per line.
///
/// Stops on cancellation, on the channel closing, or on the first write
/// error. The inbound channel is closed and `writer` is dropped on return.
pub async fn relay_input<W>(
    mut writer: W,
    mut lines: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> LoopExit
where
    W: AsyncWrite + Unpin,
{
    debug!("input relay started");
    let exit = loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break LoopExit::Cancelled,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            break LoopExit::InputClosed;
        };

        let written = tokio::select! {
            biased;
            () = cancel.cancelled() => break LoopExit::Cancelled,
            res = write_line(&mut writer, &line) => res,
        };
        if let Err(source) = written {
            let err = Error::StreamWrite {
                stream: StreamKind::Stdin,
                source,
            };
            error!(error = %err, "Input relay stopped");
            break LoopExit::WriteFailed {
                message: err.to_string(),
            };
        }
    };

    lines.close();
    drop(writer);
    debug!(?exit, "input relay finished");
    exit
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Read `\n`-delimited lines from `reader` and hand each trimmed, non-empty
/// line to `on_line`, in stream order.
///
/// Stops on cancellation, end of stream, or the first read error. Lines over
/// `max_line_bytes` are skipped with a warning.
pub async fn relay_output<R>(
    stream: StreamKind,
    reader: R,
    max_line_bytes: usize,
    on_line: LineCallback,
    cancel: CancellationToken,
) -> LoopExit
where
    R: AsyncRead + Unpin,
{
    debug!("{stream} relay started");
    let mut lines = LineReader::new(BufReader::new(reader), max_line_bytes);

    let exit = loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break LoopExit::Cancelled,
            frame = lines.next_frame() => frame,
        };
        match frame {
            Ok(Some(Frame::Line(line))) => {
                if let Some(line) = trim_line(&line) {
                    on_line(line);
                }
            }
            Ok(Some(Frame::Oversized { discarded })) => {
                warn!(
                    %stream,
                    discarded,
                    limit = max_line_bytes,
                    "Dropping oversized line"
                );
            }
            Ok(None) => break LoopExit::EndOfStream,
            Err(source) => {
                let err = Error::StreamRead { stream, source };
                error!(error = %err, "Output relay stopped");
                break LoopExit::ReadFailed {
                    message: err.to_string(),
                };
            }
        }
    };

    debug!(?exit, "{stream} relay finished");
    exit
}
