//! OS pipe acquisition for the three standard streams.
//!
//! Pipes are opened before the child exists. The child ends are handed to
//! `Command` at spawn time; the parent ends are registered with the tokio
//! reactor. Every descriptor is an owned value, so an early return closes
//! whatever was already opened.

use std::io::{PipeReader, PipeWriter};
use std::os::fd::OwnedFd;
use std::process::Stdio;

use pipepilot_core::{Error, Result, StreamKind};
use tokio::net::unix::pipe;

/// Ends that become the child's stdin/stdout/stderr.
#[derive(Debug)]
pub struct ChildEnds {
    pub stdin: PipeReader,
    pub stdout: PipeWriter,
    pub stderr: PipeWriter,
}

impl ChildEnds {
    pub fn into_stdio(self) -> (Stdio, Stdio, Stdio) {
        (self.stdin.into(), self.stdout.into(), self.stderr.into())
    }
}

/// Ends kept by the relay, still in blocking std form.
#[derive(Debug)]
pub struct ParentEnds {
    pub stdin: PipeWriter,
    pub stdout: PipeReader,
    pub stderr: PipeReader,
}

/// Parent ends registered with the runtime.
#[derive(Debug)]
pub struct AsyncParentEnds {
    pub stdin: pipe::Sender,
    pub stdout: pipe::Receiver,
    pub stderr: pipe::Receiver,
}

#[derive(Debug)]
pub struct StdPipes {
    pub parent: ParentEnds,
    pub child: ChildEnds,
}

/// Open all three pipes, in stdin, stdout, stderr order.
pub fn acquire() -> Result<StdPipes> {
    let (stdin_r, stdin_w) = open(StreamKind::Stdin)?;
    let (stdout_r, stdout_w) = open(StreamKind::Stdout)?;
    let (stderr_r, stderr_w) = open(StreamKind::Stderr)?;

    Ok(StdPipes {
        parent: ParentEnds {
            stdin: stdin_w,
            stdout: stdout_r,
            stderr: stderr_r,
        },
        child: ChildEnds {
            stdin: stdin_r,
            stdout: stdout_w,
            stderr: stderr_w,
        },
    })
}

fn open(stream: StreamKind) -> Result<(PipeReader, PipeWriter)> {
    std::io::pipe().map_err(|source| Error::PipeAcquisition { stream, source })
}

impl ParentEnds {
    /// Switch the parent ends to non-blocking mode and attach them to the
    /// current runtime. Must be called from within a tokio runtime.
    pub fn register(self) -> Result<AsyncParentEnds> {
        let stdin = pipe::Sender::from_owned_fd(OwnedFd::from(self.stdin)).map_err(|source| {
            Error::PipeAcquisition {
                stream: StreamKind::Stdin,
                source,
            }
        })?;
        let stdout = receiver(self.stdout, StreamKind::Stdout)?;
        let stderr = receiver(self.stderr, StreamKind::Stderr)?;
        Ok(AsyncParentEnds {
            stdin,
            stdout,
            stderr,
        })
    }
}

fn receiver(end: PipeReader, stream: StreamKind) -> Result<pipe::Receiver> {
    pipe::Receiver::from_owned_fd(OwnedFd::from(end))
        .map_err(|source| Error::PipeAcquisition { stream, source })
}
