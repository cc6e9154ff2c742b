//! Error types for `PipePilot`.

use thiserror::Error;

use crate::stream::StreamKind;

/// Result type alias using `PipePilot` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for `PipePilot` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An OS pipe for one of the standard streams could not be created or attached.
    #[error("Failed to acquire {stream} pipe: {source}")]
    PipeAcquisition {
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    /// The child process could not be spawned.
    #[error("Failed to spawn {program}: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the child's input stream failed.
    #[error("Failed to write to {stream}: {source}")]
    StreamWrite {
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    /// Reading from one of the child's output streams failed.
    #[error("Failed to read from {stream}: {source}")]
    StreamRead {
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Program path is empty")]
    EmptyProgram,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Process not started")]
    NotStarted,

    /// The input relay has stopped or the input channel was closed.
    #[error("Input channel closed")]
    InputClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_acquisition_names_the_stream() {
        let err = Error::PipeAcquisition {
            stream: StreamKind::Stderr,
            source: std::io::Error::other("too many open files"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to acquire stderr pipe: too many open files"
        );
    }

    #[test]
    fn spawn_error_names_the_program() {
        let err = Error::ProcessSpawn {
            program: "/no/such/bin".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("Failed to spawn /no/such/bin"));
    }
}
