//! `PipePilot` Core Library
//!
//! Shared functionality for `PipePilot` components:
//! - Error taxonomy for pipe acquisition, spawning and stream I/O
//! - Stream identifiers for the three standard streams
//! - Configuration resolution and hierarchy
//! - Newline framing of raw byte streams
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod framing;
pub mod stream;
pub mod tracing_init;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use framing::{Frame, LineReader};
pub use stream::StreamKind;
