//! `PipePilot`
//!
//! Launches an external program and relays its standard streams as lines:
//! strings sent on an inbound channel are written to the child's stdin, and
//! each line the child prints on stdout or stderr is handed to a callback.
//! A single cancellation token stops all three relay loops.
//!
//! ```no_run
//! use pipepilot::ProcessHandle;
//!
//! # async fn demo() -> pipepilot::Result<()> {
//! let mut handle = ProcessHandle::new(
//!     "cat",
//!     Vec::<String>::new(),
//!     |line: &str| println!("out: {line}"),
//!     |line: &str| eprintln!("err: {line}"),
//! )?;
//! handle.start()?;
//! handle.send("ping").await?;
//! handle.close_input();
//! handle.wait().await?;
//! let report = handle.join().await?;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("pipepilot relays through unix pipes and supports unix targets only");

pub mod subprocess;

pub use pipepilot_core::{Error, RelayConfig, Result, StreamKind};
pub use subprocess::{LineCallback, LoopExit, ProcessHandle, ProcessState, RelayReport};
