//! Child process management: pipe acquisition, the process handle and the
//! line relay loops.

pub mod handle;
mod pipes;
pub mod relay;

pub use handle::{ProcessHandle, ProcessState};
pub use relay::{LineCallback, LoopExit, RelayReport, relay_input, relay_output};
