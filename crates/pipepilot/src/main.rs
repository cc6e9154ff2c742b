//! `PipePilot` CLI
//!
//! Runs a program and bridges the terminal to it line by line: host stdin is
//! relayed to the child, child stdout/stderr lines are printed back.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pipepilot::{ProcessHandle, RelayConfig};
use pipepilot_core::config::load_config;
use pipepilot_core::tracing_init::init_tracing;

/// How long to wait for trailing output after the child exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "pipepilot")]
#[command(version, about = "PipePilot - relay lines to and from a child process")]
struct Args {
    /// Settings file layered over the global settings
    #[arg(long, env = "PIPEPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Capacity of the inbound line channel
    #[arg(long)]
    input_buffer: Option<usize>,

    /// Longest line relayed from the child, in bytes
    #[arg(long)]
    max_line_bytes: Option<usize>,

    /// Kill the child if pipepilot fails before the child is reaped. A
    /// normal run always waits for the child before exiting, so the flag
    /// only matters on error paths
    #[arg(long)]
    kill_on_drop: bool,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "PIPEPILOT_LOG_JSON")]
    log_json: bool,

    /// Program to run
    program: String,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Args {
    fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(n) = self.input_buffer {
            config.input_buffer = n;
        }
        if let Some(n) = self.max_line_bytes {
            config.max_line_bytes = n;
        }
        if self.kill_on_drop {
            config.kill_on_drop = true;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }
}

fn print_stdout(line: &str) {
    let _ = writeln!(std::io::stdout().lock(), "{line}");
}

fn print_stderr(line: &str) {
    let _ = writeln!(std::io::stderr().lock(), "{line}");
}

/// Relay host stdin lines into the child's inbound channel until host stdin
/// closes, the relay is cancelled, or the input loop stops.
async fn forward_host_stdin(input: mpsc::Sender<String>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if input.send(line).await.is_err() {
                    debug!("Input relay closed, no longer forwarding stdin");
                    break;
                }
            }
            Ok(None) => {
                debug!("Host stdin closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read host stdin");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    init_tracing(&format!("pipepilot={}", config.log_level), args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        program = %args.program,
        max_line_bytes = config.max_line_bytes,
        input_buffer = config.input_buffer,
        "Starting pipepilot"
    );

    let mut handle =
        ProcessHandle::with_config(&args.program, &args.args, print_stdout, print_stderr, config)?;
    handle.start()?;

    let cancel = handle.cancellation();
    tokio::spawn(forward_host_stdin(handle.input()?, cancel.clone()));
    // The forwarder now holds the only sender; host stdin EOF closes the
    // child's stdin.
    handle.close_input();

    let interrupted = tokio::select! {
        status = handle.wait() => {
            status?;
            false
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            true
        }
    };

    if interrupted {
        warn!("Interrupted, stopping child");
        handle.shutdown();
        if let Err(e) = handle.kill().await {
            warn!(error = %e, "Kill failed");
        }
    } else if tokio::time::timeout(DRAIN_TIMEOUT, handle.outputs_closed())
        .await
        .is_err()
    {
        warn!("Output still open after child exit, stopping relay");
    }

    let status = handle.wait().await?;
    handle.shutdown();
    let report = handle.join().await?;
    info!(?status, ?report, "Relay finished");

    // Exit directly: a blocked host stdin read would otherwise hold the
    // runtime open. Destructors do not run, which is fine because the child
    // has already been reaped above.
    std::process::exit(exit_code(status));
}
