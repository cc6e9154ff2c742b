//! Process handle: owns one child process, its pipes and its relay loops.

use std::process::ExitStatus;
use std::sync::Arc;

use pipepilot_core::{Error, RelayConfig, Result, StreamKind};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug_span, info, warn};

use super::pipes::{self, StdPipes};
use super::relay::{LineCallback, LoopExit, RelayReport, relay_input, relay_output};

/// Lifecycle of a [`ProcessHandle`]. There is no way back to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Pipes are open, the process has not been spawned.
    Created,
    /// The process was spawned and has not been reaped yet. Relay loops may
    /// still be running or may already have stopped.
    Running,
    /// [`wait`](ProcessHandle::wait) or [`kill`](ProcessHandle::kill) reaped
    /// the process. The relay loops drain whatever output is left.
    Exited,
    /// `start` failed; the handle holds no resources anymore.
    Failed,
}

/// Resources held between construction and `start`.
struct Pending {
    pipes: StdPipes,
    input_rx: mpsc::Receiver<String>,
}

struct RelayTasks {
    stdin: JoinHandle<LoopExit>,
    stdout: JoinHandle<LoopExit>,
    stderr: JoinHandle<LoopExit>,
}

type ClosedSignal = watch::Receiver<Option<LoopExit>>;
type ClosedNotifier = watch::Sender<Option<LoopExit>>;

/// Handle to an external process whose standard streams are relayed as lines.
///
/// Construction opens the three pipes; [`start`](Self::start) spawns the
/// process and launches one relay task per stream. Lines sent through
/// [`send`](Self::send) or [`input`](Self::input) are written to the child's
/// stdin with a trailing newline; every non-empty line the child prints is
/// passed, trimmed, to the matching callback.
pub struct ProcessHandle {
    program: String,
    args: Vec<String>,
    config: RelayConfig,
    on_stdout: LineCallback,
    on_stderr: LineCallback,
    state: ProcessState,
    pending: Option<Pending>,
    input_tx: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
    child: Option<Child>,
    tasks: Option<RelayTasks>,
    stdout_closed: ClosedSignal,
    stderr_closed: ClosedSignal,
    closed_tx: Option<(ClosedNotifier, ClosedNotifier)>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("state", &self.state)
            .field("pid", &self.id())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Create a handle with the default [`RelayConfig`].
    pub fn new<A, S, O, E>(
        program: impl Into<String>,
        args: A,
        on_stdout: O,
        on_stderr: E,
    ) -> Result<Self>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        O: Fn(&str) + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        Self::with_config(program, args, on_stdout, on_stderr, RelayConfig::default())
    }

    /// Create a handle and open its pipes. The process is not spawned yet.
    pub fn with_config<A, S, O, E>(
        program: impl Into<String>,
        args: A,
        on_stdout: O,
        on_stderr: E,
        config: RelayConfig,
    ) -> Result<Self>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        O: Fn(&str) + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        let program = program.into();
        if program.is_empty() {
            return Err(Error::EmptyProgram);
        }
        config.validate()?;

        let pipes = pipes::acquire()?;
        let (input_tx, input_rx) = mpsc::channel(config.input_buffer);
        let (stdout_tx, stdout_closed) = watch::channel(None);
        let (stderr_tx, stderr_closed) = watch::channel(None);

        Ok(Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            config,
            on_stdout: Arc::new(on_stdout),
            on_stderr: Arc::new(on_stderr),
            state: ProcessState::Created,
            pending: Some(Pending { pipes, input_rx }),
            input_tx: Some(input_tx),
            cancel: CancellationToken::new(),
            child: None,
            tasks: None,
            stdout_closed,
            stderr_closed,
            closed_tx: Some((stdout_tx, stderr_tx)),
        })
    }

    /// Spawn the process and launch the three relay loops.
    ///
    /// Returns as soon as the loops are scheduled; it does not wait for the
    /// process. Must be called from within a tokio runtime. On failure no loop
    /// is started and the handle moves to [`ProcessState::Failed`].
    pub fn start(&mut self) -> Result<()> {
        if self.state != ProcessState::Created {
            return Err(Error::AlreadyStarted);
        }
        let (Some(pending), Some((stdout_tx, stderr_tx))) =
            (self.pending.take(), self.closed_tx.take())
        else {
            return Err(Error::AlreadyStarted);
        };
        self.state = ProcessState::Failed;

        let Pending { pipes, input_rx } = pending;
        let parent = pipes.parent.register()?;
        let (stdin, stdout, stderr) = pipes.child.into_stdio();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(self.config.kill_on_drop);

        info!(program = %self.program, args = ?self.args, "Spawning process");
        let child = cmd.spawn().map_err(|source| Error::ProcessSpawn {
            program: self.program.clone(),
            source,
        })?;
        // The command still holds the child's pipe ends; dropping it leaves
        // the child as their only owner so EOF propagates.
        drop(cmd);

        let pid = child.id();
        info!(pid, program = %self.program, "Process started");

        let stdin_task = tokio::spawn(
            relay_input(parent.stdin, input_rx, self.cancel.clone())
                .instrument(debug_span!("relay", pid, stream = %StreamKind::Stdin)),
        );
        let stdout_task = spawn_output(
            StreamKind::Stdout,
            parent.stdout,
            &self.config,
            Arc::clone(&self.on_stdout),
            self.cancel.clone(),
            stdout_tx,
            pid,
        );
        let stderr_task = spawn_output(
            StreamKind::Stderr,
            parent.stderr,
            &self.config,
            Arc::clone(&self.on_stderr),
            self.cancel.clone(),
            stderr_tx,
            pid,
        );

        self.child = Some(child);
        self.tasks = Some(RelayTasks {
            stdin: stdin_task,
            stdout: stdout_task,
            stderr: stderr_task,
        });
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Enqueue one line for the child's stdin. Waits while the inbound
    /// channel is full.
    pub async fn send(&self, line: impl Into<String>) -> Result<()> {
        let tx = self.input_tx.as_ref().ok_or(Error::InputClosed)?;
        tx.send(line.into()).await.map_err(|_| Error::InputClosed)
    }

    /// A clone of the inbound line sender. The input loop stops normally once
    /// every clone and the handle's own sender are dropped.
    pub fn input(&self) -> Result<mpsc::Sender<String>> {
        self.input_tx.clone().ok_or(Error::InputClosed)
    }

    /// Drop the handle's own inbound sender.
    pub fn close_input(&mut self) {
        self.input_tx = None;
    }

    /// Fire the shared cancellation signal. Safe to call any number of times.
    /// Does not wait for the process to exit.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!(program = %self.program, pid = self.id(), "Stopping relay");
        }
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Watch receiver that turns `Some` once the output loop for `stream`
    /// has stopped. `None` for [`StreamKind::Stdin`].
    pub fn output_closed(&self, stream: StreamKind) -> Option<ClosedSignal> {
        match stream {
            StreamKind::Stdin => None,
            StreamKind::Stdout => Some(self.stdout_closed.clone()),
            StreamKind::Stderr => Some(self.stderr_closed.clone()),
        }
    }

    /// Wait until both output loops have stopped.
    pub async fn outputs_closed(&self) {
        let mut stdout = self.stdout_closed.clone();
        let mut stderr = self.stderr_closed.clone();
        // A dropped sender means the loop is gone as well.
        let _ = stdout.wait_for(Option::is_some).await;
        let _ = stderr.wait_for(Option::is_some).await;
    }

    /// Wait for all three relay loops and report why each stopped.
    pub async fn join(&mut self) -> Result<RelayReport> {
        let tasks = self.tasks.take().ok_or(Error::NotStarted)?;
        Ok(RelayReport {
            stdin: join_loop(tasks.stdin, StreamKind::Stdin).await,
            stdout: join_loop(tasks.stdout, StreamKind::Stdout).await,
            stderr: join_loop(tasks.stderr, StreamKind::Stderr).await,
        })
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let child = self.child.as_mut().ok_or(Error::NotStarted)?;
        let status = child.wait().await?;
        if self.state == ProcessState::Running {
            info!(program = %self.program, ?status, "Process exited");
            self.state = ProcessState::Exited;
        }
        Ok(status)
    }

    /// Kill the process and wait for it.
    pub async fn kill(&mut self) -> Result<()> {
        let child = self.child.as_mut().ok_or(Error::NotStarted)?;
        child.kill().await.map_err(|e| {
            warn!(program = %self.program, error = %e, "Failed to kill process");
            Error::Io(e)
        })?;
        self.state = ProcessState::Exited;
        Ok(())
    }

    /// OS process id, once running and not yet reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub const fn state(&self) -> ProcessState {
        self.state
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }
}

fn spawn_output(
    stream: StreamKind,
    reader: tokio::net::unix::pipe::Receiver,
    config: &RelayConfig,
    on_line: LineCallback,
    cancel: CancellationToken,
    closed: ClosedNotifier,
    pid: Option<u32>,
) -> JoinHandle<LoopExit> {
    let max_line_bytes = config.max_line_bytes;
    tokio::spawn(
        async move {
            let exit = relay_output(stream, reader, max_line_bytes, on_line, cancel).await;
            closed.send_modify(|slot| *slot = Some(exit.clone()));
            exit
        }
        .instrument(debug_span!("relay", pid, stream = %stream)),
    )
}

async fn join_loop(task: JoinHandle<LoopExit>, stream: StreamKind) -> LoopExit {
    match task.await {
        Ok(exit) => exit,
        Err(e) => {
            warn!(%stream, error = %e, "Relay task did not complete");
            let reason = if e.is_panic() {
                panic_message(&*e.into_panic())
            } else {
                e.to_string()
            };
            let message = format!("{stream} relay task aborted: {reason}");
            match stream {
                StreamKind::Stdin => LoopExit::WriteFailed { message },
                StreamKind::Stdout | StreamKind::Stderr => LoopExit::ReadFailed { message },
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ignore(_: &str) {}

    #[test]
    fn empty_program_is_rejected() {
        let err = ProcessHandle::new("", Vec::<String>::new(), ignore, ignore).unwrap_err();
        assert!(matches!(err, Error::EmptyProgram));
    }

    #[test]
    fn invalid_config_is_rejected_before_pipes_open() {
        let config = RelayConfig {
            input_buffer: 0,
            ..RelayConfig::default()
        };
        let err = ProcessHandle::with_config("cat", ["-u"], ignore, ignore, config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn construction_does_not_spawn() {
        let handle = ProcessHandle::new("cat", ["-u"], ignore, ignore).unwrap();
        assert_eq!(handle.state(), ProcessState::Created);
        assert_eq!(handle.id(), None);
        assert_eq!(handle.program(), "cat");
        assert_eq!(handle.args(), ["-u".to_string()]);
        assert!(handle.output_closed(StreamKind::Stdin).is_none());
    }

    #[tokio::test]
    async fn operations_before_start_report_not_started() {
        let mut handle = ProcessHandle::new("cat", Vec::<String>::new(), ignore, ignore).unwrap();
        assert!(matches!(handle.join().await, Err(Error::NotStarted)));
        assert!(matches!(handle.wait().await, Err(Error::NotStarted)));
        assert!(matches!(handle.kill().await, Err(Error::NotStarted)));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_handle_failed() {
        let mut handle = ProcessHandle::new(
            "/nonexistent/pipepilot-test-binary",
            Vec::<String>::new(),
            ignore,
            ignore,
        )
        .unwrap();
        let err = handle.start().unwrap_err();
        assert!(matches!(err, Error::ProcessSpawn { .. }));
        assert_eq!(handle.state(), ProcessState::Failed);
        assert!(matches!(handle.join().await, Err(Error::NotStarted)));
        assert!(matches!(handle.start(), Err(Error::AlreadyStarted)));
    }

    #[tokio::test]
    async fn panicked_output_task_reports_its_message() {
        let task = tokio::spawn(async { panic!("callback blew up on line {}", 3) });
        let exit = join_loop(task, StreamKind::Stderr).await;
        assert_eq!(
            exit,
            LoopExit::ReadFailed {
                message: "stderr relay task aborted: callback blew up on line 3".into()
            }
        );

        let task = tokio::spawn(async { panic!("static text") });
        let exit = join_loop(task, StreamKind::Stdin).await;
        assert!(matches!(exit, LoopExit::WriteFailed { message } if message.ends_with("static text")));
    }

    #[tokio::test]
    async fn closing_input_rejects_further_sends() {
        let mut handle = ProcessHandle::new("cat", Vec::<String>::new(), ignore, ignore).unwrap();
        handle.close_input();
        assert!(matches!(handle.send("x").await, Err(Error::InputClosed)));
        assert!(matches!(handle.input(), Err(Error::InputClosed)));
    }
}
