//! External process execution.
//!
//! Every tool invocation goes through [`run_invocation`]: the child is
//! spawned with piped output and `kill_on_drop`, and is killed and reaped
//! when its stage deadline passes or the run is cancelled.

use crate::error::ToolError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long to wait for output pipes to close after the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One external command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Keep going (and hand the output to the parser) on a non-zero exit.
    pub continue_on_failure: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            env: Vec::new(),
            continue_on_failure: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }

    /// Command line for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub program: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        join_streams(&self.stdout, &self.stderr)
    }
}

fn join_streams(stdout: &str, stderr: &str) -> String {
    match (stdout.trim_end().is_empty(), stderr.trim_end().is_empty()) {
        (_, true) => stdout.trim_end().to_string(),
        (true, false) => stderr.trim_end().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
    }
}

/// Triggers cancellation of every run holding a matching [`CancelSignal`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes cancellation. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run a single command until it exits, the deadline passes or the run is
/// cancelled. A non-zero exit is not an error here.
pub async fn run_invocation(
    invocation: &Invocation,
    deadline: Instant,
    stage_timeout: Duration,
    cancel: &CancelSignal,
) -> Result<ProcessOutput, ToolError> {
    let program = invocation.program.clone();
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled {
            program,
            output: String::new(),
        });
    }

    tracing::debug!(
        "Running `{}` in {}",
        invocation.command_line(),
        invocation.cwd.display()
    );
    let started = std::time::Instant::now();

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout_task = spawn_reader(child.stdout.take());
    let stderr_task = spawn_reader(child.stderr.take());

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Cancelled,
    };

    if !matches!(outcome, Outcome::Exited(_)) {
        if let Err(e) = child.kill().await {
            tracing::warn!("Failed to kill `{}`: {}", program, e);
        }
    }

    let stdout = drain(stdout_task).await;
    let stderr = drain(stderr_task).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Outcome::Exited(Ok(status)) => {
            tracing::debug!("`{}` finished with {} in {}ms", program, status, duration_ms);
            Ok(ProcessOutput {
                program,
                exit_code: status.code(),
                success: status.success(),
                stdout,
                stderr,
                duration_ms,
            })
        }
        Outcome::Exited(Err(source)) => Err(ToolError::Spawn { program, source }),
        Outcome::TimedOut => {
            tracing::warn!("`{}` timed out after {:?}", program, stage_timeout);
            Err(ToolError::Timeout {
                program,
                seconds: stage_timeout.as_secs(),
                output: join_streams(&stdout, &stderr),
            })
        }
        Outcome::Cancelled => {
            tracing::info!("`{}` cancelled", program);
            Err(ToolError::Cancelled {
                program,
                output: join_streams(&stdout, &stderr),
            })
        }
    }
}

/// Run a stage's commands in order under one shared deadline.
///
/// Stops at the first non-zero exit unless that invocation allows failure.
pub async fn run_all(
    invocations: &[Invocation],
    stage_timeout: Duration,
    cancel: &CancelSignal,
) -> Result<Vec<ProcessOutput>, ToolError> {
    let deadline = Instant::now() + stage_timeout;
    let mut outputs = Vec::with_capacity(invocations.len());

    for invocation in invocations {
        let output = run_invocation(invocation, deadline, stage_timeout, cancel).await?;
        if !output.success && !invocation.continue_on_failure {
            return Err(ToolError::Failed {
                program: invocation.command_line(),
                code: output.exit_code,
                output: output.combined(),
            });
        }
        outputs.push(output);
    }

    Ok(outputs)
}

fn spawn_reader<R>(stream: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.read_to_end(&mut buf).await {
                tracing::debug!("Output pipe closed with error: {}", e);
            }
        }
        buf
    })
}

async fn drain(task: JoinHandle<Vec<u8>>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            // A grandchild still holds the pipe open
            abort.abort();
            String::new()
        }
    }
}

/// Keep at most `max_bytes` of the end of `output`, where tool errors
/// usually are.
pub fn tail_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut start = output.len() - max_bytes;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("(truncated)...{}", &output[start..])
}
