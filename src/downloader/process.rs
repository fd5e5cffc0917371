use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use crate::errors::{AppError, Result};

/// Exit status and captured output of a finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the child was killed after the timeout.
    pub status: Option<ExitStatus>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map_or(false, |s| s.success())
    }

    /// Last few stderr lines, for error messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let start = self.stderr_lines.len().saturating_sub(lines);
        self.stderr_lines[start..].join("\n")
    }
}

fn collect_lines<R>(reader: Option<R>) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = Vec::new();
        if let Some(reader) = reader {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
        }
        collected
    })
}

/// How long captured output may keep flowing after the child is gone.
/// Grandchildren that inherited the pipes can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

async fn join_lines(mut task: JoinHandle<Vec<String>>, until: Instant) -> Vec<String> {
    match tokio::time::timeout_at(until, &mut task).await {
        Ok(lines) => lines.unwrap_or_default(),
        Err(_) => {
            task.abort();
            log::debug!("[PROCESS] output still open after the child exited, dropping the rest");
            Vec::new()
        }
    }
}

/// Runs `program` with `args`, killing it once `timeout` elapses.
///
/// Spawn failures (missing binary, permissions) are errors; a non-zero exit
/// or a timeout is reported through [`ProcessOutput`].
pub async fn run_with_timeout<I, S>(program: &str, args: I, timeout: Duration) -> Result<ProcessOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Process(format!("failed to start {}: {}", program, e)))?;

    let stdout_task = collect_lines(child.stdout.take());
    let stderr_task = collect_lines(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let (status, timed_out) = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(status) => (Some(status?), false),
        Err(_) => {
            log::error!("⏱️ [PROCESS] {} timed out after {}s, killing", program, timeout.as_secs());
            let _ = child.kill().await;
            (None, true)
        }
    };

    let drain_until = deadline.max(Instant::now()) + DRAIN_GRACE;
    let stdout_lines = join_lines(stdout_task, drain_until).await;
    let stderr_lines = join_lines(stderr_task, drain_until).await;
    log::debug!(
        "📊 [PROCESS] {} finished: status={:?} stdout={} lines stderr={} lines",
        program,
        status,
        stdout_lines.len(),
        stderr_lines.len()
    );

    Ok(ProcessOutput {
        status,
        stdout_lines,
        stderr_lines,
        timed_out,
    })
}

/// True when the command starts and exits 0 within `timeout`.
pub async fn probe_command(program: &str, args: &[&str], timeout: Duration) -> bool {
    match run_with_timeout(program, args, timeout).await {
        Ok(output) => output.success(),
        Err(e) => {
            log::debug!("[PROCESS] probe of {} failed: {}", program, e);
            false
        }
    }
}

/// First non-empty stdout line of `program --version`-style invocations.
pub async fn command_version(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
    let output = run_with_timeout(program, args, timeout).await.ok()?;
    if !output.success() {
        return None;
    }
    output
        .stdout_lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .find(|line| !line.is_empty())
}
