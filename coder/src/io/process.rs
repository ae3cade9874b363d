//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::EngineError;

/// How long output readers may keep draining after the child has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Detached: a child that stops reading must not stall the timeout below.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                warn!(err = %e, "failed to write stdin");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_group(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let drain_deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
    let (stdout, stdout_truncated) = collect_output(&stdout_rx, drain_deadline, "stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx, drain_deadline, "stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Result of a shell command run by a step handler. Never an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Why the run is considered failed (timeout, spawn error, non-zero exit).
    pub failure: Option<EngineError>,
}

impl ShellRun {
    pub fn ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Run `command` through `sh -c` in `cwd`, folding every failure mode into [`ShellRun`].
#[instrument(skip_all, fields(cwd = %cwd.display(), timeout_secs = timeout.as_secs()))]
pub fn run_shell(command: &str, cwd: &Path, timeout: Duration, output_limit_bytes: usize) -> ShellRun {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd);

    let output = match run_command_with_timeout(cmd, None, timeout, output_limit_bytes) {
        Ok(output) => output,
        Err(err) => {
            return ShellRun {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                failure: Some(EngineError::SubprocessError(format!("{err:#}"))),
            };
        }
    };

    let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
    stdout.push_str(&output.stdout_truncated_notice("command"));
    let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
    stderr.push_str(&output.stderr_truncated_notice("command"));
    let exit_code = output.status.code();

    let failure = if output.timed_out {
        Some(EngineError::SubprocessTimeout(timeout))
    } else if !output.status.success() {
        Some(EngineError::SubprocessError(match exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        }))
    } else {
        None
    };

    ShellRun {
        stdout,
        stderr,
        exit_code,
        failure,
    }
}

type Captured = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<Captured> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Wait until `deadline` for a reader once the child is gone.
///
/// A descendant that escaped the kill can hold the pipe open indefinitely;
/// its output is then dropped.
fn collect_output(
    rx: &Receiver<Captured>,
    deadline: Instant,
    stream: &str,
) -> Result<(Vec<u8>, usize)> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe still open after child exit; abandoning output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{stream} reader thread panicked")),
    }
}

/// Kill the child and everything it spawned (the child leads its own process group).
fn kill_process_group(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => warn!(?status, "killing process group failed; killing child only"),
            Err(e) => warn!(err = %e, "could not run kill; killing child only"),
        }
    }
    child.kill().context("kill command")
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
