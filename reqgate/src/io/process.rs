//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep draining pipes after the child is gone. Grandchildren
/// (ssh, remote helpers) can hold the pipes open past the child's exit.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is drained on reader threads while the child runs; bytes beyond
/// `output_limit_bytes` are discarded. A child that outlives `timeout` is
/// killed and reported with `timed_out = true`; output still held open by
/// its descendants is abandoned after a short grace period, so the call
/// returns within `timeout` plus that grace.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

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

    let deadline = Instant::now() + timeout;
    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let drain_by = if timed_out {
        Instant::now() + DRAIN_GRACE
    } else {
        deadline.max(Instant::now() + DRAIN_GRACE)
    };
    let stdout = collect_output(&stdout_rx, drain_by, "stdout")?;
    let stderr = collect_output(&stderr_rx, drain_by, "stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // Receiver may be gone if the output was abandoned.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Wait for a reader until `drain_by`; a pipe still open then is abandoned.
fn collect_output(
    rx: &Receiver<Result<Vec<u8>>>,
    drain_by: Instant,
    label: &str,
) -> Result<Vec<u8>> {
    match rx.recv_timeout(drain_by.saturating_duration_since(Instant::now())) {
        Ok(result) => result.with_context(|| format!("read {label}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream = label, "pipe held open by a descendant, abandoning output");
            Ok(Vec::new())
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(anyhow!("{label} reader thread panicked"))
        }
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_stream_limited_truncates() {
        let data = vec![b'x'; 20_000];
        let buf = read_stream_limited(data.as_slice(), 10).expect("read");
        assert_eq!(buf.len(), 10);
    }

    /// A background grandchild keeps the pipes open after the shell is killed.
    #[test]
    fn timeout_is_not_extended_by_descendants_holding_pipes() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 8 & wait"]);
        let started = Instant::now();
        let out = run_command_with_timeout(cmd, Duration::from_secs(1), 1024).expect("run");
        assert!(out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn captures_output_of_quick_command() {
        let mut cmd = Command::new("git");
        cmd.arg("--version");
        let out = run_command_with_timeout(cmd, Duration::from_secs(30), 1024).expect("run");
        assert!(out.status.success());
        assert!(!out.timed_out);
        assert!(String::from_utf8_lossy(&out.stdout).starts_with("git version"));
    }
}
