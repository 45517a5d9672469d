//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may keep going after a killed child, when
/// descendants still hold the pipes open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

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
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn truncated_notice(&self, label: &str) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        notice
    }

    /// Successful exit within the timeout.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is fed and output is drained on helper threads while the child runs.
/// `output_limit_bytes` bounds the amount of stdout/stderr kept in memory; bytes
/// beyond it are discarded while still draining the pipe. On timeout the child
/// is killed and `timed_out` is set.
///
/// Descendants of the child may inherit its stdout/stderr. Output collection
/// therefore stops at the timeout (or [`DRAIN_GRACE`] after a kill) even if
/// the pipes are still open, and whatever was read so far is returned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
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

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // A child that exits without reading stdin closes the pipe early.
                if let Err(e) = child_stdin.write_all(&input) {
                    debug!(err = %e, "stdin closed before prompt was fully written");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    let started = Instant::now();
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

    let grace_deadline = Instant::now() + DRAIN_GRACE;
    let drain_deadline = match started.checked_add(timeout) {
        Some(deadline) if !timed_out => deadline.max(grace_deadline),
        _ => grace_deadline,
    };
    let mut open_streams = 2;
    while open_streams > 0 {
        let wait = drain_deadline.saturating_duration_since(Instant::now());
        if done_rx.recv_timeout(wait).is_err() {
            warn!(
                open_streams,
                "output pipes still held by descendants, returning captured output"
            );
            break;
        }
        open_streams -= 1;
    }

    if let Some(handle) = stdin_handle
        && handle.is_finished()
        && handle.join().is_err()
    {
        return Err(anyhow!("stdin writer thread panicked"));
    }
    let (stdout, stdout_truncated) = take_capture(&stdout_capture).context("read stdout")?;
    let (stderr, stderr_truncated) = take_capture(&stderr_capture).context("read stderr")?;

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

#[derive(Debug, Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: usize,
    error: Option<String>,
}

/// Drain `reader` on a helper thread into a shared buffer, signalling `done`
/// at end of stream.
fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    done: Sender<()>,
) -> Arc<Mutex<Capture>> {
    let capture = Arc::new(Mutex::new(Capture::default()));
    let shared = Arc::clone(&capture);
    thread::spawn(move || {
        if let Err(e) = read_stream_limited(reader, limit, &shared) {
            lock(&shared).error = Some(format!("{e:#}"));
        }
        // The receiver is gone once the caller stopped waiting.
        let _ = done.send(());
    });
    capture
}

fn take_capture(capture: &Mutex<Capture>) -> Result<(Vec<u8>, usize)> {
    let mut capture = lock(capture);
    if let Some(err) = capture.error.take() {
        return Err(anyhow!(err));
    }
    Ok((std::mem::take(&mut capture.buf), capture.truncated))
}

fn lock(capture: &Mutex<Capture>) -> std::sync::MutexGuard<'_, Capture> {
    capture.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, capture: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut capture = lock(capture);
        let remaining = limit.saturating_sub(capture.buf.len());
        let keep = n.min(remaining);
        capture.buf.extend_from_slice(&chunk[..keep]);
        capture.truncated += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn pipes_stdin_to_stdout() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"hello prompt"),
            Duration::from_secs(10),
            1_000,
        )
        .expect("run cat");
        assert!(output.succeeded());
        assert_eq!(output.stdout_lossy(), "hello prompt");
    }

    #[test]
    fn truncates_beyond_limit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'abcdefghij'");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(10), 4).expect("run sh");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.truncated_notice("agent").contains("truncated 6 bytes"));
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_command_with_timeout(cmd, None, Duration::from_millis(100), 100)
            .expect("run sleep");
        assert!(output.timed_out);
        assert!(!output.succeeded());
    }

    #[test]
    fn timeout_is_not_extended_by_descendants_holding_pipes() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo early; sleep 4; echo late");
        let started = Instant::now();
        let output = run_command_with_timeout(cmd, None, Duration::from_millis(200), 1_000)
            .expect("run sh");

        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(output.stdout_lossy(), "early\n");
    }
}
