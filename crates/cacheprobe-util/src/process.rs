//! Process execution helpers for cacheprobe.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::cancel::Cancellation;
use crate::error::UtilError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output is still collected after the child exits. A background
/// process that inherited the pipes can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Structured output from a command execution.
#[derive(Debug)]
pub struct CommandOutput {
    /// Standard output as a string.
    pub stdout: String,
    /// Standard error as a string.
    pub stderr: String,
    /// Whether the command exited successfully.
    pub success: bool,
    /// The exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
}

/// Execute a command, killing it as soon as `cancel` fires.
///
/// Stdout and stderr are drained on background threads so a chatty child
/// cannot block on a full pipe while we poll for its exit. Once the child
/// has exited, output is collected for a short grace period.
///
/// # Errors
/// Returns an error if the command cannot be spawned or waited on, or the
/// cancellation error if the pass was cancelled while the child was running.
/// A non-zero exit code is **not** an error.
pub fn run_command_cancellable(
    cmd: &mut Command,
    cancel: &Cancellation,
) -> Result<CommandOutput, UtilError> {
    cancel.check()?;

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| UtilError::CommandExec { source })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = loop {
        if let Err(stop) = cancel.check() {
            tracing::debug!(pid = child.id(), "killing cancelled child process");
            let _ = child.kill();
            let _ = child.wait();
            return Err(stop);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                return Err(UtilError::CommandExec { source });
            }
        }
    };

    let until = Instant::now() + DRAIN_GRACE;
    Ok(CommandOutput {
        stdout: collect(stdout, until),
        stderr: collect(stderr, until),
        success: status.success(),
        exit_code: status.code(),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = buf.get(..n).unwrap_or_default().to_vec();
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Gather drained chunks until the stream closes or `until` passes.
fn collect(rx: Option<Receiver<Vec<u8>>>, until: Instant) -> String {
    let Some(rx) = rx else {
        return String::new();
    };
    let mut bytes = Vec::new();
    loop {
        let wait = until.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("output pipe still open after child exit, truncating");
                break;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_an_exec_error() {
        let result = run_command_cancellable(
            &mut Command::new("nonexistent_binary_xyz_123"),
            &Cancellation::new(),
        );
        assert!(matches!(result, Err(UtilError::CommandExec { .. })));
    }

    #[test]
    fn cancellable_captures_both_streams() {
        let output = run_command_cancellable(
            Command::new("sh").arg("-c").arg("echo out; echo err >&2; exit 3"),
            &Cancellation::new(),
        )
        .unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert!(output.stderr.contains("err"));
    }

    #[test]
    fn cancellable_kills_child_on_cancel() {
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let started = Instant::now();
        let result = run_command_cancellable(Command::new("sleep").arg("30"), &cancel);
        canceller.join().unwrap();

        assert!(matches!(result, Err(UtilError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancellable_honours_deadline() {
        let cancel = Cancellation::with_timeout(Duration::from_millis(100));
        let result = run_command_cancellable(Command::new("sleep").arg("30"), &cancel);
        assert!(matches!(result, Err(UtilError::DeadlineExceeded { .. })));
    }

    #[test]
    fn background_grandchild_does_not_hold_the_pass() {
        let started = Instant::now();
        let output = run_command_cancellable(
            Command::new("sh").arg("-c").arg("sleep 30 & echo done"),
            &Cancellation::new(),
        )
        .unwrap();

        assert!(output.success);
        assert_eq!(output.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancellable_refuses_to_start_when_already_cancelled() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = run_command_cancellable(&mut Command::new("true"), &cancel);
        assert!(matches!(result, Err(UtilError::Cancelled)));
    }
}
