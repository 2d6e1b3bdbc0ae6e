//! External command execution.
//!
//! All ffmpeg/ffprobe invocations flow through here. Commands are spawned
//! with piped output, drained by reader threads, and waited on with a poll
//! loop so timeouts and cancellation can interrupt them. Children are
//! terminated gracefully (SIGTERM, then SIGKILL after a grace period) so the
//! transcoder gets a chance to flush and exit.

use std::io::{BufReader, Read};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, SquishError};

/// Poll interval for the try-wait loop.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// How long a terminated child gets before it is killed outright.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Log a command at debug level before running it.
pub fn log_command(cmd: &Command) {
    debug!("Running command: {:?}", cmd);
}

/// Execute a command to completion and return its output.
///
/// Fails when the command cannot be spawned or exits non-zero; stderr is
/// included in the error message.
pub fn run_command(cmd: &mut Command) -> Result<Output> {
    log_command(cmd);

    let output = cmd.output().map_err(|e| {
        error!("Failed to execute command: {}", e);
        SquishError::Command(format!("failed to execute command: {}", e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "Command failed with exit code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr
        );
        return Err(SquishError::Command(format!(
            "command failed with exit code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr
        )));
    }

    Ok(output)
}

/// Execute a command with a hard timeout and cooperative cancellation.
///
/// Output is drained by reader threads while the main thread polls the child.
/// On timeout or cancel the child is terminated and the call returns an
/// error; the partially captured output is discarded.
pub fn run_command_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Output> {
    log_command(cmd);

    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SquishError::Command(format!("failed to spawn command: {}", e)))?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = BufReader::new(stdout).read_to_end(&mut buf);
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = BufReader::new(stderr).read_to_end(&mut buf);
        buf
    });

    let start = Instant::now();
    let status = loop {
        if cancel.is_cancelled() {
            terminate_child(&mut child);
            return Err(SquishError::Cancelled);
        }
        if start.elapsed() >= timeout {
            terminate_child(&mut child);
            return Err(SquishError::Command(format!(
                "command timed out after {} seconds",
                timeout.as_secs()
            )));
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(WAIT_POLL),
            Err(e) => {
                return Err(SquishError::Command(format!(
                    "error waiting for process: {}",
                    e
                )));
            }
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

/// Terminate a child process: SIGTERM first, SIGKILL when the grace period
/// expires. On non-unix platforms there is no soft termination, so the child
/// is killed directly.
pub fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        let start = Instant::now();
        while start.elapsed() < KILL_GRACE {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(WAIT_POLL),
                Err(_) => break,
            }
        }
        warn!("Child {} did not exit after SIGTERM, killing", pid);
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Last `max_bytes` of a stderr capture, for failure reports.
pub fn stderr_tail(stderr: &[u8], max_bytes: usize) -> String {
    let start = stderr.len().saturating_sub(max_bytes);
    String::from_utf8_lossy(&stderr[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_captures_stdout() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let output = run_command(&mut cmd).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[test]
    fn run_command_reports_nonzero_exit() {
        let mut cmd = Command::new("false");
        assert!(run_command(&mut cmd).is_err());
    }

    #[test]
    fn timeout_kills_long_running_command() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = CancelToken::new();
        let start = Instant::now();
        let result = run_command_with_timeout(&mut cmd, Duration::from_millis(300), &cancel);
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn cancel_interrupts_command() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run_command_with_timeout(&mut cmd, Duration::from_secs(60), &cancel);
        assert!(matches!(result, Err(SquishError::Cancelled)));
    }

    #[test]
    fn stderr_tail_truncates_from_front() {
        let data = b"abcdefghij";
        assert_eq!(stderr_tail(data, 4), "ghij");
        assert_eq!(stderr_tail(data, 100), "abcdefghij");
    }
}
