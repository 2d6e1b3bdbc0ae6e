//! Transcoder execution with progress monitoring.
//!
//! Runs one ffmpeg encode, parsing `time=`, `fps=` and `size=...kB` tokens
//! off stderr into a progress fraction against the source duration. The
//! caller's callback fires when the fraction grows by at least half a
//! percentage point, or after a 10-second quiet period so stalls stay
//! visible. Cancellation and the per-call timeout terminate the child.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::cancel::CancelToken;
use crate::error::{Result, SquishError};
use crate::util::command::{log_command, stderr_tail, terminate_child};

/// Minimum fraction growth before another callback fires.
const PROGRESS_STEP: f64 = 0.005;

/// Re-emit the last known state after this long without encoder output.
const QUIET_PERIOD: Duration = Duration::from_secs(10);

/// How much stderr is attached to failure reports.
const STDERR_TAIL_BYTES: usize = 500;

/// Stderr lines retained for the failure tail.
const MAX_RETAINED_LINES: usize = 200;

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());
static FPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"fps=\s*([\d.]+)").unwrap());
static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"size=\s*(\d+)kB").unwrap());

/// One parsed progress line from the encoder's stderr.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressLine {
    pub seconds: f64,
    pub fps: Option<f64>,
    pub size_kb: Option<u64>,
}

/// Parse a `-stats` line; `None` when the line carries no time token.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;

    Some(ProgressLine {
        seconds: hours * 3600.0 + minutes * 60.0 + seconds,
        fps: FPS_RE
            .captures(line)
            .and_then(|c| c[1].parse().ok()),
        size_kb: SIZE_RE
            .captures(line)
            .and_then(|c| c[1].parse().ok()),
    })
}

/// True for stderr lines that look like encoder failures.
fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("error") || lower.contains("failed")
}

enum StderrEvent {
    Progress {
        fraction: f64,
        fps: f64,
        bytes: Option<u64>,
    },
    ErrorLine(String),
}

/// Run one encode to completion.
///
/// `on_progress` receives `(fraction, fps, processed_bytes)`. The run fails
/// on non-zero exit (with the stderr tail attached), on an empty or missing
/// output file, on timeout, and on cancellation.
pub fn run_encode(
    mut cmd: Command,
    output: &Path,
    duration_secs: f64,
    timeout: Duration,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(f64, f64, Option<u64>),
) -> Result<()> {
    log_command(&cmd);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SquishError::Command(format!("failed to spawn ffmpeg: {}", e)))?;

    let stderr = child.stderr.take().expect("stderr was piped");
    let (tx, rx) = mpsc::channel();

    let reader = std::thread::spawn(move || {
        use std::io::{BufRead, BufReader};
        let mut lines: Vec<String> = Vec::new();
        let mut last_sent = 0.0f64;
        let mut last_fps = 0.0f64;

        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }

            if let Some(parsed) = parse_progress_line(&line) {
                if duration_secs > 0.0 {
                    let fraction = (parsed.seconds / duration_secs).min(1.0);
                    let fps = parsed.fps.unwrap_or(last_fps);
                    last_fps = fps;
                    if fraction >= last_sent + PROGRESS_STEP {
                        last_sent = fraction;
                        let _ = tx.send(StderrEvent::Progress {
                            fraction,
                            fps,
                            bytes: parsed.size_kb.map(|kb| kb * 1024),
                        });
                    }
                }
            } else if is_error_line(&line) {
                let _ = tx.send(StderrEvent::ErrorLine(line.clone()));
            }

            if lines.len() == MAX_RETAINED_LINES {
                lines.remove(0);
            }
            lines.push(line);
        }
        lines
    });

    let start = Instant::now();
    let mut last_error: Option<String> = None;
    let mut last_state: Option<(f64, f64, Option<u64>)> = None;
    let mut last_emit = Instant::now();
    let mut stderr_open = true;

    let status = loop {
        if stderr_open {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(StderrEvent::Progress { fraction, fps, bytes }) => {
                    last_state = Some((fraction, fps, bytes));
                    last_emit = Instant::now();
                    on_progress(fraction, fps, bytes);
                }
                Ok(StderrEvent::ErrorLine(line)) => {
                    debug!("Encoder error line: {}", line);
                    last_error = Some(line);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => stderr_open = false,
            }
        } else {
            std::thread::sleep(Duration::from_millis(100));
        }

        // Keep observers alive through long quiet stretches
        if last_emit.elapsed() >= QUIET_PERIOD {
            last_emit = Instant::now();
            if let Some((fraction, fps, bytes)) = last_state {
                on_progress(fraction, fps, bytes);
            }
        }

        if cancel.is_cancelled() {
            terminate_child(&mut child);
            let _ = reader.join();
            return Err(SquishError::Cancelled);
        }
        if start.elapsed() >= timeout {
            terminate_child(&mut child);
            let _ = reader.join();
            return Err(SquishError::Encode {
                reason: format!("encode timed out after {}s", timeout.as_secs()),
                stderr_tail: String::new(),
            });
        }

        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                terminate_child(&mut child);
                let _ = reader.join();
                return Err(SquishError::Command(format!(
                    "error waiting for ffmpeg: {}",
                    e
                )));
            }
        }
    };

    let lines = reader.join().unwrap_or_default();
    let tail = stderr_tail(lines.join("\n").as_bytes(), STDERR_TAIL_BYTES);

    if !status.success() {
        let reason = match last_error {
            Some(line) => format!(
                "ffmpeg exited with code {}: {}",
                status.code().unwrap_or(-1),
                line
            ),
            None => format!("ffmpeg exited with code {}", status.code().unwrap_or(-1)),
        };
        warn!("{}", reason);
        return Err(SquishError::Encode {
            reason,
            stderr_tail: tail,
        });
    }

    // Exit 0 with no usable output is still a failure
    let output_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    if output_size == 0 {
        return Err(SquishError::Encode {
            reason: "empty output".to_string(),
            stderr_tail: tail,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_stats_line() {
        let line = "frame= 1234 fps= 48 q=28.0 size=   10240kB time=00:01:30.50 bitrate=1000.0kbits/s speed=1.5x";
        let parsed = parse_progress_line(line).unwrap();
        assert!((parsed.seconds - 90.5).abs() < 1e-9);
        assert_eq!(parsed.fps, Some(48.0));
        assert_eq!(parsed.size_kb, Some(10240));
    }

    #[test]
    fn parses_line_without_fps_or_size() {
        let line = "time=01:00:00.00 bitrate=N/A";
        let parsed = parse_progress_line(line).unwrap();
        assert_eq!(parsed.seconds, 3600.0);
        assert_eq!(parsed.fps, None);
        assert_eq!(parsed.size_kb, None);
    }

    #[test]
    fn non_progress_lines_are_ignored() {
        assert!(parse_progress_line("Stream mapping:").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn error_lines_are_detected() {
        assert!(is_error_line("Error while decoding stream #0:0"));
        assert!(is_error_line("Conversion failed!"));
        assert!(!is_error_line("frame= 100 fps= 30"));
    }

    #[test]
    fn failing_command_reports_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mkv");
        // 'false' exits 1 without producing output
        let cmd = Command::new("false");
        let cancel = CancelToken::new();
        let mut updates = Vec::new();
        let result = run_encode(
            cmd,
            &output,
            10.0,
            Duration::from_secs(30),
            &cancel,
            &mut |f, _, _| updates.push(f),
        );
        assert!(matches!(result, Err(SquishError::Encode { .. })));
        assert!(updates.is_empty());
    }

    #[test]
    fn successful_command_with_empty_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mkv");
        std::fs::write(&output, b"").unwrap();

        let cmd = Command::new("true");
        let cancel = CancelToken::new();
        let result = run_encode(
            cmd,
            &output,
            10.0,
            Duration::from_secs(30),
            &cancel,
            &mut |_, _, _| {},
        );
        match result {
            Err(SquishError::Encode { reason, .. }) => assert_eq!(reason, "empty output"),
            other => panic!("expected empty-output failure, got {:?}", other),
        }
    }

    #[test]
    fn successful_command_with_output_passes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mkv");
        std::fs::write(&output, vec![0u8; 4096]).unwrap();

        let cmd = Command::new("true");
        let cancel = CancelToken::new();
        let result = run_encode(
            cmd,
            &output,
            10.0,
            Duration::from_secs(30),
            &cancel,
            &mut |_, _, _| {},
        );
        assert!(result.is_ok());
    }

    #[test]
    fn cancellation_interrupts_encode() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mkv");
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        let result = run_encode(
            cmd,
            &output,
            10.0,
            Duration::from_secs(60),
            &cancel,
            &mut |_, _, _| {},
        );
        assert!(matches!(result, Err(SquishError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(20));
    }
}
