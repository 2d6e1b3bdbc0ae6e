//! ffprobe invocation.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Result, SquishError};
use crate::media::info::MediaInfo;
use crate::util::command::run_command_with_timeout;
use crate::util::fs::file_size_gb;

/// Probe timeout, scaled with file size when extended timeouts are enabled:
/// `max(30, 30 + size_gb * 15)` seconds.
pub fn probe_timeout(size_gb: f64, config: &Config) -> Duration {
    let secs = if config.large_file_settings.extended_timeouts {
        (30.0 + size_gb * 15.0).max(30.0)
    } else {
        30.0
    };
    Duration::from_secs(secs as u64)
}

/// Probe a media file with ffprobe and parse the JSON output.
pub fn probe_media(path: &Path, config: &Config, cancel: &CancelToken) -> Result<MediaInfo> {
    if !path.exists() {
        return Err(SquishError::InvalidPath(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let size_gb = file_size_gb(path)?;
    let timeout = probe_timeout(size_gb, config);
    debug!(
        "Probing {} (timeout: {}s)",
        path.display(),
        timeout.as_secs()
    );

    let mut cmd = Command::new(config.ffprobe_path());
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path);

    let output = run_command_with_timeout(&mut cmd, timeout, cancel).map_err(|e| match e {
        SquishError::Cancelled => SquishError::Cancelled,
        other => SquishError::Probe(other.to_string()),
    })?;

    if !output.status.success() {
        return Err(SquishError::Probe(format!(
            "ffprobe exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let json: Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| SquishError::Probe(format!("non-JSON ffprobe output: {}", e)))?;

    MediaInfo::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_scales_with_size() {
        let config = Config::default();
        assert_eq!(probe_timeout(0.0, &config), Duration::from_secs(30));
        assert_eq!(probe_timeout(2.0, &config), Duration::from_secs(60));
        assert_eq!(probe_timeout(12.0, &config), Duration::from_secs(210));
    }

    #[test]
    fn timeout_is_flat_without_extended_timeouts() {
        let mut config = Config::default();
        config.large_file_settings.extended_timeouts = false;
        assert_eq!(probe_timeout(12.0, &config), Duration::from_secs(30));
    }

    #[test]
    fn missing_file_is_invalid_path() {
        let config = Config::default();
        let cancel = CancelToken::new();
        let result = probe_media(Path::new("/nonexistent/clip.mkv"), &config, &cancel);
        assert!(matches!(result, Err(SquishError::InvalidPath(_))));
    }
}
