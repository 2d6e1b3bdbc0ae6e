//! The safety gate: disk space preflight, content hashes, and artifact
//! verification.
//!
//! Verification is the last line of defense before a destructive replace, so
//! it is deliberately layered: basic file checks, a structural probe, an
//! optional comparison against the original, and decode probes of up to
//! three sections of the artifact. Only the opening decode probe is fatal;
//! structural drift and mid/end decode hiccups are reported as warnings.

pub mod hash;
pub mod space;

pub use hash::hash_file;
pub use space::{check_disk_space, required_dest_gb, required_temp_gb};

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Result, SquishError};
use crate::media::{MediaInfo, probe_media};
use crate::util::command::run_command_with_timeout;

/// Timeout for each decode probe.
const PLAYBACK_TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum believable artifact size in bytes.
const MIN_FILE_SIZE: u64 = 1024;

/// Verify a produced artifact before it is allowed to replace a source.
///
/// Returns the list of observed attributes for the final report. Any `Err`
/// is fatal for the owning job; comparison mismatches and mid/end decode
/// failures only log warnings.
pub fn verify_file_integrity(
    path: &Path,
    original: Option<&MediaInfo>,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Vec<String>> {
    info!("Verifying {}", path.display());
    let mut attributes = Vec::new();

    // Basic file checks
    if !path.exists() {
        return Err(SquishError::Integrity("file does not exist".to_string()));
    }
    let file_size = std::fs::metadata(path)?.len();
    if file_size < MIN_FILE_SIZE {
        return Err(SquishError::Integrity(format!(
            "file too small: {} bytes",
            file_size
        )));
    }
    attributes.push(format!(
        "size: {:.2}MB",
        file_size as f64 / (1024.0 * 1024.0)
    ));

    // Structural probe
    let info = probe_media(path, config, cancel)
        .map_err(|e| match e {
            SquishError::Cancelled => SquishError::Cancelled,
            other => SquishError::Integrity(format!("cannot read media information: {}", other)),
        })?;

    let video_streams = info.video_streams();
    let audio_streams = info.audio_streams();
    if video_streams.is_empty() {
        return Err(SquishError::Integrity("no video streams found".to_string()));
    }
    attributes.push(format!(
        "streams: {} video, {} audio",
        video_streams.len(),
        audio_streams.len()
    ));
    if let Some((w, h)) = info.video_dimensions() {
        attributes.push(format!(
            "video: {} {}x{}",
            video_streams[0].codec_name, w, h
        ));
    }

    // Comparison against the original, differences are warnings only
    if let Some(original) = original {
        let orig_video = original.video_streams();
        let orig_audio = original.audio_streams();
        if video_streams.len() != orig_video.len() {
            warn!(
                "Video stream count differs from original: {} vs {}",
                video_streams.len(),
                orig_video.len()
            );
        }
        if audio_streams.len() != orig_audio.len() {
            warn!(
                "Audio stream count differs from original: {} vs {}",
                audio_streams.len(),
                orig_audio.len()
            );
        }
        match (info.video_dimensions(), original.video_dimensions()) {
            (Some(new), Some(orig)) if new != orig => {
                warn!(
                    "Resolution changed: {}x{} -> {}x{}",
                    orig.0, orig.1, new.0, new.1
                );
            }
            (Some(res), Some(_)) => debug!("Resolution preserved: {}x{}", res.0, res.1),
            _ => {}
        }
    }

    // Decode probes
    let duration = info.duration().unwrap_or(0.0);

    // Opening section, required
    playback_test(path, None, Some(5.0), config, cancel).map_err(|e| match e {
        SquishError::Cancelled => SquishError::Cancelled,
        other => SquishError::Integrity(format!("opening playback test failed: {}", other)),
    })?;
    debug!("Opening playback test passed");

    // Middle section, warning only
    if duration > 20.0 {
        let middle_start = duration / 2.0 - 2.5;
        match playback_test(path, Some(middle_start), Some(5.0), config, cancel) {
            Ok(()) => debug!("Middle playback test passed"),
            Err(SquishError::Cancelled) => return Err(SquishError::Cancelled),
            Err(e) => warn!("Middle playback test failed: {}", e),
        }
    }

    // Final section, warning only
    if duration > 10.0 {
        let end_start = (duration - 5.0).max(0.0);
        match playback_test(path, Some(end_start), None, config, cancel) {
            Ok(()) => debug!("End playback test passed"),
            Err(SquishError::Cancelled) => return Err(SquishError::Cancelled),
            Err(e) => warn!("End playback test failed: {}", e),
        }
    }

    info!("Verification passed: {}", attributes.join(" | "));
    Ok(attributes)
}

/// Decode a section of the file to the null muxer.
pub fn playback_test(
    path: &Path,
    start: Option<f64>,
    length: Option<f64>,
    config: &Config,
    cancel: &CancelToken,
) -> Result<()> {
    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.args(["-v", "error"]);
    if let Some(start) = start {
        cmd.arg("-ss").arg(format!("{:.2}", start));
    }
    cmd.arg("-i").arg(path);
    if let Some(length) = length {
        cmd.arg("-t").arg(format!("{}", length));
    }
    cmd.args(["-f", "null", "-"]);

    let output = run_command_with_timeout(&mut cmd, PLAYBACK_TEST_TIMEOUT, cancel)?;
    if !output.status.success() {
        return Err(SquishError::Integrity(format!(
            "decode failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
