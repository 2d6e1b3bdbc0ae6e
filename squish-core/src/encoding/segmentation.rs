//! Container segmentation by stream copy.
//!
//! Large inputs are cut into fixed-duration parts with ffmpeg's segment
//! muxer. No re-encoding happens here; segments carry all streams of the
//! original with timestamps reset so each part stands alone.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use log::{info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Result, SquishError};
use crate::util::command::run_command_with_timeout;
use crate::util::fs::{file_size, file_size_gb};

/// Segmentation timeout, scaled with input size:
/// `max(min_minutes * 60, size_gb * minutes_per_gb * 60)` seconds.
pub fn segmentation_timeout(size_gb: f64, config: &Config) -> Duration {
    let s = &config.segmentation_settings;
    let secs = (s.min_segmentation_timeout_minutes * 60.0)
        .max(size_gb * s.segmentation_timeout_minutes_per_gb * 60.0);
    Duration::from_secs(secs as u64)
}

/// The ordinal encoded in a segment file name, e.g. `movie_segment_007.mkv`
/// yields 7.
pub fn segment_ordinal(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let idx = stem.rfind("_segment_")?;
    stem[idx + "_segment_".len()..].parse().ok()
}

/// Path for a segment's compressed counterpart:
/// `<stem>_segment_NNN<ext>` becomes `<stem>_compressed_segment_NNN<ext>`.
pub fn compressed_segment_path(segment: &Path) -> PathBuf {
    let name = segment.file_name().unwrap_or_default().to_string_lossy();
    segment.with_file_name(name.replace("_segment_", "_compressed_segment_").to_string())
}

/// Cut `input` into fixed-duration parts inside `segments_dir`.
///
/// Returns the segment paths sorted by ordinal. The sum of segment sizes is
/// compared against the original; drift beyond the configured percentage is
/// a warning, not a failure.
pub fn segment_video(
    input: &Path,
    segments_dir: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Vec<PathBuf>> {
    let segment_duration = config.segmentation_settings.segment_duration_seconds;
    info!(
        "Segmenting {} into {}s parts",
        input.display(),
        segment_duration
    );

    let stem = input
        .file_stem()
        .ok_or_else(|| SquishError::InvalidPath(format!("no file stem: {}", input.display())))?
        .to_string_lossy()
        .into_owned();
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let pattern = segments_dir.join(format!("{}_segment_%03d{}", stem, ext));

    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-c", "copy", "-map", "0"])
        .args(["-segment_time", &segment_duration.to_string()])
        .args(["-f", "segment", "-reset_timestamps", "1"])
        .arg(&pattern);

    let size_gb = file_size_gb(input)?;
    let timeout = segmentation_timeout(size_gb, config);
    let output = run_command_with_timeout(&mut cmd, timeout, cancel).map_err(|e| match e {
        SquishError::Cancelled => SquishError::Cancelled,
        other => SquishError::Pipeline(format!("segmentation failed: {}", other)),
    })?;

    if !output.status.success() {
        return Err(SquishError::Pipeline(format!(
            "segmentation exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // Collect the parts the muxer wrote
    let prefix = format!("{}_segment_", stem);
    let mut segments: Vec<PathBuf> = std::fs::read_dir(segments_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && !n.contains("_compressed_"))
        })
        .collect();
    segments.sort_by_key(|p| segment_ordinal(p).unwrap_or(usize::MAX));

    if segments.is_empty() {
        return Err(SquishError::Pipeline(
            "no segment files were created".to_string(),
        ));
    }

    // Size sanity check against the original
    let original_size = file_size(input)?;
    let total: u64 = segments.iter().filter_map(|s| file_size(s).ok()).sum();
    let difference =
        (total as i64 - original_size as i64).unsigned_abs() as f64 / original_size as f64 * 100.0;
    let threshold = config.segmentation_settings.size_difference_warning_percent;
    if difference > threshold {
        warn!(
            "Segment size drift {:.1}% exceeds {:.1}% - segments may have issues",
            difference, threshold
        );
    }

    info!("Created {} segments", segments.len());
    Ok(segments)
}
