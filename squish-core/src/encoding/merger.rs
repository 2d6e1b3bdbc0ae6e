//! Segment concatenation via the concat demuxer.
//!
//! Merging is pure stream copy: compressed segments are listed in a concat
//! file and stitched into one container. The list file and any partial
//! output are removed on every exit path.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Result, SquishError};
use crate::util::command::run_command_with_timeout;
use crate::util::fs::file_size;
use crate::validation::playback_test;

use super::segmentation::segmentation_timeout;

/// Write the concat list for a merge. Paths are absolute so the demuxer
/// resolves them independently of the working directory.
pub fn write_concat_list(segments: &[PathBuf], list_path: &Path) -> Result<()> {
    let mut file = File::create(list_path)?;
    for segment in segments {
        if !segment.exists() {
            return Err(SquishError::Pipeline(format!(
                "segment file not found: {}",
                segment.display()
            )));
        }
        let absolute = std::fs::canonicalize(segment)?;
        // Single quotes inside paths must be closed, escaped, reopened
        let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
        writeln!(file, "file '{}'", escaped)?;
    }
    file.flush()?;
    Ok(())
}

/// Concatenate compressed segments into `output`.
///
/// The caller is responsible for passing segments sorted by ordinal. The
/// merged file is checked for existence, compared against the segment sum
/// (drift beyond the configured percentage is a warning), and decode-probed
/// for 5 seconds.
pub fn merge_segments(
    segments: &[PathBuf],
    output: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<()> {
    if segments.is_empty() {
        return Err(SquishError::Pipeline(
            "no segments provided for merging".to_string(),
        ));
    }

    info!("Merging {} segments into {}", segments.len(), output.display());

    let list_dir = segments[0].parent().unwrap_or_else(|| Path::new("."));
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let concat_file = list_dir.join(format!("concat_list_{}.txt", stem));

    let result = run_merge(segments, output, &concat_file, config, cancel);

    // The list file never outlives the merge
    if concat_file.exists() {
        let _ = std::fs::remove_file(&concat_file);
        debug!("Cleaned up concat list {}", concat_file.display());
    }
    if result.is_err() && output.exists() {
        let _ = std::fs::remove_file(output);
    }

    result
}

fn run_merge(
    segments: &[PathBuf],
    output: &Path,
    concat_file: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<()> {
    write_concat_list(segments, concat_file)?;

    let total_input: u64 = segments.iter().filter_map(|s| file_size(s).ok()).sum();

    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.arg("-y")
        .args(["-f", "concat", "-safe", "0"])
        .arg("-i")
        .arg(concat_file)
        .args(["-c", "copy"])
        .arg(output);

    let total_gb = total_input as f64 / 1024f64.powi(3);
    let timeout = segmentation_timeout(total_gb, config);
    let result = run_command_with_timeout(&mut cmd, timeout, cancel).map_err(|e| match e {
        SquishError::Cancelled => SquishError::Cancelled,
        other => SquishError::Pipeline(format!("merge failed: {}", other)),
    })?;

    if !result.status.success() {
        return Err(SquishError::Pipeline(format!(
            "merge exited with {}: {}",
            result.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&result.stderr)
        )));
    }

    // Verify the merged container
    let merged_size = file_size(output).unwrap_or(0);
    if merged_size == 0 {
        return Err(SquishError::Pipeline(
            "merged output is missing or empty".to_string(),
        ));
    }

    if total_input > 0 {
        let difference = (merged_size as i64 - total_input as i64).unsigned_abs() as f64
            / total_input as f64
            * 100.0;
        let threshold = config.timeout_settings.merge_size_difference_warning_percent;
        if difference > threshold {
            warn!(
                "Merged size drift {:.1}% exceeds {:.1}% - output may have issues",
                difference, threshold
            );
        }
    }

    playback_test(output, None, Some(5.0), config, cancel).map_err(|e| match e {
        SquishError::Cancelled => SquishError::Cancelled,
        other => SquishError::Pipeline(format!("merged output failed playability test: {}", other)),
    })?;

    info!("Merge complete: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_list_uses_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let seg_a = dir.path().join("m_compressed_segment_000.mkv");
        let seg_b = dir.path().join("m_compressed_segment_001.mkv");
        std::fs::write(&seg_a, b"a").unwrap();
        std::fs::write(&seg_b, b"b").unwrap();

        let list = dir.path().join("concat_list_m.txt");
        write_concat_list(&[seg_a.clone(), seg_b.clone()], &list).unwrap();

        let contents = std::fs::read_to_string(&list).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("file '"));
        assert!(lines[0].contains("m_compressed_segment_000.mkv"));
        assert!(lines[1].contains("m_compressed_segment_001.mkv"));
    }

    #[test]
    fn missing_segment_fails_list_creation() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("concat.txt");
        let result = write_concat_list(&[dir.path().join("ghost.mkv")], &list);
        assert!(matches!(result, Err(SquishError::Pipeline(_))));
    }

    #[test]
    fn empty_segment_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let cancel = CancelToken::new();
        let result = merge_segments(&[], &dir.path().join("out.mkv"), &config, &cancel);
        assert!(matches!(result, Err(SquishError::Pipeline(_))));
    }
}
