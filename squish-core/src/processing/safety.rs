//! The per-file safety protocol.
//!
//! Every replacement, whether of a small file or a merged large file, walks
//! the same line: space check, temp directory, source hash, probe, produce,
//! verify, atomic replace, re-verify, delete source, cleanup. No step
//! touches the source until the moved artifact has passed verification in
//! its final location, so any failure leaves the source intact on disk.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::config::Config;
use crate::encoding::args::build_encode_command;
use crate::encoding::encoder::run_encode;
use crate::encoding::merger::merge_segments;
use crate::encoding::parallel::run_pool;
use crate::encoding::segmentation::{compressed_segment_path, segment_video};
use crate::error::{Result, SquishError};
use crate::media::{MediaInfo, probe_media};
use crate::processing::ProcessContext;
use crate::progress::SegmentInfo;
use crate::temp_files::{
    cleanup_job_artifacts, compressed_name, compression_temp_dir, final_output_path,
    segments_temp_dir,
};
use crate::utils::format_bytes;
use crate::util::fs::{file_size, move_file};
use crate::validation::{check_disk_space, hash_file, verify_file_integrity};

/// Result of one successful replacement.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl FileOutcome {
    pub fn space_saved(&self) -> i64 {
        self.original_size as i64 - self.compressed_size as i64
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }
}

/// Segmentation is required iff BOTH the size and duration thresholds are
/// exceeded.
pub fn should_segment(size_gb: f64, duration_secs: f64, config: &Config) -> bool {
    let size_exceeds = size_gb > config.large_file_settings.segmentation_threshold_gb;
    let duration_exceeds =
        duration_secs > config.segmentation_settings.duration_threshold_minutes * 60.0;
    size_exceeds && duration_exceeds
}

/// Run the full protocol for one file. On any error the source is left
/// untouched and the temp directories are removed.
pub fn process_file(path: &Path, ctx: &ProcessContext) -> Result<FileOutcome> {
    ctx.cancel.check()?;

    if !path.exists() {
        return Err(SquishError::Preflight(format!(
            "file does not exist: {}",
            path.display()
        )));
    }

    let size = file_size(path)?;
    info!(
        "Processing: {} ({})",
        path.file_name().unwrap_or_default().to_string_lossy(),
        format_bytes(size)
    );

    // Step 1: fail fast on missing disk space
    check_disk_space(path, &ctx.config)?;

    // Step 2: the job owns its temp directory for the whole protocol
    let temp_dir = compression_temp_dir(path, &ctx.config);
    ctx.temp.create_dir(&temp_dir)?;

    let result = produce_and_replace(path, size, &temp_dir, ctx);

    // Step 9: this job's temp artifacts never outlive it. Only stem-owned
    // files are touched; jobs from the same directory share the temp dirs.
    cleanup_job_artifacts(path, &ctx.config);

    result
}

fn produce_and_replace(
    path: &Path,
    size: u64,
    temp_dir: &Path,
    ctx: &ProcessContext,
) -> Result<FileOutcome> {
    // Step 3: remember what the source looked like
    if ctx.config.safety_settings.create_backup_hash {
        let hash = hash_file(path, &ctx.config)?;
        debug!("Source hash: {}", hash);
    }

    // Step 4: probe the source for comparison after the replace
    let probe = probe_media(path, &ctx.config, &ctx.cancel)?;

    // Step 5: produce the artifact in the temp directory
    let size_gb = size as f64 / 1024f64.powi(3);
    let duration = probe.duration().unwrap_or(0.0);
    let artifact = if should_segment(size_gb, duration, &ctx.config) {
        compress_with_segmentation(path, &probe, ctx)?
    } else {
        let artifact = temp_dir.join(compressed_name(path));
        encode_with_retries(path, &artifact, &probe, size, ctx)?;
        artifact
    };

    // Steps 6 to 8
    finalize_replace(&artifact, path, &probe, ctx)
}

/// Encode one whole file into `artifact`, retrying per configuration.
fn encode_with_retries(
    input: &Path,
    artifact: &Path,
    probe: &MediaInfo,
    size: u64,
    ctx: &ProcessContext,
) -> Result<()> {
    let id = input.to_string_lossy().into_owned();
    let label = format!(
        "Compressing {}",
        input.file_name().unwrap_or_default().to_string_lossy()
    );
    ctx.aggregator.register(&id, label, size, None);

    let duration = probe.duration().unwrap_or(0.0);
    let attempts = ctx.config.safety_settings.max_retries.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if ctx.cancel.is_cancelled() {
            ctx.aggregator.fail(&id, "cancelled");
            return Err(SquishError::Cancelled);
        }

        let (cmd, _choice) =
            build_encode_command(input, artifact, probe, &ctx.config, ctx.hw.as_ref());
        let aggregator = &ctx.aggregator;
        let result = run_encode(
            cmd,
            artifact,
            duration,
            ctx.config.small_file_timeout(),
            &ctx.cancel,
            &mut |fraction, fps, bytes| {
                aggregator.update(&id, fraction, fps, bytes);
                aggregator.notify();
            },
        );

        match result {
            Ok(()) => {
                ctx.aggregator.complete(&id);
                return Ok(());
            }
            Err(SquishError::Cancelled) => {
                ctx.aggregator.fail(&id, "cancelled");
                return Err(SquishError::Cancelled);
            }
            Err(e) => {
                warn!(
                    "Encode attempt {}/{} for {} failed: {}",
                    attempt,
                    attempts,
                    input.display(),
                    e
                );
                let _ = fs::remove_file(artifact);
                last_err = Some(e);
            }
        }
    }

    let err = last_err.expect("at least one attempt ran");
    ctx.aggregator.fail(&id, err.to_string());
    Err(err)
}

/// Segment, compress each part, and merge. Returns the merged artifact,
/// which still lives in the segments temp directory.
pub fn compress_with_segmentation(
    source: &Path,
    probe: &MediaInfo,
    ctx: &ProcessContext,
) -> Result<PathBuf> {
    info!(
        "Large file workflow: segmenting {}",
        source.file_name().unwrap_or_default().to_string_lossy()
    );

    let segments_dir = segments_temp_dir(source, &ctx.config);
    ctx.temp.create_dir(&segments_dir)?;

    let segments = segment_video(source, &segments_dir, &ctx.config, &ctx.cancel)?;
    let total = segments.len();
    let segment_duration = ctx.config.segmentation_settings.segment_duration_seconds as f64;

    // Register the whole fleet up front so the overall weighting is stable
    for (i, segment) in segments.iter().enumerate() {
        register_segment_worker(segment, i, total, Some(segment_duration), ctx);
    }

    let parallel = &ctx.config.parallel_processing;
    let workers = if parallel.enabled && parallel.segment_parallel {
        ctx.config.worker_pool_size()
    } else {
        1
    };

    let items: Vec<(usize, PathBuf)> = segments.into_iter().enumerate().collect();
    let results = run_pool(items, workers, |(ordinal, segment)| {
        encode_segment(segment, *ordinal, total, ctx)
    });

    let mut outputs: Vec<(usize, PathBuf)> = Vec::with_capacity(results.len());
    let mut first_error = None;
    for ((ordinal, segment), result) in results {
        match result {
            Ok(path) => outputs.push((ordinal, path)),
            Err(SquishError::Cancelled) => return Err(SquishError::Cancelled),
            Err(e) => {
                error!("Segment {} of {} failed: {}", ordinal, source.display(), e);
                if first_error.is_none() {
                    first_error = Some(SquishError::Pipeline(format!(
                        "segment {} ({}) failed: {}",
                        ordinal,
                        segment.display(),
                        e
                    )));
                }
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    outputs.sort_by_key(|(ordinal, _)| *ordinal);
    let paths: Vec<PathBuf> = outputs.into_iter().map(|(_, p)| p).collect();

    let merged = segments_dir.join(compressed_name(source));
    merge_segments(&paths, &merged, &ctx.config, &ctx.cancel)?;
    Ok(merged)
}

fn segment_worker_id(segment: &Path) -> String {
    segment.to_string_lossy().into_owned()
}

fn register_segment_worker(
    segment: &Path,
    ordinal: usize,
    total: usize,
    duration: Option<f64>,
    ctx: &ProcessContext,
) {
    let weight = file_size(segment).unwrap_or(0);
    let label = format!(
        "Segment {}/{}: {}",
        ordinal + 1,
        total,
        segment.file_name().unwrap_or_default().to_string_lossy()
    );
    ctx.aggregator.register(
        segment_worker_id(segment),
        label,
        weight,
        Some(SegmentInfo {
            current: ordinal + 1,
            total,
            duration_secs: duration,
        }),
    );
}

/// Compress one segment, driving the aggregator worker keyed by the
/// segment's path. The source segment file is deleted after a successful
/// encode.
pub(crate) fn encode_segment(
    segment: &Path,
    ordinal: usize,
    total: usize,
    ctx: &ProcessContext,
) -> Result<PathBuf> {
    register_segment_worker(segment, ordinal, total, None, ctx);
    let id = segment_worker_id(segment);

    if ctx.cancel.is_cancelled() {
        ctx.aggregator.fail(&id, "cancelled");
        return Err(SquishError::Cancelled);
    }

    let probe = match probe_media(segment, &ctx.config, &ctx.cancel) {
        Ok(probe) => probe,
        Err(e) => {
            ctx.aggregator.fail(&id, e.to_string());
            return Err(e);
        }
    };
    let duration = probe.duration().unwrap_or(0.0);

    let output = compressed_segment_path(segment);
    let (cmd, _choice) = build_encode_command(segment, &output, &probe, &ctx.config, ctx.hw.as_ref());

    let aggregator = &ctx.aggregator;
    let result = run_encode(
        cmd,
        &output,
        duration,
        ctx.config.segment_timeout(),
        &ctx.cancel,
        &mut |fraction, fps, bytes| {
            aggregator.update(&id, fraction, fps, bytes);
            aggregator.notify();
        },
    );

    match result {
        Ok(()) => {
            ctx.aggregator.complete(&id);
            // The uncompressed segment is no longer needed
            if let Err(e) = fs::remove_file(segment) {
                warn!("Failed to remove segment {}: {}", segment.display(), e);
            }
            debug!("Segment {}/{} compressed", ordinal + 1, total);
            Ok(output)
        }
        Err(e) => {
            ctx.aggregator.fail(&id, e.to_string());
            let _ = fs::remove_file(&output);
            Err(e)
        }
    }
}

/// Steps 6 to 8 of the protocol: verify the artifact, move it next to the
/// source, verify again in place, and only then delete the source.
pub fn finalize_replace(
    artifact: &Path,
    source: &Path,
    original: &MediaInfo,
    ctx: &ProcessContext,
) -> Result<FileOutcome> {
    ctx.cancel.check()?;
    let config = &ctx.config;

    // Step 6: verify the artifact while the source is still safe
    if config.safety_settings.verify_integrity {
        match verify_file_integrity(artifact, Some(original), config, &ctx.cancel) {
            Ok(_) => {}
            Err(SquishError::Cancelled) => return Err(SquishError::Cancelled),
            Err(e) => {
                let _ = fs::remove_file(artifact);
                return Err(e);
            }
        }
    }

    let original_size = file_size(source)?;
    let compressed_size = file_size(artifact)?;
    info!(
        "Compression results: {} -> {} ({:.1}% of original)",
        format_bytes(original_size),
        format_bytes(compressed_size),
        compressed_size as f64 / original_size as f64 * 100.0
    );

    // Step 7: atomic move into the source directory
    let final_path = final_output_path(source);
    move_file(artifact, &final_path)?;
    debug!("Moved artifact to {}", final_path.display());

    if config.safety_settings.verify_integrity {
        match verify_file_integrity(&final_path, Some(original), config, &ctx.cancel) {
            Ok(_) => {}
            Err(SquishError::Cancelled) => return Err(SquishError::Cancelled),
            Err(e) => {
                // Leave both files in place for the operator to inspect
                return Err(SquishError::Integrity(format!(
                    "verification after move failed, source and output both kept: {}",
                    e
                )));
            }
        }
    }

    // Step 8: the only destructive step, guarded by everything above
    if config.safety_settings.delete_original_after_compression {
        fs::remove_file(source)?;
        info!("Original file deleted: {}", source.display());
    }

    Ok(FileOutcome {
        input: source.to_path_buf(),
        output: final_path,
        original_size,
        compressed_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_requires_both_thresholds() {
        let config = Config::default();
        // Both exceeded
        assert!(should_segment(12.0, 2.0 * 3600.0, &config));
        // Size only
        assert!(!should_segment(12.0, 30.0 * 60.0, &config));
        // Duration only
        assert!(!should_segment(2.0, 2.0 * 3600.0, &config));
        // Neither
        assert!(!should_segment(1.0, 60.0, &config));
    }

    #[test]
    fn outcome_reports_savings() {
        let outcome = FileOutcome {
            input: PathBuf::from("/a.mkv"),
            output: PathBuf::from("/a_compressed.mkv"),
            original_size: 1000,
            compressed_size: 400,
        };
        assert_eq!(outcome.space_saved(), 600);
        assert!((outcome.compression_ratio() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn missing_file_fails_preflight_with_source_untouched() {
        let ctx = ProcessContext::new(Config::default(), None, crate::cancel::CancelToken::new());
        let result = process_file(Path::new("/nonexistent/video.mkv"), &ctx);
        assert!(matches!(result, Err(SquishError::Preflight(_))));
    }

    #[test]
    fn cancelled_batch_never_starts_a_job() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mkv");
        std::fs::write(&input, vec![0u8; 4096]).unwrap();

        let cancel = crate::cancel::CancelToken::new();
        cancel.cancel();
        let ctx = ProcessContext::new(Config::default(), None, cancel);
        let result = process_file(&input, &ctx);
        assert!(matches!(result, Err(SquishError::Cancelled)));
        assert!(input.exists());
    }
}
