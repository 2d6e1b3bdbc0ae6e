//! The job classifier and batch dispatcher.
//!
//! Splits the input list into small and large cohorts by size, runs the
//! small cohort through the worker pool and the large cohort through the
//! pipeline (or sequentially when the pipeline criteria are not met), and
//! produces the batch summary. Reported progress is split 50/50 between the
//! two phases. Missing inputs are skipped with a warning; a failed job
//! never stops the batch; cancellation unwinds it after temp cleanup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::encoding::parallel::{pool_size, run_pool};
use crate::encoding::pipeline::{run_large_pipeline, should_use_pipeline};
use crate::error::{Result, SquishError};
use crate::hwaccel::detect_hardware_acceleration;
use crate::media::probe_media;
use crate::processing::ProcessContext;
use crate::processing::analysis::{analyze_file, estimate_compression_time, log_analysis};
use crate::processing::safety::{FileOutcome, process_file};
use crate::progress::{ProgressSnapshot, SnapshotCallback};
use crate::utils::{format_bytes, format_duration};
use crate::util::fs::file_size;

/// Final report of one batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<FileOutcome>,
    pub failed: Vec<(PathBuf, String)>,
    pub skipped: Vec<PathBuf>,
    /// Files analyzed in dry-run mode
    pub analyzed: usize,
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn space_saved(&self) -> i64 {
        self.processed.iter().map(|o| o.space_saved()).sum()
    }

    /// Process exit code: 0 full success, 1 nothing succeeded, 2 partial
    /// failure.
    pub fn exit_code(&self) -> i32 {
        if !self.failed.is_empty() {
            return 2;
        }
        let succeeded = if self.dry_run {
            self.analyzed
        } else {
            self.processed.len()
        };
        if succeeded == 0 { 1 } else { 0 }
    }
}

/// Split existing files into small and large cohorts; missing paths are
/// returned separately.
pub fn classify_files(
    files: &[PathBuf],
    config: &Config,
) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) {
    let threshold_bytes =
        (config.large_file_settings.threshold_gb * 1024f64.powi(3)) as u64;

    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut skipped = Vec::new();

    for file in files {
        if !file.exists() {
            warn!("File not found, skipping: {}", file.display());
            skipped.push(file.clone());
            continue;
        }
        match file_size(file) {
            Ok(size) if size >= threshold_bytes => large.push(file.clone()),
            Ok(_) => small.push(file.clone()),
            Err(e) => {
                warn!("Cannot stat {}, skipping: {}", file.display(), e);
                skipped.push(file.clone());
            }
        }
    }

    (small, large, skipped)
}

/// Process a batch of files. The dispatcher entry point.
pub fn process_batch(
    files: &[PathBuf],
    config: &Config,
    dry_run: bool,
    progress: Option<SnapshotCallback>,
    cancel: CancelToken,
) -> Result<BatchSummary> {
    let start = Instant::now();
    config.validate()?;

    info!(
        "Batch processing {}: {} files",
        if dry_run { "(dry run)" } else { "" },
        files.len()
    );

    let (small, large, skipped) = classify_files(files, config);
    info!(
        "File categorization: {} small (<{:.0}GB), {} large, {} skipped",
        small.len(),
        config.large_file_settings.threshold_gb,
        large.len(),
        skipped.len()
    );

    if dry_run {
        let mut summary = dry_run_batch(&small, &large, config, &cancel)?;
        summary.skipped = skipped;
        summary.elapsed = start.elapsed();
        return Ok(summary);
    }

    // Batch preamble
    let total_bytes: u64 = small
        .iter()
        .chain(large.iter())
        .filter_map(|f| file_size(f).ok())
        .sum();
    let estimated: Duration = small
        .iter()
        .chain(large.iter())
        .filter_map(|f| file_size(f).ok())
        .map(|s| estimate_compression_time(s, &config.compression_settings.preset))
        .sum();
    info!(
        "Total data to process: {} (estimated {})",
        format_bytes(total_bytes),
        format_duration(estimated)
    );
    let completion = chrono::Local::now()
        + chrono::Duration::from_std(estimated).unwrap_or_else(|_| chrono::Duration::zero());
    info!(
        "Estimated completion: {}",
        completion.format("%Y-%m-%d %H:%M:%S")
    );

    let hw = detect_hardware_acceleration(config, &cancel);
    let mut ctx = ProcessContext::new(config.clone(), hw, cancel.clone());

    let mut processed = Vec::new();
    let mut failed = Vec::new();

    // Phase A: small files through the worker pool
    if !small.is_empty() && !cancel.is_cancelled() {
        info!("Phase 1: {} small files", small.len());
        install_phase_callback(&ctx, progress.clone(), 0.0, 0.5);

        let workers = pool_size(ctx.config.worker_pool_size(), small.len());
        let ctx_ref = &ctx;
        let results = run_pool(small, workers, |path| process_file(path, ctx_ref));
        for (path, result) in results {
            record_outcome(path, result, &mut processed, &mut failed);
        }
    }

    // Phase B: large files through the pipeline or sequentially
    if !large.is_empty() && !cancel.is_cancelled() {
        info!("Phase 2: {} large files", large.len());
        ctx.reset_aggregator();
        install_phase_callback(&ctx, progress.clone(), 0.5, 0.5);

        if should_use_pipeline(large.len(), config) {
            for (path, result) in run_large_pipeline(&large, &ctx) {
                record_outcome(path, result, &mut processed, &mut failed);
            }
        } else {
            info!("Processing large files sequentially");
            for path in &large {
                if cancel.is_cancelled() {
                    break;
                }
                let result = process_file(path, &ctx);
                record_outcome(path.clone(), result, &mut processed, &mut failed);
            }
        }
    }

    // Temp artifacts never survive the batch, success or not
    ctx.temp.cleanup_all();

    if cancel.is_cancelled() {
        warn!("Batch cancelled; sources left intact, temp artifacts removed");
        return Err(SquishError::Cancelled);
    }

    let summary = BatchSummary {
        processed,
        failed,
        skipped,
        analyzed: 0,
        dry_run: false,
        elapsed: start.elapsed(),
    };

    if let Some(callback) = &progress {
        let mut snapshot = ctx.aggregator.snapshot();
        snapshot.overall_progress = 1.0;
        callback(&snapshot);
    }

    log_summary(&summary);
    Ok(summary)
}

fn record_outcome(
    path: PathBuf,
    result: Result<FileOutcome>,
    processed: &mut Vec<FileOutcome>,
    failed: &mut Vec<(PathBuf, String)>,
) {
    match result {
        Ok(outcome) => {
            info!(
                "SUCCESS: {} compressed, saved {}",
                path.display(),
                format_bytes(outcome.space_saved().max(0) as u64)
            );
            processed.push(outcome);
        }
        Err(SquishError::Cancelled) => {
            // The batch-level cancel path reports this; not a job failure
        }
        Err(e) => {
            error!("FAILED: {}: {}", path.display(), e);
            if let SquishError::Encode { stderr_tail, .. } = &e {
                if !stderr_tail.is_empty() {
                    error!("Transcoder stderr tail: {}", stderr_tail);
                }
            }
            failed.push((path, e.to_string()));
        }
    }
}

/// Dry run: probe and analyze, create nothing, delete nothing.
fn dry_run_batch(
    small: &[PathBuf],
    large: &[PathBuf],
    config: &Config,
    cancel: &CancelToken,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary {
        dry_run: true,
        ..Default::default()
    };

    if !small.is_empty() {
        info!(
            "[DRY RUN] Small files: worker pool with {} workers",
            pool_size(config.worker_pool_size(), small.len())
        );
    }
    if !large.is_empty() {
        if should_use_pipeline(large.len(), config) {
            info!("[DRY RUN] Large files: segmentation pipeline");
        } else {
            info!("[DRY RUN] Large files: sequential segmentation");
        }
    }

    for path in small.iter().chain(large.iter()) {
        cancel.check()?;
        let size = file_size(path)?;
        match probe_media(path, config, cancel) {
            Ok(probe) => {
                let analysis = analyze_file(path, size, &probe, config);
                log_analysis(&analysis);
                summary.analyzed += 1;
            }
            Err(SquishError::Cancelled) => return Err(SquishError::Cancelled),
            Err(e) => {
                error!("[DRY RUN] Cannot analyze {}: {}", path.display(), e);
                summary.failed.push((path.clone(), e.to_string()));
            }
        }
    }

    Ok(summary)
}

fn install_phase_callback(
    ctx: &ProcessContext,
    user: Option<SnapshotCallback>,
    offset: f64,
    scale: f64,
) {
    let Some(user) = user else { return };
    ctx.aggregator
        .set_callback(Arc::new(move |snapshot: &ProgressSnapshot| {
            let mut scaled = snapshot.clone();
            scaled.overall_progress =
                (offset + snapshot.overall_progress * scale).clamp(0.0, 1.0);
            user(&scaled);
        }));
}

fn log_summary(summary: &BatchSummary) {
    info!(
        "Batch complete in {}: {} processed, {} failed, {} skipped",
        format_duration(summary.elapsed),
        summary.processed.len(),
        summary.failed.len(),
        summary.skipped.len()
    );
    if summary.space_saved() > 0 {
        info!("Total space saved: {}", format_bytes(summary.space_saved() as u64));
    }
    for (path, reason) in &summary.failed {
        info!("  failed: {}: {}", path.display(), reason);
    }
}
