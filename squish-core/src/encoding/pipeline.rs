//! The large-file pipeline.
//!
//! A three-stage producer-consumer pipeline over a batch of large files:
//!
//! 1. Segmenter tasks (one per file) run preflight, cut their source into
//!    parts, and push `SegmentReady` items onto a shared bounded channel.
//!    The actual segment-mux child is gated so only one stream-copy runs at
//!    a time; the channel bound is the pipeline's only backpressure.
//! 2. Compression workers consume segments in any order, encode them, and
//!    publish per-segment outcomes.
//! 3. A coordinator accumulates outcomes per job; once all of a job's
//!    segments arrived it hands the job to a merger task, which merges by
//!    ordinal, verifies, and atomically replaces the source. A failed
//!    segment fails its job, whose remaining segments are drained and
//!    deleted without merging.
//!
//! Per-job state machine: pending → segmenting → segmented → compressing →
//! merging → verifying → replaced, with failed reachable from any state.
//! All transitions happen under one pipeline mutex; channel waits are short
//! so every stage observes cancellation promptly.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, SquishError};
use crate::media::MediaInfo;
use crate::media::probe_media;
use crate::processing::ProcessContext;
use crate::processing::safety::{FileOutcome, encode_segment, finalize_replace};
use crate::temp_files::{cleanup_job_artifacts, compressed_name, segments_temp_dir};
use crate::validation::{check_disk_space, hash_file};

use super::merger::merge_segments;
use super::segmentation::segment_video;

/// Bound of the shared segment channel; trades memory for segmenter slack.
const SEGMENT_QUEUE_CAPACITY: usize = 50;

/// Wait applied to channel operations so stages notice cancellation.
const CHANNEL_WAIT: Duration = Duration::from_millis(500);

/// Coordinator idle scan interval.
const COORDINATOR_WAIT: Duration = Duration::from_millis(250);

/// Lifecycle of one job inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Segmenting,
    Segmented,
    Compressing,
    Merging,
    Verifying,
    Replaced,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Replaced | JobState::Failed)
    }
}

struct JobRecord {
    source: PathBuf,
    state: JobState,
    /// Total segments, known once segmentation finished
    expected: Option<usize>,
    compressed: Vec<(usize, PathBuf)>,
    segments_dir: PathBuf,
    probe: Option<MediaInfo>,
    error: Option<String>,
}

struct SegmentReady {
    job: usize,
    ordinal: usize,
    total: usize,
    path: PathBuf,
}

struct SegmentOutcome {
    job: usize,
    ordinal: usize,
    result: Result<PathBuf>,
}

struct Pipeline<'a> {
    ctx: &'a ProcessContext,
    jobs: Mutex<Vec<JobRecord>>,
    outcomes: Mutex<Vec<Option<Result<FileOutcome>>>>,
    /// Serializes segment-mux children so stream copies do not compete with
    /// the encode workers for I/O
    segmentation_gate: Mutex<()>,
}

/// The pipeline runs iff there is more than one large file, segment-level
/// parallelism is on, and the pool has more than one worker.
pub fn should_use_pipeline(large_count: usize, config: &Config) -> bool {
    large_count > 1
        && config.parallel_processing.enabled
        && config.parallel_processing.segment_parallel
        && config.worker_pool_size() > 1
}

/// Run a batch of large files through the pipeline. Returns one outcome per
/// input, in input order.
pub fn run_large_pipeline(
    files: &[PathBuf],
    ctx: &ProcessContext,
) -> Vec<(PathBuf, Result<FileOutcome>)> {
    info!("Large-file pipeline: {} files", files.len());

    let pipeline = Pipeline {
        ctx,
        jobs: Mutex::new(
            files
                .iter()
                .map(|f| JobRecord {
                    source: f.clone(),
                    state: JobState::Pending,
                    expected: None,
                    compressed: Vec::new(),
                    segments_dir: segments_temp_dir(f, &ctx.config),
                    probe: None,
                    error: None,
                })
                .collect(),
        ),
        outcomes: Mutex::new(files.iter().map(|_| None).collect()),
        segmentation_gate: Mutex::new(()),
    };

    let workers = ctx.config.worker_pool_size();
    let (seg_tx, seg_rx) = bounded::<SegmentReady>(SEGMENT_QUEUE_CAPACITY);
    let (res_tx, res_rx) = unbounded::<SegmentOutcome>();

    std::thread::scope(|scope| {
        // Stage 1: segmenters
        for job_id in 0..files.len() {
            let seg_tx = seg_tx.clone();
            let pipeline = &pipeline;
            scope.spawn(move || pipeline.segmenter(job_id, seg_tx));
        }
        drop(seg_tx);

        // Stage 2: compression workers
        for _ in 0..workers {
            let seg_rx = seg_rx.clone();
            let res_tx = res_tx.clone();
            let pipeline = &pipeline;
            scope.spawn(move || pipeline.compressor(seg_rx, res_tx));
        }
        drop(seg_rx);
        drop(res_tx);

        // Stage 3: coordinator on this thread, mergers spawned into the scope
        pipeline.coordinate(res_rx, scope);
    });

    let jobs = pipeline.jobs.into_inner().unwrap();
    let mut outcomes = pipeline.outcomes.into_inner().unwrap();
    files
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let outcome = outcomes[i].take().unwrap_or_else(|| {
                Err(SquishError::Pipeline(
                    jobs[i]
                        .error
                        .clone()
                        .unwrap_or_else(|| "job did not complete".to_string()),
                ))
            });
            (f.clone(), outcome)
        })
        .collect()
}

impl<'a> Pipeline<'a> {
    fn set_state(&self, job: usize, state: JobState) {
        let mut jobs = self.jobs.lock().unwrap();
        if !jobs[job].state.is_terminal() {
            debug!(
                "Job {} ({}): {:?} -> {:?}",
                job,
                jobs[job].source.display(),
                jobs[job].state,
                state
            );
            jobs[job].state = state;
        }
    }

    fn is_failed(&self, job: usize) -> bool {
        self.jobs.lock().unwrap()[job].state == JobState::Failed
    }

    /// Terminal failure for a job: record the error once, drop its segment
    /// artifacts, and keep the batch going.
    fn fail_job(&self, job: usize, err: SquishError) {
        let source = {
            let mut jobs = self.jobs.lock().unwrap();
            let record = &mut jobs[job];
            if record.state.is_terminal() {
                return;
            }
            error!("Job {} failed: {}", record.source.display(), err);
            record.state = JobState::Failed;
            record.error = Some(err.to_string());
            record.source.clone()
        };

        {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes[job].is_none() {
                outcomes[job] = Some(Err(err));
            }
        }

        cleanup_job_artifacts(&source, &self.ctx.config);
    }

    /// Stage 1: preflight, segment, and feed the shared channel.
    fn segmenter(&self, job: usize, seg_tx: Sender<SegmentReady>) {
        let ctx = self.ctx;
        let source = self.jobs.lock().unwrap()[job].source.clone();
        self.set_state(job, JobState::Segmenting);

        if ctx.cancel.is_cancelled() {
            self.fail_job(job, SquishError::Cancelled);
            return;
        }

        if let Err(e) = check_disk_space(&source, &ctx.config) {
            self.fail_job(job, e);
            return;
        }

        if ctx.config.safety_settings.create_backup_hash {
            match hash_file(&source, &ctx.config) {
                Ok(hash) => debug!("Source hash for {}: {}", source.display(), hash),
                Err(e) => {
                    self.fail_job(job, e);
                    return;
                }
            }
        }

        let probe = match probe_media(&source, &ctx.config, &ctx.cancel) {
            Ok(probe) => probe,
            Err(e) => {
                self.fail_job(job, e);
                return;
            }
        };

        let segments_dir = segments_temp_dir(&source, &ctx.config);
        if let Err(e) = ctx.temp.create_dir(&segments_dir) {
            self.fail_job(job, e);
            return;
        }

        // One segment-mux child at a time across the batch
        let segments = {
            let _gate = self.segmentation_gate.lock().unwrap();
            segment_video(&source, &segments_dir, &ctx.config, &ctx.cancel)
        };
        let segments = match segments {
            Ok(segments) => segments,
            Err(e) => {
                self.fail_job(job, e);
                return;
            }
        };

        {
            let mut jobs = self.jobs.lock().unwrap();
            jobs[job].probe = Some(probe);
            jobs[job].expected = Some(segments.len());
        }

        let total = segments.len();
        for (ordinal, path) in segments.into_iter().enumerate() {
            let mut item = SegmentReady {
                job,
                ordinal,
                total,
                path,
            };
            loop {
                if ctx.cancel.is_cancelled() {
                    self.fail_job(job, SquishError::Cancelled);
                    return;
                }
                if self.is_failed(job) {
                    let _ = fs::remove_file(&item.path);
                    return;
                }
                match seg_tx.send_timeout(item, CHANNEL_WAIT) {
                    Ok(()) => break,
                    Err(crossbeam_channel::SendTimeoutError::Timeout(returned)) => {
                        // Compressors are behind; the bound is the backpressure
                        item = returned;
                    }
                    Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                        self.fail_job(
                            job,
                            SquishError::Pipeline(
                                "segment queue closed before all segments were submitted"
                                    .to_string(),
                            ),
                        );
                        return;
                    }
                }
            }
        }

        {
            // Compressors may already have moved the job forward
            let mut jobs = self.jobs.lock().unwrap();
            if jobs[job].state == JobState::Segmenting {
                jobs[job].state = JobState::Segmented;
            }
        }
        debug!("Job {}: {} segments submitted", job, total);
    }

    /// Stage 2: consume segments until the queue closes.
    fn compressor(&self, seg_rx: Receiver<SegmentReady>, res_tx: Sender<SegmentOutcome>) {
        let ctx = self.ctx;
        loop {
            match seg_rx.recv_timeout(CHANNEL_WAIT) {
                Ok(item) => {
                    // Skip work for jobs that already failed and drained
                    if ctx.cancel.is_cancelled() || self.is_failed(item.job) {
                        let _ = fs::remove_file(&item.path);
                        continue;
                    }

                    self.set_compressing(item.job);
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        encode_segment(&item.path, item.ordinal, item.total, ctx)
                    }))
                    .unwrap_or_else(|_| {
                        Err(SquishError::Other(format!(
                            "worker panicked on segment {}",
                            item.path.display()
                        )))
                    });
                    let _ = res_tx.send(SegmentOutcome {
                        job: item.job,
                        ordinal: item.ordinal,
                        result,
                    });
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn set_compressing(&self, job: usize) {
        let mut jobs = self.jobs.lock().unwrap();
        if matches!(jobs[job].state, JobState::Segmenting | JobState::Segmented) {
            jobs[job].state = JobState::Compressing;
        }
    }

    /// Stage 3: accumulate results and hand complete jobs to mergers.
    fn coordinate<'scope>(
        &'scope self,
        res_rx: Receiver<SegmentOutcome>,
        scope: &'scope std::thread::Scope<'scope, '_>,
    ) {
        let mut results_open = true;

        loop {
            if results_open {
                match res_rx.recv_timeout(COORDINATOR_WAIT) {
                    Ok(outcome) => self.absorb(outcome),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => results_open = false,
                }
            }

            if self.ctx.cancel.is_cancelled() {
                self.fail_remaining(SquishError::Cancelled);
            }

            // Promote jobs whose segments have all arrived
            for job in self.take_mergeable() {
                let pipeline = self;
                scope.spawn(move || pipeline.merger(job));
            }

            if !results_open {
                // No more results can arrive; anything not yet merging is stuck
                self.fail_stuck();
                break;
            }
        }
    }

    fn absorb(&self, outcome: SegmentOutcome) {
        match outcome.result {
            Ok(path) => {
                let mut jobs = self.jobs.lock().unwrap();
                let record = &mut jobs[outcome.job];
                if record.state == JobState::Failed {
                    let _ = fs::remove_file(&path);
                } else {
                    record.compressed.push((outcome.ordinal, path));
                }
            }
            Err(SquishError::Cancelled) => {
                self.fail_job(outcome.job, SquishError::Cancelled);
            }
            Err(e) => {
                self.fail_job(
                    outcome.job,
                    SquishError::Pipeline(format!(
                        "segment {} failed: {}",
                        outcome.ordinal, e
                    )),
                );
            }
        }
    }

    /// Jobs ready to merge, transitioned to `Merging` under the lock.
    fn take_mergeable(&self) -> Vec<usize> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut ready = Vec::new();
        for (job, record) in jobs.iter_mut().enumerate() {
            let complete = matches!(record.state, JobState::Segmented | JobState::Compressing)
                && record.expected.is_some_and(|n| record.compressed.len() == n);
            if complete {
                record.state = JobState::Merging;
                ready.push(job);
            }
        }
        ready
    }

    fn fail_remaining(&self, err: SquishError) {
        let pending: Vec<usize> = {
            let jobs = self.jobs.lock().unwrap();
            jobs.iter()
                .enumerate()
                .filter(|(_, r)| {
                    !r.state.is_terminal()
                        && !matches!(r.state, JobState::Merging | JobState::Verifying)
                })
                .map(|(i, _)| i)
                .collect()
        };
        for job in pending {
            self.fail_job(
                job,
                match err {
                    SquishError::Cancelled => SquishError::Cancelled,
                    ref other => SquishError::Pipeline(other.to_string()),
                },
            );
        }
    }

    fn fail_stuck(&self) {
        let stuck: Vec<usize> = {
            let jobs = self.jobs.lock().unwrap();
            jobs.iter()
                .enumerate()
                .filter(|(_, r)| {
                    !r.state.is_terminal()
                        && !matches!(r.state, JobState::Merging | JobState::Verifying)
                })
                .map(|(i, _)| i)
                .collect()
        };
        for job in stuck {
            self.fail_job(
                job,
                SquishError::Pipeline(
                    "pipeline drained before all segments were compressed".to_string(),
                ),
            );
        }
    }

    /// Stage 3 per job: merge by ordinal, verify, replace atomically.
    fn merger(&self, job: usize) {
        let ctx = self.ctx;
        let (source, segments_dir, mut compressed, probe) = {
            let jobs = self.jobs.lock().unwrap();
            let record = &jobs[job];
            (
                record.source.clone(),
                record.segments_dir.clone(),
                record.compressed.clone(),
                record.probe.clone(),
            )
        };

        let Some(probe) = probe else {
            self.fail_job(
                job,
                SquishError::Pipeline("job lost its source probe".to_string()),
            );
            return;
        };

        // Merging requires ordinal order; arrival order is arbitrary
        compressed.sort_by_key(|(ordinal, _)| *ordinal);
        let paths: Vec<PathBuf> = compressed.into_iter().map(|(_, p)| p).collect();
        let merged = segments_dir.join(compressed_name(&source));

        let result = merge_segments(&paths, &merged, &ctx.config, &ctx.cancel).and_then(|_| {
            self.set_state(job, JobState::Verifying);
            finalize_replace(&merged, &source, &probe, ctx)
        });

        match result {
            Ok(outcome) => {
                self.set_state(job, JobState::Replaced);
                info!(
                    "SUCCESS: {} replaced ({} -> {})",
                    source.display(),
                    outcome.original_size,
                    outcome.compressed_size
                );
                self.outcomes.lock().unwrap()[job] = Some(Ok(outcome));
                cleanup_job_artifacts(&source, &ctx.config);
            }
            Err(e) => {
                if matches!(e, SquishError::Cancelled) {
                    warn!("Merge of {} cancelled", source.display());
                }
                self.fail_job(job, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_gate_requires_multiple_files_and_workers() {
        let config = Config::default();
        assert!(should_use_pipeline(2, &config));
        assert!(!should_use_pipeline(1, &config));
        assert!(!should_use_pipeline(0, &config));

        let mut config = Config::default();
        config.parallel_processing.segment_parallel = false;
        assert!(!should_use_pipeline(3, &config));

        let mut config = Config::default();
        config.parallel_processing.enabled = false;
        assert!(!should_use_pipeline(3, &config));

        let mut config = Config::default();
        config.parallel_processing.max_workers = 1;
        assert!(!should_use_pipeline(3, &config));
    }

    #[test]
    fn job_states_know_their_terminals() {
        assert!(JobState::Replaced.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Compressing.is_terminal());
        assert!(!JobState::Merging.is_terminal());
    }

    #[test]
    fn pipeline_fails_missing_files_without_touching_anything() {
        let ctx = ProcessContext::new(
            Config::default(),
            None,
            crate::cancel::CancelToken::new(),
        );
        let files = vec![
            PathBuf::from("/nonexistent/a.mkv"),
            PathBuf::from("/nonexistent/b.mkv"),
        ];
        let results = run_large_pipeline(&files, &ctx);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_err()));
    }

    #[test]
    fn cancelled_pipeline_fails_all_jobs_with_cancelled() {
        let cancel = crate::cancel::CancelToken::new();
        cancel.cancel();
        let ctx = ProcessContext::new(Config::default(), None, cancel);

        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mkv");
        let b = dir.path().join("b.mkv");
        std::fs::write(&a, vec![0u8; 4096]).unwrap();
        std::fs::write(&b, vec![0u8; 4096]).unwrap();

        let results = run_large_pipeline(&[a.clone(), b.clone()], &ctx);
        assert!(results
            .iter()
            .all(|(_, r)| matches!(r, Err(SquishError::Cancelled))));
        // Sources survive cancellation
        assert!(a.exists());
        assert!(b.exists());
    }
}
