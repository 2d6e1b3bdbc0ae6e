//! Thread-safe progress aggregation.
//!
//! Every transcoder invocation registers a worker with the batch aggregator,
//! weighted by the bytes it was assigned. Workers update their fraction at
//! high rates from many threads; observers pull immutable point-in-time
//! [`ProgressSnapshot`]s or receive them through a single registered
//! callback. All mutation happens under one mutex; callbacks are always
//! invoked after the lock is released so observers can re-enter the
//! aggregator freely.
//!
//! Weights are preserved on failure: a failed worker keeps its registered
//! weight and is accounted as fully processed in the overall fraction, so
//! overall progress never decreases and reaches 1.0 once every worker is
//! terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Lifecycle states of one worker record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Processing,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Completed | WorkerStatus::Failed)
    }
}

/// Position of a segment within its source file, attached to segment workers.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub current: usize,
    pub total: usize,
    pub duration_secs: Option<f64>,
}

/// Read-only view of one worker.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: String,
    pub label: String,
    pub progress: f64,
    pub fps: f64,
    pub status: WorkerStatus,
    pub throughput_mbps: f64,
    pub eta_seconds: Option<f64>,
    pub segment: Option<SegmentInfo>,
    pub error: Option<String>,
}

/// Read-only view of the whole batch, produced atomically.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Weighted overall fraction in [0, 1]
    pub overall_progress: f64,
    pub active_workers: usize,
    pub total_workers: usize,
    /// Sum of per-worker throughputs, MB/s
    pub throughput_mbps: f64,
    /// Worst-case ETA across active workers, seconds
    pub eta_seconds: f64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub workers: Vec<WorkerSnapshot>,
}

/// Callback receiving snapshots; must not block.
pub type SnapshotCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

struct WorkerRecord {
    label: String,
    weight_bytes: u64,
    processed_bytes: f64,
    progress: f64,
    fps: f64,
    status: WorkerStatus,
    start: Instant,
    segment: Option<SegmentInfo>,
    throughput_mbps: f64,
    eta_seconds: Option<f64>,
    error: Option<String>,
}

#[derive(Default)]
struct AggregatorState {
    workers: HashMap<String, WorkerRecord>,
    order: Vec<String>,
    total_bytes: u64,
}

/// Thread-safe registry of workers with weighted rollup.
#[derive(Default)]
pub struct ProgressAggregator {
    state: Mutex<AggregatorState>,
    callback: Mutex<Option<SnapshotCallback>>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the batch-level snapshot callback.
    pub fn set_callback(&self, callback: SnapshotCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Insert a worker in state `Starting` with zero progress.
    pub fn register(
        &self,
        id: impl Into<String>,
        label: impl Into<String>,
        weight_bytes: u64,
        segment: Option<SegmentInfo>,
    ) {
        let id = id.into();
        let mut state = self.state.lock().unwrap();
        if state.workers.contains_key(&id) {
            return;
        }
        state.total_bytes += weight_bytes;
        state.order.push(id.clone());
        state.workers.insert(
            id,
            WorkerRecord {
                label: label.into(),
                weight_bytes,
                processed_bytes: 0.0,
                progress: 0.0,
                fps: 0.0,
                status: WorkerStatus::Starting,
                start: Instant::now(),
                segment,
                throughput_mbps: 0.0,
                eta_seconds: None,
                error: None,
            },
        );
    }

    /// Update a worker's progress. Unknown ids are ignored.
    ///
    /// The fraction is clamped to [0, 1] and never moves backwards. When
    /// `processed_bytes` is not supplied it is estimated from the fraction
    /// and the worker's weight.
    pub fn update(&self, id: &str, fraction: f64, fps: f64, processed_bytes: Option<u64>) {
        let mut state = self.state.lock().unwrap();
        let Some(worker) = state.workers.get_mut(id) else {
            return;
        };
        if worker.status.is_terminal() {
            return;
        }

        let fraction = fraction.clamp(0.0, 1.0).max(worker.progress);
        worker.progress = fraction;
        worker.fps = fps;
        worker.status = if fraction < 1.0 {
            WorkerStatus::Processing
        } else {
            WorkerStatus::Completed
        };

        worker.processed_bytes = match processed_bytes {
            Some(bytes) => bytes as f64,
            None => worker.weight_bytes as f64 * fraction,
        };

        let elapsed = worker.start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            worker.throughput_mbps = worker.processed_bytes / (1024.0 * 1024.0) / elapsed;
            worker.eta_seconds = if fraction >= 0.01 {
                Some((elapsed / fraction - elapsed).max(0.0))
            } else {
                None
            };
        }
    }

    /// Terminal transition: the worker finished its assignment.
    pub fn complete(&self, id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(worker) = state.workers.get_mut(id) else {
                return;
            };
            worker.status = WorkerStatus::Completed;
            worker.progress = 1.0;
            worker.processed_bytes = worker.weight_bytes as f64;
            worker.eta_seconds = None;
        }
        self.notify();
    }

    /// Terminal transition: the worker failed. The weight stays in the
    /// rollup and the full weight is accounted as processed so overall
    /// progress stays monotonic.
    pub fn fail(&self, id: &str, error: impl Into<String>) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(worker) = state.workers.get_mut(id) else {
                return;
            };
            worker.status = WorkerStatus::Failed;
            worker.progress = 1.0;
            worker.processed_bytes = worker.weight_bytes as f64;
            worker.eta_seconds = None;
            worker.error = Some(error.into());
        }
        self.notify();
    }

    /// Produce a consistent point-in-time view of the batch.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap();

        let mut overall = 0.0;
        let mut active = 0;
        let mut throughput = 0.0;
        let mut max_eta = 0.0f64;
        let mut processed = 0.0;
        let mut workers = Vec::with_capacity(state.order.len());

        for id in &state.order {
            let worker = &state.workers[id];
            if state.total_bytes > 0 {
                let weight = worker.weight_bytes as f64 / state.total_bytes as f64;
                overall += worker.progress * weight;
            }
            if worker.status == WorkerStatus::Processing {
                active += 1;
                if let Some(eta) = worker.eta_seconds {
                    max_eta = max_eta.max(eta);
                }
            }
            throughput += worker.throughput_mbps;
            processed += worker.processed_bytes;

            workers.push(WorkerSnapshot {
                id: id.clone(),
                label: worker.label.clone(),
                progress: worker.progress,
                fps: worker.fps,
                status: worker.status,
                throughput_mbps: worker.throughput_mbps,
                eta_seconds: worker.eta_seconds,
                segment: worker.segment.clone(),
                error: worker.error.clone(),
            });
        }

        ProgressSnapshot {
            overall_progress: overall.clamp(0.0, 1.0),
            active_workers: active,
            total_workers: state.order.len(),
            throughput_mbps: throughput,
            eta_seconds: max_eta,
            total_bytes: state.total_bytes,
            processed_bytes: processed as u64,
            workers,
        }
    }

    /// Deliver the current snapshot to the registered callback, outside the
    /// state lock.
    pub fn notify(&self) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            let snapshot = self.snapshot();
            callback(&snapshot);
        }
    }
}
