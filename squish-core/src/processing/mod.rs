//! Batch processing: classification, dispatch, and the per-file safety
//! protocol.

pub mod analysis;
pub mod dispatch;
pub mod safety;

pub use analysis::{FileAnalysis, analyze_file, estimate_compression_time};
pub use dispatch::{BatchSummary, process_batch};
pub use safety::{FileOutcome, process_file};

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::hwaccel::HwAccelProfile;
use crate::progress::ProgressAggregator;
use crate::temp_files::TempRegistry;

/// Shared dependencies threaded through every stage of a batch.
///
/// Built once by the dispatcher; workers and pipeline stages borrow it.
pub struct ProcessContext {
    pub config: Config,
    pub hw: Option<HwAccelProfile>,
    pub aggregator: Arc<ProgressAggregator>,
    pub cancel: CancelToken,
    pub temp: Arc<TempRegistry>,
}

impl ProcessContext {
    pub fn new(config: Config, hw: Option<HwAccelProfile>, cancel: CancelToken) -> Self {
        Self {
            config,
            hw,
            aggregator: Arc::new(ProgressAggregator::new()),
            cancel,
            temp: Arc::new(TempRegistry::new()),
        }
    }

    /// Swap in a fresh aggregator, e.g. between batch phases.
    pub fn reset_aggregator(&mut self) {
        self.aggregator = Arc::new(ProgressAggregator::new());
    }
}
