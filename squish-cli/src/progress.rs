//! Progress bar rendering of batch snapshots.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use squish_core::progress::ProgressSnapshot;
use squish_core::SnapshotCallback;

/// Snapshot positions map onto a fixed-resolution bar.
const BAR_RESOLUTION: u64 = 1000;

pub struct ProgressRenderer {
    bar: ProgressBar,
}

impl ProgressRenderer {
    pub fn new() -> Self {
        let bar = ProgressBar::new(BAR_RESOLUTION);
        let style = ProgressStyle::with_template(
            "{bar:40.cyan/blue} {percent:>3}% {msg}",
        )
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    /// Callback handed to the dispatcher. Must stay cheap; it runs on worker
    /// threads.
    pub fn callback(&self) -> SnapshotCallback {
        let bar = self.bar.clone();
        Arc::new(move |snapshot: &ProgressSnapshot| {
            bar.set_position((snapshot.overall_progress * BAR_RESOLUTION as f64) as u64);
            bar.set_message(format!(
                "{}/{} workers | {:.1} MB/s",
                snapshot.active_workers, snapshot.total_workers, snapshot.throughput_mbps
            ));
        })
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressRenderer {
    fn default() -> Self {
        Self::new()
    }
}
