//! Batch-level behavior of the progress aggregator: weighted rollup,
//! bounds, monotonicity, and snapshot consistency under concurrency.

use std::sync::Arc;
use std::sync::Mutex;

use squish_core::progress::{ProgressAggregator, SegmentInfo, WorkerStatus};

#[test]
fn overall_progress_stays_in_bounds_for_the_whole_lifecycle() {
    let agg = ProgressAggregator::new();

    // Nothing registered: zero
    assert_eq!(agg.snapshot().overall_progress, 0.0);

    agg.register("a", "file a", 50 * 1024 * 1024, None);
    agg.register("b", "file b", 150 * 1024 * 1024, None);
    assert_eq!(agg.snapshot().overall_progress, 0.0);

    for step in 1..=10 {
        agg.update("a", step as f64 / 10.0, 24.0, None);
        agg.update("b", step as f64 / 20.0, 24.0, None);
        let overall = agg.snapshot().overall_progress;
        assert!((0.0..=1.0).contains(&overall));
    }

    agg.complete("a");
    agg.complete("b");
    assert!((agg.snapshot().overall_progress - 1.0).abs() < 1e-9);
}

#[test]
fn per_worker_progress_is_monotonic_under_concurrent_updates() {
    let agg = Arc::new(ProgressAggregator::new());
    agg.register("w", "worker", 1024, None);

    let observed = Arc::new(Mutex::new(Vec::new()));

    std::thread::scope(|scope| {
        // Writers race with a reader taking snapshots
        for start in 0..4u32 {
            let agg = Arc::clone(&agg);
            scope.spawn(move || {
                for step in 0..50 {
                    let fraction = (start as f64 * 50.0 + step as f64) / 200.0;
                    agg.update("w", fraction, 30.0, None);
                }
            });
        }
        let agg = Arc::clone(&agg);
        let observed = Arc::clone(&observed);
        scope.spawn(move || {
            for _ in 0..200 {
                observed
                    .lock()
                    .unwrap()
                    .push(agg.snapshot().workers[0].progress);
            }
        });
    });

    let observed = observed.lock().unwrap();
    for pair in observed.windows(2) {
        assert!(pair[1] >= pair[0], "progress regressed: {:?}", pair);
    }
}

#[test]
fn failed_worker_keeps_batch_progress_monotonic() {
    let agg = ProgressAggregator::new();
    agg.register("good", "good", 1000, None);
    agg.register("bad", "bad", 1000, None);

    agg.update("good", 0.5, 30.0, None);
    agg.update("bad", 0.5, 30.0, None);
    let before = agg.snapshot().overall_progress;

    agg.fail("bad", "simulated encoder crash");
    let after = agg.snapshot().overall_progress;
    assert!(after >= before, "overall decreased on failure: {} -> {}", before, after);

    agg.complete("good");
    let snapshot = agg.snapshot();
    assert!((snapshot.overall_progress - 1.0).abs() < 1e-9);
    assert_eq!(snapshot.active_workers, 0);
    assert_eq!(
        snapshot
            .workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Failed)
            .count(),
        1
    );
}

#[test]
fn snapshots_are_internally_consistent() {
    let agg = Arc::new(ProgressAggregator::new());
    for i in 0..6 {
        agg.register(
            format!("seg{}", i),
            format!("Segment {}/6", i + 1),
            1_000_000,
            Some(SegmentInfo {
                current: i + 1,
                total: 6,
                duration_secs: Some(600.0),
            }),
        );
    }

    std::thread::scope(|scope| {
        for i in 0..6 {
            let agg = Arc::clone(&agg);
            scope.spawn(move || {
                for step in 1..=100 {
                    agg.update(&format!("seg{}", i), step as f64 / 100.0, 60.0, None);
                }
            });
        }
        let agg = Arc::clone(&agg);
        scope.spawn(move || {
            for _ in 0..100 {
                let snap = agg.snapshot();
                // A snapshot never shows a partially-registered batch
                assert_eq!(snap.total_workers, 6);
                assert_eq!(snap.workers.len(), 6);
                assert!(snap.active_workers <= snap.total_workers);
                assert!((0.0..=1.0).contains(&snap.overall_progress));
            }
        });
    });
}

#[test]
fn callback_receives_scaled_snapshots_without_blocking_updates() {
    let agg = ProgressAggregator::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    agg.set_callback(Arc::new(move |snap| {
        sink.lock().unwrap().push(snap.overall_progress);
    }));

    agg.register("w", "worker", 100, None);
    agg.update("w", 0.5, 0.0, None);
    agg.notify();
    agg.complete("w");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!((seen[0] - 0.5).abs() < 1e-9);
    assert!((seen[1] - 1.0).abs() < 1e-9);
}
