//! Bounded worker pool.
//!
//! Work items are preloaded onto a channel and drained by a fixed set of
//! scoped consumer threads. A panicking job is converted into a failure
//! result instead of unwinding the pool, so one poisoned item never takes
//! down the batch. Results are delivered in arrival order.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crossbeam_channel::bounded;
use log::info;

use crate::error::{Result, SquishError};

/// Pool size for a work list: `min(max_concurrent_jobs, |work|)`, at least 1.
pub fn pool_size(max_concurrent_jobs: usize, work_items: usize) -> usize {
    max_concurrent_jobs.min(work_items).max(1)
}

/// Run `job` over every item with at most `workers` concurrent invocations.
///
/// Each returned pair carries the original item and its result, in the order
/// jobs finished. Panics inside `job` become `Err` results.
pub fn run_pool<T, R, F>(items: Vec<T>, workers: usize, job: F) -> Vec<(T, Result<R>)>
where
    T: Send,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = pool_size(workers, items.len());
    info!(
        "Starting worker pool: {} workers for {} items",
        workers,
        items.len()
    );

    let (work_tx, work_rx) = bounded(items.len());
    for item in items {
        work_tx.send(item).expect("preloading a sized channel");
    }
    drop(work_tx);

    let (result_tx, result_rx) = bounded(work_rx.len());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let job = &job;
            scope.spawn(move || {
                while let Ok(item) = work_rx.recv() {
                    let result = match catch_unwind(AssertUnwindSafe(|| job(&item))) {
                        Ok(result) => result,
                        Err(panic) => Err(SquishError::Other(format!(
                            "worker panicked: {}",
                            panic_message(&panic)
                        ))),
                    };
                    if result_tx.send((item, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut results = Vec::new();
        while let Ok(pair) = result_rx.recv() {
            results.push(pair);
        }
        results
    })
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn pool_size_is_bounded_by_items_and_config() {
        assert_eq!(pool_size(4, 10), 4);
        assert_eq!(pool_size(4, 2), 2);
        assert_eq!(pool_size(0, 2), 1);
        assert_eq!(pool_size(4, 0), 1);
    }

    #[test]
    fn all_items_produce_results() {
        let items: Vec<usize> = (0..20).collect();
        let results = run_pool(items, 4, |n| Ok(n * 2));
        assert_eq!(results.len(), 20);
        for (item, result) in results {
            assert_eq!(result.unwrap(), item * 2);
        }
    }

    #[test]
    fn failures_do_not_stop_other_items() {
        let items: Vec<usize> = (0..10).collect();
        let results = run_pool(items, 3, |n| {
            if n % 2 == 0 {
                Err(SquishError::Other(format!("item {} failed", n)))
            } else {
                Ok(*n)
            }
        });
        assert_eq!(results.len(), 10);
        assert_eq!(results.iter().filter(|(_, r)| r.is_err()).count(), 5);
    }

    #[test]
    fn panics_become_failure_results() {
        let items: Vec<usize> = (0..4).collect();
        let results = run_pool(items, 2, |n| {
            if *n == 2 {
                panic!("boom on {}", n);
            }
            Ok(*n)
        });
        assert_eq!(results.len(), 4);
        let failed: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, 2);
        match &failed[0].1 {
            Err(SquishError::Other(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected panic failure, got {:?}", other),
        }
    }

    #[test]
    fn concurrency_never_exceeds_the_worker_bound() {
        let current = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let items: Vec<usize> = (0..16).collect();
        run_pool(items, 3, |_| {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn empty_input_returns_no_results() {
        let results = run_pool(Vec::<usize>::new(), 4, |n| Ok(*n));
        assert!(results.is_empty());
    }
}
