//! End-to-end dispatcher behavior that does not require a transcoder on the
//! test machine: classification, dry-run safety, cancellation, temp
//! hygiene, and summary accounting.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use squish_core::{CancelToken, Config, SquishError, process_batch};

fn test_config() -> Config {
    let mut config = Config::default();
    config.safety_settings.min_free_space_gb = 0.0;
    config
}

#[test]
fn empty_batch_reports_nothing_processed() {
    let summary = process_batch(&[], &test_config(), false, None, CancelToken::new()).unwrap();
    assert!(summary.processed.is_empty());
    assert!(summary.failed.is_empty());
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn missing_inputs_are_skipped_with_exit_code_one() {
    let summary = process_batch(
        &[
            PathBuf::from("/no/such/file_a.mkv"),
            PathBuf::from("/no/such/file_b.mkv"),
        ],
        &test_config(),
        false,
        None,
        CancelToken::new(),
    )
    .unwrap();
    assert_eq!(summary.skipped.len(), 2);
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn dry_run_leaves_the_directory_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("movie.mkv");
    fs::write(&input, vec![0u8; 64 * 1024]).unwrap();

    let mut before: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    before.sort();

    // Probing a junk file fails, but a dry run must not create or delete
    // anything either way
    let _ = process_batch(&[input.clone()], &test_config(), true, None, CancelToken::new());

    let mut after: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    after.sort();
    assert_eq!(before, after);
    assert_eq!(fs::metadata(&input).unwrap().len(), 64 * 1024);
}

#[test]
fn pre_cancelled_batch_unwinds_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("movie.mkv");
    fs::write(&input, vec![0u8; 8192]).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();

    let result = process_batch(&[input.clone()], &test_config(), false, None, cancel);
    assert!(matches!(result, Err(SquishError::Cancelled)));

    // Source intact, no temp litter
    assert!(input.exists());
    assert!(!dir.path().join(".video_compression_temp").exists());
    assert!(!dir.path().join(".video_segments_temp").exists());
}

#[test]
fn failed_probe_fails_the_job_and_keeps_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("not_a_video.mkv");
    fs::write(&input, vec![0u8; 8192]).unwrap();

    // ffprobe is either absent or will reject the junk payload; both paths
    // must produce a job failure, exit code 2, and an intact source.
    let summary = process_batch(
        &[input.clone()],
        &test_config(),
        false,
        None,
        CancelToken::new(),
    )
    .unwrap();

    assert_eq!(summary.processed.len(), 0);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.exit_code(), 2);
    assert!(input.exists());
    assert!(!dir.path().join(".video_compression_temp").exists());
    assert!(!dir.path().join(".video_segments_temp").exists());
}

#[test]
fn progress_callback_observes_bounded_overall_values() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("not_a_video.mkv");
    fs::write(&input, vec![0u8; 8192]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let _ = process_batch(
        &[input],
        &test_config(),
        false,
        Some(Arc::new(move |snap| {
            sink.lock().unwrap().push(snap.overall_progress);
        })),
        CancelToken::new(),
    );

    for value in seen.lock().unwrap().iter() {
        assert!((0.0..=1.0).contains(value), "out of bounds: {}", value);
    }
}
