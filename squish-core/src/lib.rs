//! # squish-core
//!
//! Core library for safe, high-throughput batch video compression driving
//! ffmpeg and ffprobe.
//!
//! ## Overview
//!
//! Given a list of video files and compression parameters, squish produces
//! compressed replacements with zero risk of data loss while keeping the
//! configured encoder capacity busy. Small files are compressed whole
//! through a bounded worker pool; large files flow through a segmentation →
//! parallel compression → merge pipeline. Every replacement is wrapped in a
//! safety protocol (space check → hash → compress → verify → atomic replace
//! → delete original), so a source file is never deleted until its
//! replacement has been verified in place.
//!
//! ## Module Structure
//!
//! - `config`: typed configuration with JSON persistence and defaults.
//! - `error`: the `SquishError` type and `Result` alias.
//! - `media`: ffprobe invocation and typed probe results.
//! - `hwaccel`: hardware encoder detection.
//! - `encoding`: argument building, encode execution, segmentation, merge,
//!   the worker pool, and the large-file pipeline.
//! - `validation`: disk space preflight, content hashes, and artifact
//!   verification.
//! - `progress`: the thread-safe progress aggregator and snapshots.
//! - `processing`: job classification, the dispatcher, the per-file safety
//!   protocol, and dry-run analysis.
//! - `temp_files`: per-job temp directory ownership and batch cleanup.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use squish_core::{CancelToken, Config, process_batch};
//!
//! let config = Config::load_or_create(std::path::Path::new("config.json")).unwrap();
//! let files = vec![PathBuf::from("/media/movie.mkv")];
//! let summary = process_batch(&files, &config, false, None, CancelToken::new()).unwrap();
//! std::process::exit(summary.exit_code());
//! ```

pub mod cancel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod hwaccel;
pub mod media;
pub mod processing;
pub mod progress;
pub mod temp_files;
pub mod util;
pub mod utils;
pub mod validation;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Result, SquishError};
pub use hwaccel::{HwAccelProfile, detect_hardware_acceleration};
pub use media::{MediaInfo, probe_media};
pub use processing::{BatchSummary, FileOutcome, ProcessContext, process_batch, process_file};
pub use progress::{ProgressAggregator, ProgressSnapshot, SnapshotCallback, WorkerStatus};
pub use utils::{format_bytes, format_duration};
