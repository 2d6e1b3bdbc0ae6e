//! Configuration structures for the squish-core library.
//!
//! The configuration is a JSON document split into sections mirroring the
//! concerns of the pipeline: compression parameters, safety thresholds,
//! large-file handling, segmentation tuning, timeouts, logging, and parallel
//! processing. Unknown keys are tolerated so configs survive version skew;
//! missing keys take the documented defaults; a missing file is created
//! populated with defaults on first use.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SquishError};

/// Software encoders accepted for `video_codec`.
pub const SUPPORTED_CODECS: [&str; 3] = ["libx265", "libx264", "libvpx-vp9"];

/// The nine x264/x265 preset levels, fastest first.
pub const SUPPORTED_PRESETS: [&str; 9] = [
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

/// Fixed safety multiplier applied to the input size when computing required
/// temp space: the source, the compressed copy, and slack for segments.
pub const TEMP_SPACE_MULTIPLIER: f64 = 2.5;

/// Compression parameters handed to the transcoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Software encoder to use (libx265, libx264, libvpx-vp9)
    pub video_codec: String,
    /// Encoder preset, one of the nine x264/x265 levels
    pub preset: String,
    /// Constant rate factor, 15..=35
    pub crf: u32,
    /// Keep 10-bit pixel formats instead of downsampling to 8-bit
    pub preserve_10bit: bool,
    /// Copy container metadata and set the faststart flag
    pub preserve_metadata: bool,
    /// Multiplied with the source video bitrate to produce a bitrate cap
    /// (software encoders only). `None` disables the cap.
    pub target_bitrate_reduction: Option<f64>,
    /// Try hardware encoders when the platform offers them
    pub enable_hardware_acceleration: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx265".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            preserve_10bit: true,
            preserve_metadata: true,
            target_bitrate_reduction: Some(0.5),
            enable_hardware_acceleration: true,
        }
    }
}

/// Thresholds guarding destructive operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    /// Free space that must remain on a filesystem after we use it, in GB
    pub min_free_space_gb: f64,
    /// Run the full integrity verification on every produced artifact
    pub verify_integrity: bool,
    /// Hash the source before compressing it
    pub create_backup_hash: bool,
    /// Encode attempts per file before giving up
    pub max_retries: u32,
    /// Delete the source once the replacement has been verified in place
    pub delete_original_after_compression: bool,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            min_free_space_gb: 15.0,
            verify_integrity: true,
            create_backup_hash: true,
            max_retries: 3,
            delete_original_after_compression: true,
        }
    }
}

/// Settings that only apply to files above the large-file threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeFileSettings {
    /// Files at or above this size are routed to the large-file strategy, GB
    pub threshold_gb: f64,
    /// Size half of the segmentation decision, GB (both halves must exceed)
    pub segmentation_threshold_gb: f64,
    /// Chunk size for streaming hashes, MB
    pub hash_chunk_size_mb: u64,
    /// Scale probe timeouts with file size
    pub extended_timeouts: bool,
    /// Place temp directories next to the input instead of `temp_dir`
    pub use_same_filesystem: bool,
}

impl Default for LargeFileSettings {
    fn default() -> Self {
        Self {
            threshold_gb: 10.0,
            segmentation_threshold_gb: 10.0,
            hash_chunk_size_mb: 5,
            extended_timeouts: true,
            use_same_filesystem: true,
        }
    }
}

/// Tuning for the segment-mux stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Length of each segment, seconds
    pub segment_duration_seconds: u32,
    /// Duration half of the segmentation decision, minutes
    pub duration_threshold_minutes: f64,
    /// Segmentation timeout scale factor, minutes per GB of input
    pub segmentation_timeout_minutes_per_gb: f64,
    /// Floor for the segmentation timeout, minutes
    pub min_segmentation_timeout_minutes: f64,
    /// Warn when segment sizes drift from the original by more than this, percent
    pub size_difference_warning_percent: f64,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            segment_duration_seconds: 600,
            duration_threshold_minutes: 60.0,
            segmentation_timeout_minutes_per_gb: 1.0,
            min_segmentation_timeout_minutes: 5.0,
            size_difference_warning_percent: 5.0,
        }
    }
}

/// Hard timeouts for the long-running operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Per-file timeout for the small-file path, hours
    pub small_file_timeout_hours: u64,
    /// Per-segment timeout for the worker pool, hours
    pub segment_timeout_hours: u64,
    /// Warn when the merged output drifts from the segment sum, percent
    pub merge_size_difference_warning_percent: f64,
    /// Minimum spacing between per-segment progress log lines, seconds
    pub segment_progress_log_interval_seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            small_file_timeout_hours: 2,
            segment_timeout_hours: 1,
            merge_size_difference_warning_percent: 10.0,
            segment_progress_log_interval_seconds: 30,
        }
    }
}

/// Log file retention, consumed by the CLI's logging setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Keep at most this many log files in `log_dir`
    pub max_log_files: usize,
    pub max_log_size_mb: u64,
    /// Console log level name (DEBUG, INFO, WARNING, ERROR)
    pub console_level: String,
    /// File log level name
    pub file_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            max_log_files: 5,
            max_log_size_mb: 10,
            console_level: "INFO".to_string(),
            file_level: "DEBUG".to_string(),
        }
    }
}

/// Parallel processing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    /// Master switch; disabled means strictly sequential processing
    pub enabled: bool,
    /// Requested worker count, clamped by CPU count and `max_workers_limit`
    pub max_workers: usize,
    /// Hard ceiling on the worker count
    pub max_workers_limit: usize,
    /// Compress segments of one large file concurrently
    pub segment_parallel: bool,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 4,
            max_workers_limit: 16,
            segment_parallel: true,
        }
    }
}

/// Main configuration for a compression batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the ffmpeg binary; ffprobe is derived from it
    pub ffmpeg_path: PathBuf,
    /// Temp directory used when `use_same_filesystem` is off
    pub temp_dir: PathBuf,
    /// Directory for log files
    pub log_dir: PathBuf,

    pub compression_settings: CompressionSettings,
    pub safety_settings: SafetySettings,
    pub large_file_settings: LargeFileSettings,
    pub segmentation_settings: SegmentationSettings,
    pub timeout_settings: TimeoutSettings,
    pub logging_settings: LoggingSettings,
    pub parallel_processing: ParallelSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_dir: PathBuf::from("/tmp/video_compression"),
            log_dir: PathBuf::from("./logs"),
            compression_settings: CompressionSettings::default(),
            safety_settings: SafetySettings::default(),
            large_file_settings: LargeFileSettings::default(),
            segmentation_settings: SegmentationSettings::default(),
            timeout_settings: TimeoutSettings::default(),
            logging_settings: LoggingSettings::default(),
            parallel_processing: ParallelSettings::default(),
        }
    }
}

impl Config {
    /// Load a configuration file, creating one populated with defaults when
    /// the file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = serde_json::from_str(&contents)
                    .map_err(|e| SquishError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Config file {} not found, creating defaults", path.display());
                let config = Config::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SquishError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reject configurations the transcoder or the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        let c = &self.compression_settings;
        if !SUPPORTED_CODECS.contains(&c.video_codec.as_str()) {
            return Err(SquishError::Config(format!(
                "unsupported video_codec '{}' (expected one of {:?})",
                c.video_codec, SUPPORTED_CODECS
            )));
        }
        if !SUPPORTED_PRESETS.contains(&c.preset.as_str()) {
            return Err(SquishError::Config(format!(
                "unsupported preset '{}' (expected one of {:?})",
                c.preset, SUPPORTED_PRESETS
            )));
        }
        if !(15..=35).contains(&c.crf) {
            return Err(SquishError::Config(format!(
                "crf {} out of range (15..=35)",
                c.crf
            )));
        }
        if let Some(reduction) = c.target_bitrate_reduction {
            if !(0.0..=1.0).contains(&reduction) || reduction == 0.0 {
                return Err(SquishError::Config(format!(
                    "target_bitrate_reduction {} out of range (0, 1]",
                    reduction
                )));
            }
        }
        if self.parallel_processing.max_workers == 0 || self.parallel_processing.max_workers_limit == 0 {
            return Err(SquishError::Config(
                "max_workers and max_workers_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Path to ffprobe, derived from `ffmpeg_path` by replacing the binary
    /// name so both tools come from the same installation.
    pub fn ffprobe_path(&self) -> PathBuf {
        match self.ffmpeg_path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.contains("ffmpeg") => {
                self.ffmpeg_path.with_file_name(name.replace("ffmpeg", "ffprobe"))
            }
            _ => PathBuf::from("ffprobe"),
        }
    }

    /// Worker pool bound: `min(max_workers, max_workers_limit, cpu_count)`,
    /// never less than 1.
    pub fn worker_pool_size(&self) -> usize {
        let p = &self.parallel_processing;
        p.max_workers
            .min(p.max_workers_limit)
            .min(num_cpus::get())
            .max(1)
    }

    /// Hard timeout for one small-file encode.
    pub fn small_file_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_settings.small_file_timeout_hours * 3600)
    }

    /// Hard timeout for one segment encode.
    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_settings.segment_timeout_hours * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.compression_settings.video_codec, "libx265");
        assert_eq!(config.compression_settings.crf, 23);
        assert_eq!(config.safety_settings.min_free_space_gb, 15.0);
        assert_eq!(config.large_file_settings.threshold_gb, 10.0);
        assert_eq!(config.segmentation_settings.segment_duration_seconds, 600);
        assert_eq!(config.parallel_processing.max_workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_and_missing_keys_are_tolerated() {
        let json = r#"{
            "compression_settings": { "crf": 28, "mystery_knob": true },
            "future_section": { "anything": 1 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.compression_settings.crf, 28);
        // Missing keys fall back to defaults
        assert_eq!(config.compression_settings.video_codec, "libx265");
        assert_eq!(config.safety_settings.max_retries, 3);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.compression_settings.video_codec = "librav1e".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.compression_settings.crf = 51;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.compression_settings.preset = "warp9".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.compression_settings.target_bitrate_reduction = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn ffprobe_path_is_derived_from_ffmpeg_path() {
        let mut config = Config::default();
        config.ffmpeg_path = PathBuf::from("/opt/homebrew/bin/ffmpeg");
        assert_eq!(
            config.ffprobe_path(),
            PathBuf::from("/opt/homebrew/bin/ffprobe")
        );

        config.ffmpeg_path = PathBuf::from("ffmpeg");
        assert_eq!(config.ffprobe_path(), PathBuf::from("ffprobe"));
    }

    #[test]
    fn worker_pool_size_is_bounded() {
        let mut config = Config::default();
        config.parallel_processing.max_workers = 64;
        config.parallel_processing.max_workers_limit = 6;
        assert!(config.worker_pool_size() <= 6);
        assert!(config.worker_pool_size() >= 1);
    }

    #[test]
    fn load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.compression_settings.crf, 23);

        // Second load reads the file it just wrote
        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded.compression_settings.preset, "medium");
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load_or_create(&path),
            Err(SquishError::Config(_))
        ));
    }
}
