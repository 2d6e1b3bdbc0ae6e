//! Temporary directory ownership.
//!
//! Every job owns its temp directories exclusively: a
//! `.video_compression_temp` sibling of the input for in-progress artifacts
//! and a `.video_segments_temp` sibling for segment files. Both are recorded
//! in a [`TempRegistry`] owned by the batch, which is drained on every exit
//! path (success, failure, and cancellation) so no temp litter survives a
//! run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};

use crate::config::Config;
use crate::error::Result;

/// Name of the per-file temp directory holding the in-progress artifact.
pub const COMPRESSION_TEMP_DIR: &str = ".video_compression_temp";

/// Name of the per-file directory holding segments during the large-file flow.
pub const SEGMENTS_TEMP_DIR: &str = ".video_segments_temp";

/// Directory where a job stages its compressed artifact: next to the input
/// when `use_same_filesystem` is set, otherwise under the configured temp dir.
pub fn compression_temp_dir(input: &Path, config: &Config) -> PathBuf {
    if config.large_file_settings.use_same_filesystem {
        input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(COMPRESSION_TEMP_DIR)
    } else {
        config.temp_dir.clone()
    }
}

/// Directory where a job's segments are written.
pub fn segments_temp_dir(input: &Path, config: &Config) -> PathBuf {
    if config.large_file_settings.use_same_filesystem {
        input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SEGMENTS_TEMP_DIR)
    } else {
        config.temp_dir.join("video_segments")
    }
}

/// Name of the in-progress and final artifact for an input:
/// `<stem>_compressed<ext>`.
pub fn compressed_name(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    PathBuf::from(format!("{}_compressed{}", stem, ext))
}

/// Final output path: `<source_dir>/<stem>_compressed<ext>`.
pub fn final_output_path(input: &Path) -> PathBuf {
    input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(compressed_name(input))
}

/// Batch-scoped record of every temp directory created by any job.
#[derive(Debug, Default)]
pub struct TempRegistry {
    dirs: Mutex<Vec<PathBuf>>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a temp directory and record it for end-of-batch cleanup.
    pub fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        let mut dirs = self.dirs.lock().unwrap();
        if !dirs.iter().any(|d| d == path) {
            dirs.push(path.to_path_buf());
        }
        Ok(())
    }

    /// Remove one registered directory and everything in it. Best-effort.
    pub fn cleanup_dir(&self, path: &Path) {
        remove_tree(path);
        self.dirs.lock().unwrap().retain(|d| d != path);
    }

    /// Remove every registered directory. Called on batch exit.
    pub fn cleanup_all(&self) {
        let dirs = std::mem::take(&mut *self.dirs.lock().unwrap());
        for dir in dirs {
            remove_tree(&dir);
        }
    }
}

fn remove_tree(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => debug!("Cleaned up temp directory: {}", path.display()),
        Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
    }
}

/// Remove one job's artifacts from its temp directories.
///
/// Jobs whose sources share a directory also share the temp directories, so
/// per-job cleanup must only touch files derived from this job's stem. The
/// directories themselves are removed once empty; the registry sweeps
/// whatever is left at batch exit.
pub fn cleanup_job_artifacts(source: &Path, config: &Config) {
    let Some(stem) = source.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return;
    };

    let temp_dir = compression_temp_dir(source, config);
    let segments_dir = segments_temp_dir(source, config);
    for dir in [&temp_dir, &segments_dir] {
        remove_stem_artifacts(dir, &stem);
        if dir.exists() {
            // Succeeds only when no other job still owns files here
            let _ = fs::remove_dir(dir);
        }
    }
}

fn remove_stem_artifacts(dir: &Path, stem: &str) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let segment_prefix = format!("{}_segment_", stem);
    let compressed_prefix = format!("{}_compressed", stem);
    let concat_prefix = format!("concat_list_{}", stem);

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let owned = name.starts_with(&segment_prefix)
            || name.starts_with(&compressed_prefix)
            || name.starts_with(&concat_prefix);
        if owned && entry.path().is_file() {
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!("Cleaned up temp file: {}", entry.path().display()),
                Err(e) => warn!("Failed to clean up {}: {}", entry.path().display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dirs_sit_next_to_input_on_same_filesystem() {
        let config = Config::default();
        let input = Path::new("/media/movies/big.mkv");
        assert_eq!(
            compression_temp_dir(input, &config),
            PathBuf::from("/media/movies/.video_compression_temp")
        );
        assert_eq!(
            segments_temp_dir(input, &config),
            PathBuf::from("/media/movies/.video_segments_temp")
        );
    }

    #[test]
    fn temp_dirs_use_configured_location_otherwise() {
        let mut config = Config::default();
        config.large_file_settings.use_same_filesystem = false;
        config.temp_dir = PathBuf::from("/scratch");
        let input = Path::new("/media/movies/big.mkv");
        assert_eq!(compression_temp_dir(input, &config), PathBuf::from("/scratch"));
        assert_eq!(
            segments_temp_dir(input, &config),
            PathBuf::from("/scratch/video_segments")
        );
    }

    #[test]
    fn compressed_name_keeps_extension() {
        assert_eq!(
            compressed_name(Path::new("/d/movie.mkv")),
            PathBuf::from("movie_compressed.mkv")
        );
        assert_eq!(
            final_output_path(Path::new("/d/movie.mkv")),
            PathBuf::from("/d/movie_compressed.mkv")
        );
    }

    #[test]
    fn registry_cleans_registered_dirs() {
        let base = tempfile::tempdir().unwrap();
        let registry = TempRegistry::new();

        let dir_a = base.path().join(COMPRESSION_TEMP_DIR);
        let dir_b = base.path().join(SEGMENTS_TEMP_DIR);
        registry.create_dir(&dir_a).unwrap();
        registry.create_dir(&dir_b).unwrap();
        fs::write(dir_a.join("leftover.mkv"), b"x").unwrap();

        registry.cleanup_all();
        assert!(!dir_a.exists());
        assert!(!dir_b.exists());
    }

    #[test]
    fn job_cleanup_spares_files_of_other_jobs() {
        let base = tempfile::tempdir().unwrap();
        let source_a = base.path().join("alpha.mkv");
        let source_b = base.path().join("beta.mkv");
        let config = Config::default();

        let temp_dir = compression_temp_dir(&source_a, &config);
        let segments_dir = segments_temp_dir(&source_a, &config);
        fs::create_dir_all(&temp_dir).unwrap();
        fs::create_dir_all(&segments_dir).unwrap();

        fs::write(temp_dir.join("alpha_compressed.mkv"), b"a").unwrap();
        fs::write(temp_dir.join("beta_compressed.mkv"), b"b").unwrap();
        fs::write(segments_dir.join("alpha_segment_000.mkv"), b"a").unwrap();
        fs::write(segments_dir.join("alpha_compressed_segment_000.mkv"), b"a").unwrap();
        fs::write(segments_dir.join("concat_list_alpha_compressed.txt"), b"a").unwrap();
        fs::write(segments_dir.join("beta_segment_000.mkv"), b"b").unwrap();

        cleanup_job_artifacts(&source_a, &config);

        // Alpha's artifacts are gone; beta's are untouched
        assert!(!temp_dir.join("alpha_compressed.mkv").exists());
        assert!(temp_dir.join("beta_compressed.mkv").exists());
        assert!(!segments_dir.join("alpha_segment_000.mkv").exists());
        assert!(!segments_dir.join("alpha_compressed_segment_000.mkv").exists());
        assert!(!segments_dir.join("concat_list_alpha_compressed.txt").exists());
        assert!(segments_dir.join("beta_segment_000.mkv").exists());

        // Shared dirs survive while beta still owns files in them
        assert!(temp_dir.exists());
        assert!(segments_dir.exists());

        cleanup_job_artifacts(&source_b, &config);
        assert!(!temp_dir.exists());
        assert!(!segments_dir.exists());
    }

    #[test]
    fn cleanup_dir_removes_only_the_given_dir() {
        let base = tempfile::tempdir().unwrap();
        let registry = TempRegistry::new();

        let dir_a = base.path().join("a");
        let dir_b = base.path().join("b");
        registry.create_dir(&dir_a).unwrap();
        registry.create_dir(&dir_b).unwrap();

        registry.cleanup_dir(&dir_a);
        assert!(!dir_a.exists());
        assert!(dir_b.exists());
    }
}
