//! Disk space preflight.
//!
//! A compression run needs room for the source copy, the compressed
//! artifact, and segment slack on the temp filesystem, plus room for the
//! final artifact next to the source. Both checks must pass before any work
//! starts.

use std::path::Path;

use log::{debug, info, warn};

use crate::config::{Config, TEMP_SPACE_MULTIPLIER};
use crate::error::{Result, SquishError};
use crate::temp_files::compression_temp_dir;
use crate::util::fs::{file_size_gb, free_space_gb};

/// GB required on the temp filesystem for an input of `size_gb`.
pub fn required_temp_gb(size_gb: f64, min_free_gb: f64) -> f64 {
    size_gb * TEMP_SPACE_MULTIPLIER + min_free_gb
}

/// GB required on the destination filesystem for an input of `size_gb`.
pub fn required_dest_gb(size_gb: f64, min_free_gb: f64) -> f64 {
    size_gb + min_free_gb
}

/// Verify both filesystems can hold the intermediate and final artifacts.
pub fn check_disk_space(input: &Path, config: &Config) -> Result<()> {
    let size_gb = file_size_gb(input)?;
    let min_free = config.safety_settings.min_free_space_gb;

    let temp_dir = compression_temp_dir(input, config);
    // The temp dir may not exist yet; its parent is on the same filesystem.
    let temp_probe = if temp_dir.exists() {
        temp_dir.clone()
    } else {
        temp_dir.parent().unwrap_or(Path::new(".")).to_path_buf()
    };
    let dest_dir = input.parent().unwrap_or(Path::new("."));

    // Some mount configurations are invisible to the disk enumeration;
    // an indeterminate reading must not fail an otherwise healthy job
    let temp_free = match free_space_gb(&temp_probe) {
        Ok(free) => Some(free),
        Err(e) => {
            warn!(
                "Cannot determine free space for {}: {}; skipping temp space check",
                temp_probe.display(),
                e
            );
            None
        }
    };
    let dest_free = match free_space_gb(dest_dir) {
        Ok(free) => Some(free),
        Err(e) => {
            warn!(
                "Cannot determine free space for {}: {}; skipping destination space check",
                dest_dir.display(),
                e
            );
            None
        }
    };

    debug!(
        "Disk space analysis for {}: size {:.2}GB, temp free {:?}GB, dest free {:?}GB",
        input.display(),
        size_gb,
        temp_free,
        dest_free
    );

    let temp_needed = required_temp_gb(size_gb, min_free);
    if let Some(free) = temp_free {
        if free < temp_needed {
            return Err(SquishError::Preflight(format!(
                "insufficient temp space for {}: need {:.2}GB, have {:.2}GB",
                input.display(),
                temp_needed,
                free
            )));
        }
    }

    let dest_needed = required_dest_gb(size_gb, min_free);
    if let Some(free) = dest_free {
        if free < dest_needed {
            return Err(SquishError::Preflight(format!(
                "insufficient space for final file next to {}: need {:.2}GB, have {:.2}GB",
                input.display(),
                dest_needed,
                free
            )));
        }
    }

    info!("Sufficient disk space for {}", input.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_use_the_safety_multiplier() {
        assert_eq!(required_temp_gb(10.0, 15.0), 40.0);
        assert_eq!(required_dest_gb(10.0, 15.0), 25.0);
        assert_eq!(required_temp_gb(0.0, 15.0), 15.0);
    }

    #[test]
    fn missing_input_fails_preflight() {
        let config = Config::default();
        assert!(check_disk_space(Path::new("/nonexistent/file.mkv"), &config).is_err());
    }

    #[test]
    fn tiny_file_passes_on_a_normal_system() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mkv");
        std::fs::write(&input, vec![0u8; 4096]).unwrap();

        let mut config = Config::default();
        // Do not demand 15GB of headroom from the test machine
        config.safety_settings.min_free_space_gb = 0.0;
        assert!(check_disk_space(&input, &config).is_ok());
    }
}
