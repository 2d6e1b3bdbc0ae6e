//! Filesystem helpers: free-space queries and safe file moves.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use sysinfo::Disks;

use crate::error::{Result, SquishError};

/// Bytes of free space on the filesystem holding `path`.
///
/// The mount table is scanned for the disk whose mount point is the longest
/// prefix of the (canonicalized) path. Fails when no disk matches, which on
/// practical systems means the path itself is bogus.
pub fn free_space_bytes(path: &Path) -> Result<u64> {
    // Canonicalize so relative paths and symlinks resolve to a real mount.
    // Fall back to the raw path for not-yet-created locations.
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if resolved.starts_with(mount) {
            let depth = mount.components().count();
            if best.map_or(true, |(d, _)| depth >= d) {
                best = Some((depth, disk.available_space()));
            }
        }
    }

    match best {
        Some((_, available)) => {
            debug!(
                "Free space for {}: {:.2}GB",
                resolved.display(),
                available as f64 / 1024f64.powi(3)
            );
            Ok(available)
        }
        None => Err(SquishError::InvalidPath(format!(
            "no filesystem found for {}",
            resolved.display()
        ))),
    }
}

/// Free space in GB on the filesystem holding `path`.
pub fn free_space_gb(path: &Path) -> Result<f64> {
    Ok(free_space_bytes(path)? as f64 / 1024f64.powi(3))
}

/// Size of a file in bytes.
pub fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)?.len())
}

/// Size of a file in GB.
pub fn file_size_gb(path: &Path) -> Result<f64> {
    Ok(file_size(path)? as f64 / 1024f64.powi(3))
}

/// Move a file, preferring an atomic rename.
///
/// When source and destination live on different filesystems the rename
/// fails; the file is then copied to a `.part` sibling of the destination
/// and renamed into place so the destination never holds a partial file
/// under its final name.
pub fn move_file(source: &Path, dest: &Path) -> Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            let staging = staging_path(dest);
            let copied = fs::copy(source, &staging);
            if let Err(e) = copied {
                let _ = fs::remove_file(&staging);
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&staging, dest) {
                let _ = fs::remove_file(&staging);
                return Err(e.into());
            }
            fs::remove_file(source)?;
            Ok(())
        }
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_file_renames_within_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("b.bin");
        fs::write(&src, b"payload").unwrap();

        move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn file_size_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        fs::write(&path, vec![0u8; 2048]).unwrap();
        assert_eq!(file_size(&path).unwrap(), 2048);
    }

    #[test]
    fn free_space_is_positive_when_a_filesystem_matches() {
        // Disk enumeration can be empty in minimal environments; when a
        // filesystem is visible the reported free space must be positive.
        let dir = tempfile::tempdir().unwrap();
        if let Ok(free) = free_space_bytes(dir.path()) {
            assert!(free > 0);
        }
    }

    #[test]
    fn staging_path_appends_part_suffix() {
        let dest = Path::new("/data/movie_compressed.mkv");
        assert_eq!(
            staging_path(dest),
            PathBuf::from("/data/movie_compressed.mkv.part")
        );
    }
}
