//! Streaming content hashes.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::Result;

const GIB: u64 = 1024 * 1024 * 1024;

/// SHA-256 of a file's contents, streamed in `hash_chunk_size_mb` chunks.
///
/// Sources larger than 1 GB emit a debug progress line every 10% so long
/// hashes are visibly alive in the logs.
pub fn hash_file(path: &Path, config: &Config) -> Result<String> {
    let chunk_size = (config.large_file_settings.hash_chunk_size_mb.max(1) * 1024 * 1024) as usize;
    let file_size = std::fs::metadata(path)?.len();

    info!(
        "Calculating hash for {} ({:.2}GB)",
        path.display(),
        file_size as f64 / GIB as f64
    );

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size];
    let mut bytes_processed: u64 = 0;
    let mut last_progress_log = 0u64;

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        bytes_processed += read as u64;

        if file_size > GIB {
            let progress = bytes_processed * 100 / file_size;
            if progress >= last_progress_log + 10 {
                debug!("Hash progress: {}%", progress);
                last_progress_log = progress;
            }
        }
    }

    let digest = hex::encode(hasher.finalize());
    debug!("Hash calculated: {}...", &digest[..16]);
    Ok(digest)
}
