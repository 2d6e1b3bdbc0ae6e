//! Command-line argument definitions.

use std::path::PathBuf;

use clap::Parser;

/// Safe batch video compression: compress, verify, replace.
#[derive(Debug, Parser)]
#[command(name = "squish", version, about)]
pub struct Cli {
    /// Video files to process
    pub files: Vec<PathBuf>,

    /// Text file containing video file paths, one per line
    #[arg(long, value_name = "LIST")]
    pub files_from: Option<PathBuf>,

    /// Process a single video file
    #[arg(long, value_name = "FILE")]
    pub single: Option<PathBuf>,

    /// Config file path; created with defaults when missing
    #[arg(long, default_value = "config.json", value_name = "PATH")]
    pub config: PathBuf,

    /// Preview operations without executing anything destructive
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the interactive safety confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Enable debug-level console logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the file list: `--single` wins, then `--files-from`, then the
    /// positional list.
    pub fn resolve_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        if let Some(single) = &self.single {
            return Ok(vec![single.clone()]);
        }
        if let Some(list) = &self.files_from {
            let contents = std::fs::read_to_string(list)
                .map_err(|e| anyhow::anyhow!("cannot read file list {}: {}", list.display(), e))?;
            return Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect());
        }
        Ok(self.files.clone())
    }
}
