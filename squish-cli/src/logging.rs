//! Logging setup: console plus a timestamped file in the configured log
//! directory, with count-based retention of old logs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::LevelFilter;
use squish_core::Config;

/// Current local timestamp as "YYYYMMDD_HHMMSS", used in log file names.
pub fn get_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn parse_level(name: &str) -> LevelFilter {
    match name.to_ascii_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARNING" | "WARN" => LevelFilter::Warn,
        // log has no level above error; CRITICAL collapses into it
        "ERROR" | "CRITICAL" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Install the fern dispatcher. Returns the path of the session log file.
pub fn setup(config: &Config, verbose: bool) -> anyhow::Result<PathBuf> {
    let log_dir = &config.log_dir;
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    cleanup_old_logs(log_dir, config.logging_settings.max_log_files);

    let log_path = log_dir.join(format!("squish_{}.log", get_timestamp()));

    let console_level = if verbose {
        LevelFilter::Debug
    } else {
        parse_level(&config.logging_settings.console_level)
    };
    let file_level = parse_level(&config.logging_settings.file_level);

    let console = fern::Dispatch::new()
        .level(console_level)
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .level(file_level)
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{:>5}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(fern::log_file(&log_path).with_context(|| {
            format!("failed to create log file {}", log_path.display())
        })?);

    fern::Dispatch::new()
        .chain(console)
        .chain(file)
        .apply()
        .context("failed to install logger")?;

    log::info!("=== squish session started ===");
    log::info!("Log file: {}", log_path.display());
    Ok(log_path)
}

/// Keep only the most recent `keep_count` session logs.
pub fn cleanup_old_logs(log_dir: &Path, keep_count: usize) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    let mut logs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("squish_") && n.ends_with(".log"))
        })
        .collect();

    logs.sort_by_key(|path| {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });
    logs.reverse();

    for old in logs.iter().skip(keep_count) {
        if fs::remove_file(old).is_ok() {
            eprintln!("Cleaned up old log: {}", old.display());
        }
    }
}
