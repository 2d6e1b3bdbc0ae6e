//! squish: safe batch video compression.
//!
//! Parses arguments, loads the configuration, wires logging and the
//! progress bar, installs the interrupt handler, and hands the batch to
//! squish-core. Exit codes: 0 full success, 1 user-visible failure
//! (nothing processed, bad config, cancelled), 2 partial failure.

mod args;
mod logging;
mod progress;

use std::io::Write;

use clap::Parser;
use squish_core::{CancelToken, Config, SquishError, format_bytes, process_batch};

use args::Cli;
use progress::ProgressRenderer;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    let config = match Config::load_or_create(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 1;
        }
    };

    if let Err(e) = logging::setup(&config, cli.verbose) {
        eprintln!("Failed to set up logging: {}", e);
        return 1;
    }

    let files = match cli.resolve_files() {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    if files.is_empty() {
        eprintln!("No files specified. Pass file paths, --files-from, or --single.");
        return 1;
    }

    if !cli.dry_run && !cli.yes && !confirm_destructive_batch(files.len()) {
        println!("Operation cancelled.");
        return 0;
    }

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    let renderer = (!cli.no_progress && !cli.dry_run).then(ProgressRenderer::new);
    let callback = renderer.as_ref().map(|r| r.callback());

    let result = process_batch(&files, &config, cli.dry_run, callback, cancel);

    if let Some(renderer) = &renderer {
        renderer.finish();
    }

    match result {
        Ok(summary) => {
            if summary.dry_run {
                println!("Dry run complete: {} files analyzed.", summary.analyzed);
            } else {
                println!(
                    "Processing complete: {} compressed, {} failed, {} skipped.",
                    summary.processed.len(),
                    summary.failed.len(),
                    summary.skipped.len()
                );
                if summary.space_saved() > 0 {
                    println!("Space saved: {}", format_bytes(summary.space_saved() as u64));
                }
            }
            for (path, reason) in &summary.failed {
                eprintln!("FAILED {}: {}", path.display(), reason);
            }
            summary.exit_code()
        }
        Err(SquishError::Cancelled) => {
            eprintln!("Cancelled. Source files are intact; temp artifacts removed.");
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// The batch deletes originals after verification; make the operator say so.
fn confirm_destructive_batch(file_count: usize) -> bool {
    println!("You are about to compress {} video file(s).", file_count);
    println!("Compressed replacements are verified, then the originals are DELETED.");
    println!("Make sure you have backups of important files.");
    print!("Type 'YES' to proceed: ");
    let _ = std::io::stdout().flush();

    let mut response = String::new();
    if std::io::stdin().read_line(&mut response).is_err() {
        return false;
    }
    response.trim() == "YES"
}

#[cfg(unix)]
mod interrupt {
    use std::sync::atomic::{AtomicBool, Ordering};

    pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    pub extern "C" fn handle_sigint(_signal: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }
}

/// First Ctrl-C cancels the batch cooperatively; sources stay intact.
fn install_interrupt_handler(cancel: CancelToken) {
    #[cfg(unix)]
    {
        unsafe {
            let handler = interrupt::handle_sigint as extern "C" fn(libc::c_int);
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        }
        std::thread::spawn(move || {
            loop {
                if interrupt::INTERRUPTED.load(std::sync::atomic::Ordering::SeqCst) {
                    eprintln!("\nInterrupt received, cancelling batch...");
                    cancel.cancel();
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
        });
    }
    #[cfg(not(unix))]
    {
        let _ = cancel;
    }
}
