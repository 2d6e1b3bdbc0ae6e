//! Error types for the squish-core library.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are
//! grouped by the stage that produced them so callers can decide whether a
//! failure is job-local (most are) or unwinds the whole batch (`Cancelled`).

use std::io;
use thiserror::Error;

/// Errors produced while orchestrating a compression batch.
#[derive(Error, Debug)]
pub enum SquishError {
    /// Standard I/O errors from the std::io module
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path could not be interpreted or does not exist
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration file could not be read, parsed, or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// A precondition failed before any work started (missing file,
    /// insufficient disk space)
    #[error("Preflight check failed: {0}")]
    Preflight(String),

    /// ffprobe timed out, exited non-zero, or produced unparseable output
    #[error("Media probe failed: {0}")]
    Probe(String),

    /// The transcoder exited non-zero or produced an empty output
    #[error("Encode failed: {reason}")]
    Encode {
        reason: String,
        /// Tail of the transcoder's stderr, for the failure report
        stderr_tail: String,
    },

    /// The produced artifact did not pass the safety gate
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// A pipeline stage failed: segmentation, merge, or queue shutdown
    #[error("Pipeline stage failed: {0}")]
    Pipeline(String),

    /// An external command could not be spawned or waited on
    #[error("Command execution failed: {0}")]
    Command(String),

    /// The caller cancelled the batch
    #[error("Operation cancelled")]
    Cancelled,

    /// General operation failure
    #[error("Operation failed: {0}")]
    Other(String),
}

impl SquishError {
    /// True when this error is a cancellation and should unwind the batch
    /// instead of failing a single job.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SquishError::Cancelled)
    }

    /// Construct an encode error without captured stderr.
    pub fn encode(reason: impl Into<String>) -> Self {
        SquishError::Encode {
            reason: reason.into(),
            stderr_tail: String::new(),
        }
    }
}

/// Type alias for Result using our custom error type.
pub type Result<T> = std::result::Result<T, SquishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_detected() {
        assert!(SquishError::Cancelled.is_cancelled());
        assert!(!SquishError::Preflight("no space".into()).is_cancelled());
    }

    #[test]
    fn encode_error_formats_reason() {
        let err = SquishError::encode("ffmpeg exited with code 1");
        assert_eq!(err.to_string(), "Encode failed: ffmpeg exited with code 1");
    }
}
