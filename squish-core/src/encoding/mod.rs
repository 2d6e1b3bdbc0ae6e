//! Encoding: transcoder invocation, segmentation, merging, and the
//! concurrent machinery that drives them.

pub mod args;
pub mod encoder;
pub mod merger;
pub mod parallel;
pub mod pipeline;
pub mod segmentation;

pub use args::{EncoderChoice, build_encode_command};
pub use encoder::run_encode;
pub use merger::merge_segments;
pub use parallel::{pool_size, run_pool};
pub use pipeline::{JobState, run_large_pipeline, should_use_pipeline};
pub use segmentation::{segment_video, segmentation_timeout};
