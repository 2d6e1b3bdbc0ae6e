//! Media analysis: ffprobe invocation and typed probe results.

pub mod info;
pub mod probe;

pub use info::{FormatInfo, MediaInfo, StreamInfo, StreamType};
pub use probe::{probe_media, probe_timeout};
