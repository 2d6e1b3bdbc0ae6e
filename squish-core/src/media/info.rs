//! Media information structures.
//!
//! Parses ffprobe JSON output into typed stream and format data and exposes
//! the derived properties the rest of the pipeline keys off: duration,
//! dimensions, bitrate, 10-bit and HDR detection.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SquishError};

/// Media stream types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
    Attachment,
    Data,
    Unknown,
}

impl From<&str> for StreamType {
    fn from(s: &str) -> Self {
        match s {
            "video" => StreamType::Video,
            "audio" => StreamType::Audio,
            "subtitle" => StreamType::Subtitle,
            "attachment" => StreamType::Attachment,
            "data" => StreamType::Data,
            _ => StreamType::Unknown,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Video => write!(f, "Video"),
            StreamType::Audio => write!(f, "Audio"),
            StreamType::Subtitle => write!(f, "Subtitle"),
            StreamType::Attachment => write!(f, "Attachment"),
            StreamType::Data => write!(f, "Data"),
            StreamType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One stream of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub codec_type: StreamType,
    pub codec_name: String,
    pub codec_long_name: Option<String>,
    pub tags: HashMap<String, String>,
    /// Remaining stream properties, untyped
    pub properties: HashMap<String, Value>,
}

impl StreamInfo {
    /// A string-valued property, regardless of whether ffprobe encoded it as
    /// a JSON string or number.
    pub fn property_str(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// A numeric property, accepting both JSON numbers and numeric strings.
    pub fn property_u64(&self, key: &str) -> Option<u64> {
        match self.properties.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Frame rate parsed from the `r_frame_rate` fraction.
    pub fn frame_rate(&self) -> Option<f64> {
        let raw = self.property_str("r_frame_rate")?;
        if let Some((num, den)) = raw.split_once('/') {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den != 0.0 {
                return Some(num / den);
            }
            return None;
        }
        raw.parse().ok()
    }
}

/// Container-level format information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_name: String,
    pub format_long_name: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Bitrate in bits per second
    pub bit_rate: Option<u64>,
    /// Size in bytes
    pub size: Option<u64>,
    pub tags: HashMap<String, String>,
}

/// Complete probed information about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub streams: Vec<StreamInfo>,
    pub format: Option<FormatInfo>,
}

static HDR_TRANSFER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(smpte2084|arib-std-b67|smpte428|bt2020-10|bt2020-12)$").unwrap()
});

impl MediaInfo {
    /// Parse ffprobe `-print_format json` output.
    pub fn from_json(json: &Value) -> Result<Self> {
        let mut media_info = Self {
            streams: Vec::new(),
            format: None,
        };

        if let Some(streams) = json.get("streams").and_then(|s| s.as_array()) {
            for stream in streams {
                let index = stream
                    .get("index")
                    .and_then(|i| i.as_u64())
                    .unwrap_or(0) as usize;
                let codec_type = stream
                    .get("codec_type")
                    .and_then(|t| t.as_str())
                    .map(StreamType::from)
                    .unwrap_or(StreamType::Unknown);
                let codec_name = stream
                    .get("codec_name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string();
                let codec_long_name = stream
                    .get("codec_long_name")
                    .and_then(|n| n.as_str())
                    .map(|s| s.to_string());

                let mut tags = HashMap::new();
                if let Some(stream_tags) = stream.get("tags").and_then(|t| t.as_object()) {
                    for (key, value) in stream_tags {
                        if let Some(value_str) = value.as_str() {
                            tags.insert(key.clone(), value_str.to_string());
                        }
                    }
                }

                let mut properties = HashMap::new();
                if let Some(obj) = stream.as_object() {
                    for (key, value) in obj {
                        if key != "tags"
                            && key != "index"
                            && key != "codec_type"
                            && key != "codec_name"
                            && key != "codec_long_name"
                        {
                            properties.insert(key.clone(), value.clone());
                        }
                    }
                }

                media_info.streams.push(StreamInfo {
                    index,
                    codec_type,
                    codec_name,
                    codec_long_name,
                    tags,
                    properties,
                });
            }
        }

        if let Some(format) = json.get("format").and_then(|f| f.as_object()) {
            let format_name = format
                .get("format_name")
                .and_then(|n| n.as_str())
                .unwrap_or("")
                .to_string();
            let format_long_name = format
                .get("format_long_name")
                .and_then(|n| n.as_str())
                .map(|s| s.to_string());
            let duration = format
                .get("duration")
                .and_then(|d| d.as_str())
                .and_then(|d| d.parse::<f64>().ok());
            let bit_rate = format
                .get("bit_rate")
                .and_then(|b| b.as_str())
                .and_then(|b| b.parse::<u64>().ok());
            let size = format
                .get("size")
                .and_then(|s| s.as_str())
                .and_then(|s| s.parse::<u64>().ok());

            let mut tags = HashMap::new();
            if let Some(format_tags) = format.get("tags").and_then(|t| t.as_object()) {
                for (key, value) in format_tags {
                    if let Some(value_str) = value.as_str() {
                        tags.insert(key.clone(), value_str.to_string());
                    }
                }
            }

            media_info.format = Some(FormatInfo {
                format_name,
                format_long_name,
                duration,
                bit_rate,
                size,
                tags,
            });
        }

        if media_info.streams.is_empty() && media_info.format.is_none() {
            return Err(SquishError::Probe(
                "ffprobe output contains neither streams nor format".to_string(),
            ));
        }

        Ok(media_info)
    }

    pub fn video_streams(&self) -> Vec<&StreamInfo> {
        self.streams
            .iter()
            .filter(|s| s.codec_type == StreamType::Video)
            .collect()
    }

    pub fn audio_streams(&self) -> Vec<&StreamInfo> {
        self.streams
            .iter()
            .filter(|s| s.codec_type == StreamType::Audio)
            .collect()
    }

    /// Total duration in seconds, from the format layer with a fallback to
    /// the first video stream.
    pub fn duration(&self) -> Option<f64> {
        if let Some(duration) = self.format.as_ref().and_then(|f| f.duration) {
            return Some(duration);
        }
        self.primary_video_stream().and_then(|s| {
            s.property_str("duration").and_then(|d| d.parse().ok())
        })
    }

    pub fn primary_video_stream(&self) -> Option<&StreamInfo> {
        self.video_streams().first().copied()
    }

    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.primary_video_stream().and_then(|stream| {
            let width = stream.property_u64("width").map(|w| w as u32)?;
            let height = stream.property_u64("height").map(|h| h as u32)?;
            Some((width, height))
        })
    }

    /// Pixel format of the primary video stream.
    pub fn pixel_format(&self) -> Option<String> {
        self.primary_video_stream()
            .and_then(|s| s.property_str("pix_fmt"))
    }

    /// True when the primary video stream uses a 10-bit (or deeper) pixel
    /// format.
    pub fn is_10bit(&self) -> bool {
        self.pixel_format()
            .map(|p| p.contains("10") || p.contains("p12") || p.contains("p16"))
            .unwrap_or(false)
    }

    /// HDR heuristics over color primaries, transfer function, color space
    /// and bit depth of the primary video stream.
    pub fn is_hdr(&self) -> bool {
        let Some(stream) = self.primary_video_stream() else {
            return false;
        };

        let color_primaries = stream.property_str("color_primaries").unwrap_or_default();
        let color_transfer = stream.property_str("color_transfer").unwrap_or_default();
        let color_space = stream.property_str("color_space").unwrap_or_default();
        let bits_per_raw_sample = stream.property_u64("bits_per_raw_sample").unwrap_or(8);

        let hdr_primaries = color_primaries == "bt2020";
        let hdr_transfer = HDR_TRANSFER.is_match(&color_transfer);
        let hdr_space = color_space == "bt2020nc" || color_space == "bt2020c";
        let high_bit_depth = bits_per_raw_sample >= 10 || self.is_10bit();

        (hdr_primaries && hdr_transfer)
            || (high_bit_depth && (hdr_primaries || hdr_transfer))
            || hdr_space
    }

    /// Container-level bitrate in bits per second, summing stream bitrates
    /// or estimating from size and duration when the format layer lacks one.
    pub fn bitrate(&self) -> Option<u64> {
        if let Some(bitrate) = self.format.as_ref().and_then(|f| f.bit_rate) {
            return Some(bitrate);
        }

        let mut total = 0;
        let mut found = false;
        for stream in &self.streams {
            if let Some(bit_rate) = stream.property_u64("bit_rate") {
                total += bit_rate;
                found = true;
            }
        }
        if found {
            return Some(total);
        }

        let size = self.format.as_ref().and_then(|f| f.size)?;
        let duration = self.duration()?;
        if duration > 0.0 {
            Some(((size * 8) as f64 / duration) as u64)
        } else {
            None
        }
    }

    /// Video bitrate in kbps: the primary video stream's own bitrate, or
    /// 90% of the container bitrate as a rough estimate when streams carry
    /// no per-stream rates.
    pub fn video_bitrate_kbps(&self) -> Option<u64> {
        if let Some(stream) = self.primary_video_stream() {
            if let Some(rate) = stream.property_u64("bit_rate") {
                return Some(rate / 1000);
            }
        }
        self.format
            .as_ref()
            .and_then(|f| f.bit_rate)
            .map(|rate| (rate / 1000) * 9 / 10)
    }
}
