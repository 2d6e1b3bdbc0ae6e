//! Per-file analysis for dry runs and batch preambles.
//!
//! Breaks a probed file down by stream, tags what drives its size (4K+,
//! high fps, 10-bit, HDR, extreme bitrates, heavy audio), and estimates the
//! compression outcome when real bitrate data exists. Nothing here touches
//! the filesystem beyond reading metadata.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::config::Config;
use crate::media::{MediaInfo, StreamType};
use crate::utils::{format_bytes, format_duration};

/// Size-relevant facts about one stream.
#[derive(Debug, Clone)]
pub struct StreamBreakdown {
    pub kind: StreamType,
    pub index: usize,
    pub codec: String,
    pub resolution: Option<(u32, u32)>,
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<u64>,
    pub pixel_format: Option<String>,
    pub is_10bit: bool,
    pub is_hdr: bool,
    pub channels: Option<u64>,
    pub sample_rate: Option<u64>,
    /// Human-readable tags naming what makes this stream big
    pub size_factors: Vec<String>,
}

/// Predicted result of compressing a file, when bitrate data allows one.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionEstimate {
    pub new_size_mb: f64,
    pub savings_mb: f64,
    pub savings_percent: f64,
}

/// Full dry-run analysis of one file.
#[derive(Debug, Clone)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_secs: Option<f64>,
    pub total_bitrate_kbps: Option<u64>,
    /// Bitrate contribution percentages; `None` without real bitrate data
    pub video_contribution: Option<f64>,
    pub audio_contribution: Option<f64>,
    pub other_contribution: Option<f64>,
    pub streams: Vec<StreamBreakdown>,
    pub estimate: Option<CompressionEstimate>,
    pub estimated_encode_time: Duration,
}

/// Rough encode wall-time by preset, in minutes per GB of input.
fn minutes_per_gb(preset: &str) -> f64 {
    match preset {
        "ultrafast" => 5.0,
        "fast" => 8.0,
        "medium" => 15.0,
        "slow" => 25.0,
        _ => 15.0,
    }
}

/// Conservative estimate of how long an encode will take.
pub fn estimate_compression_time(size_bytes: u64, preset: &str) -> Duration {
    let size_gb = size_bytes as f64 / 1024f64.powi(3);
    Duration::from_secs((size_gb * minutes_per_gb(preset) * 60.0) as u64)
}

/// Analyze a probed file without touching it.
pub fn analyze_file(path: &Path, size_bytes: u64, probe: &MediaInfo, config: &Config) -> FileAnalysis {
    let duration_secs = probe.duration();
    let total_bitrate_kbps = probe
        .format
        .as_ref()
        .and_then(|f| f.bit_rate)
        .map(|b| b / 1000);

    let mut streams = Vec::new();
    let mut video_kbps_total: u64 = 0;
    let mut audio_kbps_total: u64 = 0;

    for stream in &probe.streams {
        match stream.codec_type {
            StreamType::Video => {
                let width = stream.property_u64("width").unwrap_or(0) as u32;
                let height = stream.property_u64("height").unwrap_or(0) as u32;
                let fps = stream.frame_rate();
                let bitrate_kbps = stream.property_u64("bit_rate").map(|b| b / 1000);
                let pixel_format = stream.property_str("pix_fmt");
                let is_10bit = pixel_format
                    .as_deref()
                    .is_some_and(|p| p.contains("10") || p.contains("p12") || p.contains("p16"));
                let is_hdr = stream.index == probe.primary_video_stream().map_or(usize::MAX, |s| s.index)
                    && probe.is_hdr();

                let mut size_factors = Vec::new();
                let pixels = width as u64 * height as u64;
                if pixels > 8_000_000 {
                    size_factors.push(format!("4K+ Resolution ({}x{})", width, height));
                } else if pixels > 2_000_000 {
                    size_factors.push(format!("High Resolution ({}x{})", width, height));
                }
                if fps.is_some_and(|f| f > 30.0) {
                    size_factors.push(format!("High Frame Rate ({:.0}fps)", fps.unwrap()));
                }
                if is_10bit {
                    size_factors.push("10-bit Color Depth".to_string());
                }
                if is_hdr {
                    size_factors.push("HDR Content".to_string());
                }
                if let Some(kbps) = bitrate_kbps {
                    video_kbps_total += kbps;
                    if kbps > 50_000 {
                        size_factors.push(format!("Very High Bitrate ({}Mbps)", kbps / 1000));
                    } else if kbps > 20_000 {
                        size_factors.push(format!("High Bitrate ({}Mbps)", kbps / 1000));
                    }
                }

                streams.push(StreamBreakdown {
                    kind: StreamType::Video,
                    index: stream.index,
                    codec: stream.codec_name.clone(),
                    resolution: (width > 0 && height > 0).then_some((width, height)),
                    fps,
                    bitrate_kbps,
                    pixel_format,
                    is_10bit,
                    is_hdr,
                    channels: None,
                    sample_rate: None,
                    size_factors,
                });
            }
            StreamType::Audio => {
                let bitrate_kbps = stream.property_u64("bit_rate").map(|b| b / 1000);
                let channels = stream.property_u64("channels");
                let sample_rate = stream.property_u64("sample_rate");

                let mut size_factors = Vec::new();
                if let Some(kbps) = bitrate_kbps {
                    audio_kbps_total += kbps;
                    if kbps > 1000 {
                        size_factors.push(format!("High Quality Audio ({}kbps)", kbps));
                    }
                }
                if channels.is_some_and(|c| c > 2) {
                    size_factors.push(format!("Multichannel Audio ({} channels)", channels.unwrap()));
                }
                if sample_rate.is_some_and(|r| r > 48_000) {
                    size_factors.push(format!("High Sample Rate ({}Hz)", sample_rate.unwrap()));
                }
                if matches!(stream.codec_name.as_str(), "pcm_s24le" | "pcm_s32le" | "flac") {
                    size_factors.push("Lossless Audio".to_string());
                }

                streams.push(StreamBreakdown {
                    kind: StreamType::Audio,
                    index: stream.index,
                    codec: stream.codec_name.clone(),
                    resolution: None,
                    fps: None,
                    bitrate_kbps,
                    pixel_format: None,
                    is_10bit: false,
                    is_hdr: false,
                    channels,
                    sample_rate,
                    size_factors,
                });
            }
            _ => {}
        }
    }

    // Contribution percentages only when real per-stream rates exist
    let stream_total = video_kbps_total + audio_kbps_total;
    let (video_contribution, audio_contribution, other_contribution) = if stream_total > 0 {
        let video = video_kbps_total as f64 / stream_total as f64 * 100.0;
        let audio = audio_kbps_total as f64 / stream_total as f64 * 100.0;
        (Some(video), Some(audio), Some(100.0 - video - audio))
    } else {
        (None, None, None)
    };

    let estimate = estimate_savings(size_bytes, duration_secs, total_bitrate_kbps, config);

    FileAnalysis {
        path: path.to_path_buf(),
        size_bytes,
        duration_secs,
        total_bitrate_kbps,
        video_contribution,
        audio_contribution,
        other_contribution,
        streams,
        estimate,
        estimated_encode_time: estimate_compression_time(
            size_bytes,
            &config.compression_settings.preset,
        ),
    }
}

/// Bitrate-based compression estimate. Returns `None` without bitrate data
/// or when the arithmetic lands outside the believable 10..=95% range.
fn estimate_savings(
    size_bytes: u64,
    duration_secs: Option<f64>,
    total_bitrate_kbps: Option<u64>,
    config: &Config,
) -> Option<CompressionEstimate> {
    let total_kbps = total_bitrate_kbps? as f64;
    let duration = duration_secs?;
    let reduction = config.compression_settings.target_bitrate_reduction?;
    if total_kbps <= 0.0 || duration <= 0.0 {
        return None;
    }

    // Lower CRF keeps more bits; fold the quality setting into the target
    let crf = config.compression_settings.crf as f64;
    let crf_factor = (1.0 - (crf - 18.0) * 0.05).max(0.3);
    let realistic_reduction = reduction * crf_factor;

    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    let new_size_mb = total_kbps * realistic_reduction * duration / 8.0 / 1024.0;
    let savings_mb = size_mb - new_size_mb;
    let savings_percent = savings_mb / size_mb * 100.0;

    if (10.0..=95.0).contains(&savings_percent) {
        Some(CompressionEstimate {
            new_size_mb,
            savings_mb,
            savings_percent,
        })
    } else {
        None
    }
}

/// Emit the dry-run report for one analysis.
pub fn log_analysis(analysis: &FileAnalysis) {
    info!("[DRY RUN] File: {}", analysis.path.display());
    info!("[DRY RUN]   Size: {}", format_bytes(analysis.size_bytes));
    if let Some(duration) = analysis.duration_secs {
        info!(
            "[DRY RUN]   Duration: {} ({:.1}s)",
            format_duration(Duration::from_secs(duration as u64)),
            duration
        );
    }
    if let Some(kbps) = analysis.total_bitrate_kbps {
        info!("[DRY RUN]   Total bitrate: {:.1}Mbps", kbps as f64 / 1000.0);
    }

    match (analysis.video_contribution, analysis.audio_contribution) {
        (Some(video), Some(audio)) => {
            info!("[DRY RUN]   Video contribution: {:.1}%", video);
            info!("[DRY RUN]   Audio contribution: {:.1}%", audio);
            if let Some(other) = analysis.other_contribution {
                info!("[DRY RUN]   Container/other: {:.1}%", other);
            }
        }
        _ => info!("[DRY RUN]   Contribution analysis: no bitrate data"),
    }

    for stream in &analysis.streams {
        match stream.kind {
            StreamType::Video => {
                let resolution = stream
                    .resolution
                    .map(|(w, h)| format!("{}x{}", w, h))
                    .unwrap_or_else(|| "unknown".to_string());
                info!(
                    "[DRY RUN]   Video stream {}: {} {} {:.2}fps",
                    stream.index,
                    stream.codec,
                    resolution,
                    stream.fps.unwrap_or(0.0)
                );
            }
            StreamType::Audio => {
                info!(
                    "[DRY RUN]   Audio stream {}: {} {}ch {}Hz",
                    stream.index,
                    stream.codec,
                    stream.channels.unwrap_or(0),
                    stream.sample_rate.unwrap_or(0)
                );
            }
            _ => {}
        }
        if !stream.size_factors.is_empty() {
            info!("[DRY RUN]     Size drivers: {}", stream.size_factors.join(", "));
        }
    }

    match &analysis.estimate {
        Some(estimate) => {
            info!(
                "[DRY RUN]   Estimated new size: {:.2}GB, savings {:.2}GB ({:.1}%)",
                estimate.new_size_mb / 1024.0,
                estimate.savings_mb / 1024.0,
                estimate.savings_percent
            );
        }
        None => info!("[DRY RUN]   Compression estimate: no bitrate data"),
    }
    info!(
        "[DRY RUN]   Estimated encode time: {}",
        format_duration(analysis.estimated_encode_time)
    );
}
