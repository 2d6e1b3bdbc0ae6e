//! Transcoder argument construction.
//!
//! Composes the ffmpeg invocation for one compression from the configuration,
//! the source probe, and the optional hardware profile. Audio is always
//! stream-copied; only the video stream is re-encoded.

use std::path::Path;
use std::process::Command;

use log::{debug, info};

use crate::config::Config;
use crate::hwaccel::HwAccelProfile;
use crate::media::MediaInfo;

/// Which encoder the built command will use, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderChoice {
    Software(String),
    Hardware(String),
}

impl EncoderChoice {
    pub fn name(&self) -> &str {
        match self {
            EncoderChoice::Software(name) | EncoderChoice::Hardware(name) => name,
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, EncoderChoice::Hardware(_))
    }
}

/// Map a CRF value onto the VideoToolbox quality scale.
///
/// CRF 18-28 lands roughly on q 30-56; the scalar is clamped to 30..=70.
pub fn videotoolbox_quality(crf: u32) -> i64 {
    let q = 18.0 + (crf as f64 - 18.0) * 2.6;
    (q as i64).clamp(30, 70)
}

/// Pick the encoder for this run: hardware when the profile covers the
/// requested codec, software otherwise.
pub fn select_encoder(config: &Config, hw: Option<&HwAccelProfile>) -> EncoderChoice {
    let requested = config.compression_settings.video_codec.as_str();

    if let Some(profile) = hw {
        if requested == "libx265" {
            if let Some(hevc) = &profile.hevc_encoder {
                return EncoderChoice::Hardware(hevc.clone());
            }
        }
        if requested == "libx265" || requested == "libx264" {
            return EncoderChoice::Hardware(profile.h264_encoder.clone());
        }
        debug!(
            "Hardware acceleration not applicable to {}, using software",
            requested
        );
    }

    EncoderChoice::Software(requested.to_string())
}

/// Build the full ffmpeg command for one encode.
pub fn build_encode_command(
    input: &Path,
    output: &Path,
    probe: &MediaInfo,
    config: &Config,
    hw: Option<&HwAccelProfile>,
) -> (Command, EncoderChoice) {
    let settings = &config.compression_settings;
    let choice = select_encoder(config, hw);

    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.arg("-y").arg("-i").arg(input);
    cmd.arg("-c:v").arg(choice.name());

    match &choice {
        EncoderChoice::Hardware(_) => {
            let profile = hw.expect("hardware choice implies a profile");
            let quality = videotoolbox_quality(settings.crf);
            cmd.arg(profile.quality_flag).arg(quality.to_string());
            debug!("VideoToolbox quality: {} (from CRF {})", quality, settings.crf);

            if settings.preserve_10bit && probe.is_10bit() {
                cmd.arg("-pix_fmt").arg(profile.pix_fmt_10bit);
                debug!("Using 10-bit pixel format {}", profile.pix_fmt_10bit);
            }
        }
        EncoderChoice::Software(_) => {
            cmd.arg("-preset").arg(&settings.preset);
            cmd.arg("-crf").arg(settings.crf.to_string());

            if settings.preserve_10bit && probe.is_10bit() {
                cmd.arg("-pix_fmt").arg("yuv420p10le");
            }
        }
    }

    // Audio is copied without re-encoding to preserve quality
    cmd.arg("-c:a").arg("copy");

    if settings.preserve_metadata {
        cmd.arg("-map_metadata").arg("0");
        cmd.arg("-movflags").arg("+faststart");
    }

    // Bitrate cap applies to software encoders only
    if !choice.is_hardware() {
        if let Some(reduction) = settings.target_bitrate_reduction {
            if let Some(source_kbps) = probe.video_bitrate_kbps() {
                let target = (source_kbps as f64 * reduction) as u64;
                cmd.arg("-b:v").arg(format!("{}k", target));
                debug!(
                    "Target bitrate: {}k (reduced from {}k)",
                    target, source_kbps
                );
            }
        }
    }

    // Progress lines on stderr for the monitor
    cmd.args(["-stats", "-loglevel", "info"]);
    cmd.arg(output);

    info!(
        "Encoder: {} {}",
        if choice.is_hardware() { "VideoToolbox" } else { "Software" },
        choice.name()
    );

    (cmd, choice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn probe_with(pix_fmt: &str, bit_rate: Option<&str>) -> MediaInfo {
        let mut stream = json!({
            "index": 0,
            "codec_type": "video",
            "codec_name": "h264",
            "width": 1920,
            "height": 1080,
            "pix_fmt": pix_fmt
        });
        if let Some(rate) = bit_rate {
            stream["bit_rate"] = json!(rate);
        }
        MediaInfo::from_json(&json!({
            "streams": [stream],
            "format": { "format_name": "matroska", "duration": "120.0" }
        }))
        .unwrap()
    }

    fn videotoolbox_profile() -> HwAccelProfile {
        HwAccelProfile {
            kind: "videotoolbox",
            h264_encoder: "h264_videotoolbox".to_string(),
            hevc_encoder: Some("hevc_videotoolbox".to_string()),
            quality_flag: "-q:v",
            pix_fmt_10bit: "p010le",
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a: &OsStr| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn software_path_uses_preset_and_crf() {
        let config = Config::default();
        let probe = probe_with("yuv420p", None);
        let (cmd, choice) = build_encode_command(
            &PathBuf::from("/in.mkv"),
            &PathBuf::from("/out.mkv"),
            &probe,
            &config,
            None,
        );
        let args = args_of(&cmd);

        assert_eq!(choice, EncoderChoice::Software("libx265".to_string()));
        assert!(args.windows(2).any(|w| w == ["-preset", "medium"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "23"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-map_metadata", "0"]));
        assert!(args.contains(&"+faststart".to_string()));
        // 8-bit source gets no pixel format override
        assert!(!args.contains(&"yuv420p10le".to_string()));
    }

    #[test]
    fn software_path_preserves_10bit() {
        let config = Config::default();
        let probe = probe_with("yuv420p10le", None);
        let (cmd, _) = build_encode_command(
            &PathBuf::from("/in.mkv"),
            &PathBuf::from("/out.mkv"),
            &probe,
            &config,
            None,
        );
        let args = args_of(&cmd);
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p10le"]));
    }

    #[test]
    fn bitrate_cap_is_software_only() {
        let config = Config::default();
        let probe = probe_with("yuv420p", Some("8000000"));

        let (cmd, _) = build_encode_command(
            &PathBuf::from("/in.mkv"),
            &PathBuf::from("/out.mkv"),
            &probe,
            &config,
            None,
        );
        let args = args_of(&cmd);
        // 8000 kbps * 0.5 reduction
        assert!(args.windows(2).any(|w| w == ["-b:v", "4000k"]));

        let profile = videotoolbox_profile();
        let (cmd, choice) = build_encode_command(
            &PathBuf::from("/in.mkv"),
            &PathBuf::from("/out.mkv"),
            &probe,
            &config,
            Some(&profile),
        );
        assert!(choice.is_hardware());
        let args = args_of(&cmd);
        assert!(!args.iter().any(|a| a == "-b:v"));
    }

    #[test]
    fn hardware_path_maps_crf_to_quality() {
        let config = Config::default();
        let probe = probe_with("yuv420p10le", None);
        let profile = videotoolbox_profile();

        let (cmd, choice) = build_encode_command(
            &PathBuf::from("/in.mkv"),
            &PathBuf::from("/out.mkv"),
            &probe,
            &config,
            Some(&profile),
        );
        let args = args_of(&cmd);

        assert_eq!(
            choice,
            EncoderChoice::Hardware("hevc_videotoolbox".to_string())
        );
        // CRF 23 -> 18 + 5 * 2.6 = 31
        assert!(args.windows(2).any(|w| w == ["-q:v", "31"]));
        // No software preset on the hardware path
        assert!(!args.iter().any(|a| a == "-preset"));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "p010le"]));
    }

    #[test]
    fn h264_request_uses_h264_hardware_encoder() {
        let mut config = Config::default();
        config.compression_settings.video_codec = "libx264".to_string();
        let choice = select_encoder(&config, Some(&videotoolbox_profile()));
        assert_eq!(
            choice,
            EncoderChoice::Hardware("h264_videotoolbox".to_string())
        );
    }

    #[test]
    fn hevc_request_falls_back_to_h264_hardware() {
        let config = Config::default();
        let mut profile = videotoolbox_profile();
        profile.hevc_encoder = None;
        let choice = select_encoder(&config, Some(&profile));
        assert_eq!(
            choice,
            EncoderChoice::Hardware("h264_videotoolbox".to_string())
        );
    }

    #[test]
    fn vp9_request_never_uses_hardware() {
        let mut config = Config::default();
        config.compression_settings.video_codec = "libvpx-vp9".to_string();
        let choice = select_encoder(&config, Some(&videotoolbox_profile()));
        assert_eq!(choice, EncoderChoice::Software("libvpx-vp9".to_string()));
    }

    #[test]
    fn quality_mapping_is_clamped() {
        assert_eq!(videotoolbox_quality(23), 31);
        assert_eq!(videotoolbox_quality(15), 30);
        assert_eq!(videotoolbox_quality(18), 30);
        assert_eq!(videotoolbox_quality(35), 62);
    }
}
