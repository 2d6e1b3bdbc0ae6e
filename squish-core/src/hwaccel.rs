//! Hardware encoder detection.
//!
//! A profile is returned only when the host is Apple Silicon and a 1-second
//! test encode through `h264_videotoolbox` succeeds; the HEVC encoder is
//! probed the same way. Everything else falls back to software encoding.

use std::process::Command;
use std::time::Duration;

use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::util::command::run_command_with_timeout;

/// Timeout for each encoder test run.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A usable hardware encoding profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwAccelProfile {
    /// Profile family, currently always "videotoolbox"
    pub kind: &'static str,
    pub h264_encoder: String,
    pub hevc_encoder: Option<String>,
    /// Flag carrying the quality scalar instead of CRF
    pub quality_flag: &'static str,
    /// Pixel format used for 10-bit sources
    pub pix_fmt_10bit: &'static str,
}

/// Detect a usable hardware encoder, or `None` for software encoding.
pub fn detect_hardware_acceleration(config: &Config, cancel: &CancelToken) -> Option<HwAccelProfile> {
    if !config.compression_settings.enable_hardware_acceleration {
        info!("Hardware acceleration disabled in config");
        return None;
    }

    if !is_apple_silicon() {
        debug!("Not Apple Silicon, using software encoding");
        return None;
    }

    info!("Apple Silicon detected, testing VideoToolbox encoders");

    if !test_encoder(config, "h264_videotoolbox", cancel) {
        warn!("VideoToolbox H.264 test encode failed, using software encoding");
        return None;
    }
    info!("VideoToolbox h264_videotoolbox encoder available");

    let has_hevc = test_encoder(config, "hevc_videotoolbox", cancel);
    if has_hevc {
        info!("VideoToolbox hevc_videotoolbox encoder available");
    } else {
        debug!("VideoToolbox HEVC encoder not available");
    }

    Some(HwAccelProfile {
        kind: "videotoolbox",
        h264_encoder: "h264_videotoolbox".to_string(),
        hevc_encoder: has_hevc.then(|| "hevc_videotoolbox".to_string()),
        quality_flag: "-q:v",
        pix_fmt_10bit: "p010le",
    })
}

fn is_apple_silicon() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

/// Run a 1-second synthetic encode through the named encoder.
fn test_encoder(config: &Config, encoder: &str, cancel: &CancelToken) -> bool {
    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.args([
        "-f", "lavfi",
        "-i", "testsrc=duration=1:size=320x240:rate=1",
        "-c:v", encoder,
        "-t", "1",
        "-f", "null", "-",
    ]);

    match run_command_with_timeout(&mut cmd, TEST_TIMEOUT, cancel) {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!("{} test encode failed: {}", encoder, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_skips_detection() {
        let mut config = Config::default();
        config.compression_settings.enable_hardware_acceleration = false;
        assert!(detect_hardware_acceleration(&config, &CancelToken::new()).is_none());
    }

    #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
    #[test]
    fn non_apple_silicon_has_no_profile() {
        let config = Config::default();
        assert!(detect_hardware_acceleration(&config, &CancelToken::new()).is_none());
    }
}
