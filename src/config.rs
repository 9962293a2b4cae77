//! Pipeline configuration: the common interface between the GUI and the
//! core pipeline. Grounded in
//! `examples/moreWax-cap/src/config/config.rs`'s plain validated struct.

use crate::error::PipelineError;

/// Parameters arriving from the GUI (or any other equivalent caller) that
/// fully determine one pipeline run. There is no CLI parsing of these
/// values; a GUI builds this struct directly.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    /// "desktop" on Windows, or an X display identifier such as ":0.0".
    pub video_source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_bps: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub rtsp_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_source: default_video_source(),
            width: 1920,
            height: 1080,
            fps: 30,
            video_bitrate_bps: 4_000_000,
            audio_sample_rate: 44_100,
            audio_channels: 2,
            rtsp_url: String::new(),
        }
    }
}

#[cfg(target_os = "windows")]
fn default_video_source() -> String {
    "desktop".to_string()
}

#[cfg(not(target_os = "windows"))]
fn default_video_source() -> String {
    ":0.0".to_string()
}

impl PipelineConfig {
    /// Refuse-to-start checks: missing URL, unknown source, nonsensical
    /// dimensions/rates.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.rtsp_url.trim().is_empty() {
            return Err(PipelineError::Config("rtsp_url must not be empty".into()));
        }
        if !self.rtsp_url.starts_with("rtsp://") {
            return Err(PipelineError::Config(format!(
                "rtsp_url must use the rtsp:// scheme, got {:?}",
                self.rtsp_url
            )));
        }
        if self.video_source.trim().is_empty() {
            return Err(PipelineError::Config("video_source must not be empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::Config(
                "width and height must be nonzero".into(),
            ));
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(PipelineError::Config(format!(
                "fps {} out of supported range 1..=120",
                self.fps
            )));
        }
        if self.video_bitrate_bps == 0 {
            return Err(PipelineError::Config("video_bitrate_bps must be nonzero".into()));
        }
        if self.audio_sample_rate == 0 {
            return Err(PipelineError::Config("audio_sample_rate must be nonzero".into()));
        }
        if self.audio_channels == 0 {
            return Err(PipelineError::Config("audio_channels must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_a_url() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn a_complete_config_validates() {
        let mut config = PipelineConfig::default();
        config.rtsp_url = "rtsp://127.0.0.1:8554/s1".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_rtsp_scheme() {
        let mut config = PipelineConfig::default();
        config.rtsp_url = "http://127.0.0.1:8554/s1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_absurd_fps() {
        let mut config = PipelineConfig::default();
        config.rtsp_url = "rtsp://127.0.0.1:8554/s1".to_string();
        config.fps = 1000;
        assert!(config.validate().is_err());
    }
}
