//! Resolved encoder configuration and its option enums.
//!
//! [`EncoderConfig`] is the single, fully concrete description of an encode
//! operation. It is produced by the config resolver on the controller side and
//! shipped to the execution context inside the `initialize` command.

use serde::{Deserialize, Serialize};

use crate::codec::{AudioCodec, ContainerFormat, VideoCodec};
use crate::error::EncodeError;
use crate::types::{FrameRate, Resolution};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 30;
/// Key-frame spacing in seconds when `key_frame_interval` is unset.
pub const DEFAULT_KEY_FRAME_SECONDS: f64 = 2.0;

/// `quality` buffers the whole output, `realtime` streams it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMode {
    #[default]
    Quality,
    Realtime,
}

/// Hardware-acceleration hint passed to the platform encoder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    PreferHardware,
    PreferSoftware,
    #[default]
    NoPreference,
}

impl HardwareAcceleration {
    pub fn opposite(self) -> Self {
        match self {
            Self::PreferHardware => Self::PreferSoftware,
            Self::PreferSoftware => Self::PreferHardware,
            Self::NoPreference => Self::NoPreference,
        }
    }

    /// Order in which preferences are probed for one codec candidate:
    /// requested, opposite, then no preference. Duplicates are skipped.
    pub fn retry_order(self) -> Vec<Self> {
        let mut order = vec![self];
        for next in [self.opposite(), Self::NoPreference] {
            if !order.contains(&next) {
                order.push(next);
            }
        }
        order
    }
}

/// What to do with a sample when the encoder queue is full.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureStrategy {
    #[default]
    Drop,
    Wait,
}

/// How a non-zero first timestamp on a track is handled by the muxer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirstTimestampBehavior {
    #[default]
    Offset,
    Strict,
}

/// Buffered output is one byte array at finalize; streaming output is a
/// sequence of data chunks emitted while encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Buffered,
    Streaming,
}

/// Named quality preset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
    Lossless,
}

impl QualityPreset {
    pub fn bits_per_pixel(self) -> f64 {
        match self {
            Self::Low => 0.05,
            Self::Medium => 0.1,
            Self::High => 0.2,
            Self::Lossless => 0.6,
        }
    }

    pub fn audio_bitrate(self) -> u64 {
        match self {
            Self::Low => 64_000,
            Self::Medium => 128_000,
            Self::High => 192_000,
            Self::Lossless => 320_000,
        }
    }

    /// Video bitrate for `resolution` at `frame_rate`.
    pub fn video_bitrate(self, resolution: Resolution, frame_rate: FrameRate) -> u64 {
        let fps = if frame_rate.is_valid() {
            frame_rate.as_f64()
        } else {
            FrameRate::FPS_30.as_f64()
        };
        (resolution.pixel_count() as f64 * fps * self.bits_per_pixel()).round() as u64
    }
}

/// Codecs requested for each track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoCodec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioCodec>,
}

/// Explicit codec-string overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecStrings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

/// Fully resolved encode configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub container: ContainerFormat,
    pub codec: CodecSelection,
    #[serde(default)]
    pub codec_string: CodecStrings,
    pub latency_mode: LatencyMode,
    pub hardware_acceleration: HardwareAcceleration,
    pub max_video_queue_size: usize,
    pub max_audio_queue_size: usize,
    pub backpressure_strategy: BackpressureStrategy,
    pub first_timestamp_behavior: FirstTimestampBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_frame_interval: Option<u32>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        let container = ContainerFormat::default();
        let resolution = Resolution::VGA;
        let frame_rate = FrameRate::default();
        Self {
            width: resolution.width,
            height: resolution.height,
            frame_rate,
            video_bitrate: QualityPreset::Medium.video_bitrate(resolution, frame_rate),
            audio_bitrate: QualityPreset::Medium.audio_bitrate(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            container,
            codec: CodecSelection {
                video: Some(container.default_video_codec()),
                audio: Some(container.default_audio_codec()),
            },
            codec_string: CodecStrings::default(),
            latency_mode: LatencyMode::default(),
            hardware_acceleration: HardwareAcceleration::default(),
            max_video_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_audio_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            backpressure_strategy: BackpressureStrategy::default(),
            first_timestamp_behavior: FirstTimestampBehavior::default(),
            key_frame_interval: None,
        }
    }
}

impl EncoderConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Video is enabled unless width, height or bitrate is zero.
    pub fn video_enabled(&self) -> bool {
        self.width != 0 && self.height != 0 && self.video_bitrate != 0
    }

    /// Audio is enabled unless bitrate, sample rate or channel count is zero,
    /// or no audio codec is configured.
    pub fn audio_enabled(&self) -> bool {
        self.audio_bitrate != 0
            && self.sample_rate != 0
            && self.channels != 0
            && self.codec.audio.is_some()
    }

    pub fn output_mode(&self) -> OutputMode {
        match self.latency_mode {
            LatencyMode::Quality => OutputMode::Buffered,
            LatencyMode::Realtime => OutputMode::Streaming,
        }
    }

    /// Frames between forced key frames.
    pub fn key_frame_interval_frames(&self) -> u32 {
        match self.key_frame_interval {
            Some(n) if n > 0 => n,
            _ => self.frame_rate.frames_in(DEFAULT_KEY_FRAME_SECONDS),
        }
    }

    /// Turn the video track off.
    pub fn disable_video(&mut self) {
        self.width = 0;
        self.height = 0;
        self.video_bitrate = 0;
        self.codec.video = None;
        self.codec_string.video = None;
    }

    /// Turn the audio track off.
    pub fn disable_audio(&mut self) {
        self.audio_bitrate = 0;
        self.sample_rate = 0;
        self.channels = 0;
        self.codec.audio = None;
        self.codec_string.audio = None;
    }

    /// Structural checks that do not need the codec platform.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if !self.video_enabled() && !self.audio_enabled() {
            return Err(EncodeError::Configuration(
                "both video and audio tracks are disabled".into(),
            ));
        }
        if self.video_enabled() && !self.frame_rate.is_valid() {
            return Err(EncodeError::Configuration(format!(
                "invalid frame rate {}",
                self.frame_rate.as_f64()
            )));
        }
        if self.video_enabled() && self.max_video_queue_size == 0 {
            return Err(EncodeError::Configuration(
                "maxVideoQueueSize must be at least 1".into(),
            ));
        }
        if self.audio_enabled() && self.max_audio_queue_size == 0 {
            return Err(EncodeError::Configuration(
                "maxAudioQueueSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_both_tracks() {
        let config = EncoderConfig::default();
        assert!(config.video_enabled());
        assert!(config.audio_enabled());
        assert_eq!(config.output_mode(), OutputMode::Buffered);
        assert_eq!(config.key_frame_interval_frames(), 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn audio_without_codec_is_disabled() {
        let mut config = EncoderConfig::default();
        config.codec.audio = None;
        assert!(!config.audio_enabled());
    }

    #[test]
    fn extreme_values_do_not_overflow_track_checks() {
        let mut config = EncoderConfig::default();
        config.width = u32::MAX;
        config.height = u32::MAX;
        config.video_bitrate = u64::MAX;
        config.audio_bitrate = u64::MAX;
        config.sample_rate = u32::MAX;
        config.channels = u16::MAX;
        assert!(config.video_enabled());
        assert!(config.audio_enabled());

        config.height = 0;
        assert!(!config.video_enabled());
    }

    #[test]
    fn disable_audio_zeroes_fields() {
        let mut config = EncoderConfig::default();
        config.disable_audio();
        assert_eq!(config.audio_bitrate, 0);
        assert_eq!(config.channels, 0);
        assert!(config.codec.audio.is_none());
        assert!(!config.audio_enabled());
    }

    #[test]
    fn no_tracks_fails_validation() {
        let mut config = EncoderConfig::default();
        config.disable_audio();
        config.disable_video();
        assert!(matches!(
            config.validate(),
            Err(EncodeError::Configuration(_))
        ));
    }

    #[test]
    fn hardware_retry_order() {
        assert_eq!(
            HardwareAcceleration::PreferHardware.retry_order(),
            vec![
                HardwareAcceleration::PreferHardware,
                HardwareAcceleration::PreferSoftware,
                HardwareAcceleration::NoPreference,
            ]
        );
        assert_eq!(
            HardwareAcceleration::NoPreference.retry_order(),
            vec![HardwareAcceleration::NoPreference]
        );
    }

    #[test]
    fn preset_bitrates() {
        let bitrate = QualityPreset::High.video_bitrate(Resolution::HD, FrameRate(30.0));
        assert_eq!(bitrate, 12_441_600);
        assert_eq!(QualityPreset::Low.audio_bitrate(), 64_000);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(EncoderConfig::default()).unwrap();
        assert_eq!(json["maxVideoQueueSize"], 30);
        assert_eq!(json["hardwareAcceleration"], "no-preference");
        assert_eq!(json["firstTimestampBehavior"], "offset");
        assert_eq!(json["frameRate"], 30.0);
    }
}
