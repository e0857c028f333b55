//! Config resolution: source hints + user options + quality preset →
//! one concrete [`EncoderConfig`].
//!
//! ```text
//!   1. infer      SourceHints  ─┐  (fallback 640x480, 48 kHz stereo, 30 fps)
//!   2. override   EncodeOptions ┼─▶ EncoderConfig
//!   3. preset     QualityPreset ┘  (bitrates the user left unset)
//! ```
//!
//! A track option of `false` disables the track and wins over anything
//! inferred from the source.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use ek_common::config::{DEFAULT_CHANNELS, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_SAMPLE_RATE};
use ek_common::{
    AudioCodec, BackpressureStrategy, CodecSelection, CodecStrings, ContainerFormat,
    EncodeError, EncodeResult, EncoderConfig, FirstTimestampBehavior, FrameRate,
    HardwareAcceleration, LatencyMode, QualityPreset, Resolution, VideoCodec,
};

use crate::source::SourceHints;

/// Per-track request: inferred (`true` / absent), disabled (`false`), or
/// explicit settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum TrackOption<T> {
    #[default]
    Auto,
    Disabled,
    Custom(T),
}

impl<T> TrackOption<T> {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    pub fn custom(&self) -> Option<&T> {
        match self {
            Self::Custom(options) => Some(options),
            _ => None,
        }
    }
}

impl<T: Serialize> Serialize for TrackOption<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_bool(true),
            Self::Disabled => serializer.serialize_bool(false),
            Self::Custom(options) => options.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for TrackOption<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw<T> {
            Flag(bool),
            Options(T),
        }

        match Raw::<T>::deserialize(deserializer) {
            Ok(Raw::Flag(true)) => Ok(Self::Auto),
            Ok(Raw::Flag(false)) => Ok(Self::Disabled),
            Ok(Raw::Options(options)) => Ok(Self::Custom(options)),
            Err(_) => Err(de::Error::custom(
                "expected `true`, `false` or a track options object",
            )),
        }
    }
}

/// User overrides for the video track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<FrameRate>,
    pub bitrate: Option<u64>,
    pub codec: Option<VideoCodec>,
    pub codec_string: Option<String>,
    pub key_frame_interval: Option<u32>,
}

/// User overrides for the audio track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioOptions {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bitrate: Option<u64>,
    pub codec: Option<AudioCodec>,
    pub codec_string: Option<String>,
}

/// The user-facing encode request. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncodeOptions {
    pub quality: Option<QualityPreset>,
    pub container: Option<ContainerFormat>,
    pub video: TrackOption<VideoOptions>,
    pub audio: TrackOption<AudioOptions>,
    pub latency_mode: Option<LatencyMode>,
    pub hardware_acceleration: Option<HardwareAcceleration>,
    pub max_video_queue_size: Option<usize>,
    pub max_audio_queue_size: Option<usize>,
    pub backpressure_strategy: Option<BackpressureStrategy>,
    pub first_timestamp_behavior: Option<FirstTimestampBehavior>,
    /// Sample count hint for progress reporting.
    pub total_samples: Option<u64>,
}

impl EncodeOptions {
    pub fn from_json(json: &str) -> EncodeResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EncodeError::Configuration(format!("invalid encode options: {e}")))
    }
}

/// Stage 1: values inferred from the source, or the fixed fallbacks.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Inferred {
    resolution: Resolution,
    frame_rate: FrameRate,
    sample_rate: u32,
    channels: u16,
}

fn infer(hints: &SourceHints) -> Inferred {
    let video = hints.video.filter(|v| !v.resolution().is_empty());
    let audio = hints.audio.filter(|a| a.sample_rate > 0 && a.channels > 0);
    if hints.video.is_some() && video.is_none() {
        tracing::warn!("Source reported an empty video size, using defaults");
    }
    Inferred {
        resolution: video.map_or(Resolution::VGA, |v| v.resolution()),
        frame_rate: video
            .and_then(|v| v.frame_rate)
            .filter(|f| f.is_valid())
            .unwrap_or_default(),
        sample_rate: audio.map_or(DEFAULT_SAMPLE_RATE, |a| a.sample_rate),
        channels: audio.map_or(DEFAULT_CHANNELS, |a| a.channels),
    }
}

/// Resolve the final configuration for one encode operation.
pub fn resolve_config(hints: &SourceHints, options: &EncodeOptions) -> EncoderConfig {
    let inferred = infer(hints);
    let preset = options.quality.unwrap_or_default();
    let container = options.container.unwrap_or_default();
    let video = options.video.custom().cloned().unwrap_or_default();
    let audio = options.audio.custom().cloned().unwrap_or_default();

    // Stage 2: user values over inferred ones.
    let resolution = Resolution::new(
        video.width.unwrap_or(inferred.resolution.width),
        video.height.unwrap_or(inferred.resolution.height),
    );
    let frame_rate = video
        .frame_rate
        .filter(|f| f.is_valid())
        .unwrap_or(inferred.frame_rate);

    let mut config = EncoderConfig {
        width: resolution.width,
        height: resolution.height,
        frame_rate,
        // Stage 3: the preset only fills bitrates left unset.
        video_bitrate: video
            .bitrate
            .unwrap_or_else(|| preset.video_bitrate(resolution, frame_rate)),
        audio_bitrate: audio.bitrate.unwrap_or_else(|| preset.audio_bitrate()),
        sample_rate: audio.sample_rate.unwrap_or(inferred.sample_rate),
        channels: audio.channels.unwrap_or(inferred.channels),
        container,
        codec: CodecSelection {
            video: Some(video.codec.unwrap_or_else(|| container.default_video_codec())),
            audio: Some(audio.codec.unwrap_or_else(|| container.default_audio_codec())),
        },
        codec_string: CodecStrings {
            video: video.codec_string.clone(),
            audio: audio.codec_string.clone(),
        },
        latency_mode: options.latency_mode.unwrap_or_default(),
        hardware_acceleration: options.hardware_acceleration.unwrap_or_default(),
        max_video_queue_size: options.max_video_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
        max_audio_queue_size: options.max_audio_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
        backpressure_strategy: options.backpressure_strategy.unwrap_or_default(),
        first_timestamp_behavior: options.first_timestamp_behavior.unwrap_or_default(),
        key_frame_interval: video.key_frame_interval,
    };

    // A track the source provably lacks is dropped unless asked for explicitly.
    let drop_video = options.video.is_disabled()
        || (matches!(options.video, TrackOption::Auto) && hints.has_video == Some(false));
    let drop_audio = options.audio.is_disabled()
        || (matches!(options.audio, TrackOption::Auto) && hints.has_audio == Some(false));
    if drop_video {
        config.disable_video();
    }
    if drop_audio {
        config.disable_audio();
    }

    tracing::debug!(
        width = config.width,
        height = config.height,
        fps = %config.frame_rate,
        video_bitrate = config.video_bitrate,
        audio_bitrate = config.audio_bitrate,
        container = %config.container,
        ?preset,
        "Resolved encoder config"
    );
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AudioTrackSettings, VideoTrackSettings};

    fn hints_hd_mono() -> SourceHints {
        SourceHints {
            video: Some(VideoTrackSettings {
                width: 1920,
                height: 1080,
                frame_rate: Some(FrameRate(25.0)),
            }),
            audio: Some(AudioTrackSettings {
                sample_rate: 44_100,
                channels: 1,
            }),
            has_video: Some(true),
            has_audio: Some(true),
            total: None,
        }
    }

    #[test]
    fn inferred_values_are_used() {
        let config = resolve_config(&hints_hd_mono(), &EncodeOptions::default());
        assert_eq!(config.resolution(), Resolution::HD);
        assert_eq!(config.frame_rate, FrameRate(25.0));
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 1);
        // medium: 1920×1080×25×0.1
        assert_eq!(config.video_bitrate, 5_184_000);
        assert_eq!(config.audio_bitrate, 128_000);
        assert_eq!(config.codec.video, Some(VideoCodec::Avc));
        assert_eq!(config.codec.audio, Some(AudioCodec::Aac));
    }

    #[test]
    fn fallbacks_when_nothing_is_known() {
        let config = resolve_config(&SourceHints::default(), &EncodeOptions::default());
        assert_eq!(config.resolution(), Resolution::VGA);
        assert_eq!(config.frame_rate, FrameRate(30.0));
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 2);
        assert!(config.video_enabled());
        assert!(config.audio_enabled());
    }

    #[test]
    fn user_values_override_and_preset_fills_gaps() {
        let options = EncodeOptions {
            quality: Some(QualityPreset::High),
            video: TrackOption::Custom(VideoOptions {
                width: Some(1280),
                height: Some(720),
                bitrate: Some(3_000_000),
                ..VideoOptions::default()
            }),
            ..EncodeOptions::default()
        };
        let config = resolve_config(&hints_hd_mono(), &options);
        assert_eq!(config.resolution(), Resolution::HD720);
        assert_eq!(config.video_bitrate, 3_000_000);
        assert_eq!(config.audio_bitrate, 192_000);
    }

    #[test]
    fn audio_false_disables_track_completely() {
        let options = EncodeOptions::from_json(r#"{ "audio": false }"#).unwrap();
        let config = resolve_config(&hints_hd_mono(), &options);
        assert_eq!(config.audio_bitrate, 0);
        assert_eq!(config.channels, 0);
        assert_eq!(config.codec.audio, None);
        assert!(!config.audio_enabled());
        assert!(config.video_enabled());
    }

    #[test]
    fn absent_track_dropped_unless_requested() {
        let hints = SourceHints {
            has_audio: Some(false),
            ..hints_hd_mono()
        };
        let config = resolve_config(&hints, &EncodeOptions::default());
        assert!(!config.audio_enabled());

        let options = EncodeOptions {
            audio: TrackOption::Custom(AudioOptions::default()),
            ..EncodeOptions::default()
        };
        assert!(resolve_config(&hints, &options).audio_enabled());
    }

    #[test]
    fn webm_container_picks_its_defaults() {
        let options = EncodeOptions::from_json(
            r#"{ "container": "webm", "latencyMode": "realtime", "video": { "frameRate": 60 } }"#,
        )
        .unwrap();
        let config = resolve_config(&SourceHints::default(), &options);
        assert_eq!(config.codec.video, Some(VideoCodec::Vp9));
        assert_eq!(config.codec.audio, Some(AudioCodec::Opus));
        assert_eq!(config.frame_rate, FrameRate(60.0));
        assert_eq!(config.latency_mode, LatencyMode::Realtime);
    }

    #[test]
    fn track_option_json_shapes() {
        let options =
            EncodeOptions::from_json(r#"{ "video": true, "audio": { "channels": 1 } }"#).unwrap();
        assert_eq!(options.video, TrackOption::Auto);
        assert_eq!(options.audio.custom().and_then(|a| a.channels), Some(1));

        let json = serde_json::to_value(&EncodeOptions {
            audio: TrackOption::Disabled,
            ..EncodeOptions::default()
        })
        .unwrap();
        assert_eq!(json["audio"], serde_json::Value::Bool(false));
        assert_eq!(json["video"], serde_json::Value::Bool(true));

        assert!(EncodeOptions::from_json(r#"{ "audio": 5 }"#).is_err());
    }
}
