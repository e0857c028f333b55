//! Codec negotiation: find a platform-accepted configuration per track.
//!
//! ```text
//!   candidates = [requested, container default, every legal codec]
//!                  (deduplicated, codecs the container cannot carry removed)
//!
//!   for codec in candidates:
//!       for hw in [requested hw, opposite hw, no-preference]:
//!           probe(codec string, hw) ── supported ──▶ adopt
//!   none adopted ──▶ track disabled (fatal when no track remains)
//! ```
//!
//! An adopted audio configuration must keep the requested sample rate and
//! channel count; the pipeline never resamples.

use ek_common::{
    AudioCodec, AudioEncoderConfig, CodecPlatform, ContainerFormat, EncodeError, EncodeResult,
    EncoderConfig, VideoCodec, VideoEncoderConfig,
};

use crate::codec_string::{audio_codec_string, video_codec_string};

/// Try `candidates` in order and return the first one `probe` accepts.
pub fn negotiate<C, T, I, F>(candidates: I, mut probe: F) -> Option<T>
where
    I: IntoIterator<Item = C>,
    F: FnMut(C) -> Option<T>,
{
    candidates.into_iter().find_map(|candidate| probe(candidate))
}

/// Requested codec, then the container default, then every legal codec.
fn ordered_candidates<C: Copy + PartialEq + std::fmt::Debug>(
    requested: Option<C>,
    default: C,
    legal: &[C],
    container: ContainerFormat,
) -> Vec<C> {
    let mut out: Vec<C> = Vec::with_capacity(legal.len() + 2);
    for codec in requested.into_iter().chain([default]).chain(legal.iter().copied()) {
        if !legal.contains(&codec) {
            tracing::debug!(?codec, %container, "Skipping codec the container cannot carry");
            continue;
        }
        if !out.contains(&codec) {
            out.push(codec);
        }
    }
    out
}

pub fn video_candidates(config: &EncoderConfig) -> Vec<VideoCodec> {
    let container = config.container;
    ordered_candidates(
        config.codec.video,
        container.default_video_codec(),
        container.video_codecs(),
        container,
    )
}

pub fn audio_candidates(config: &EncoderConfig) -> Vec<AudioCodec> {
    let container = config.container;
    ordered_candidates(
        config.codec.audio,
        container.default_audio_codec(),
        container.audio_codecs(),
        container,
    )
}

/// Negotiate the video track. `Ok(None)` means every candidate was refused.
pub fn negotiate_video(
    platform: &dyn CodecPlatform,
    config: &EncoderConfig,
) -> EncodeResult<Option<VideoEncoderConfig>> {
    let resolution = config.resolution();
    let adopted = negotiate(video_candidates(config), |codec| {
        let codec_string = match &config.codec_string.video {
            Some(custom) if Some(codec) == config.codec.video => custom.clone(),
            _ => video_codec_string(codec, resolution, config.frame_rate),
        };
        negotiate(config.hardware_acceleration.retry_order(), |hw| {
            let request = VideoEncoderConfig {
                codec,
                codec_string: codec_string.clone(),
                resolution,
                bitrate: config.video_bitrate,
                frame_rate: config.frame_rate,
                hardware_acceleration: hw,
                latency_mode: config.latency_mode,
            };
            match platform.probe_video(&request) {
                Ok(support) if support.supported => Some(support.config),
                Ok(_) => {
                    tracing::debug!(
                        %codec,
                        codec_string = %request.codec_string,
                        ?hw,
                        "Video config not supported"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(%codec, ?hw, error = %e, "Video support probe failed");
                    None
                }
            }
        })
    });

    if let Some(adopted) = &adopted {
        tracing::info!(
            codec = %adopted.codec,
            codec_string = %adopted.codec_string,
            hw = ?adopted.hardware_acceleration,
            requested = ?config.codec.video,
            "Video codec negotiated"
        );
    }
    Ok(adopted)
}

/// Negotiate the audio track. A rate or channel mismatch on the adopted
/// configuration is a configuration error.
pub fn negotiate_audio(
    platform: &dyn CodecPlatform,
    config: &EncoderConfig,
) -> EncodeResult<Option<AudioEncoderConfig>> {
    let adopted = negotiate(audio_candidates(config), |codec| {
        let codec_string = match &config.codec_string.audio {
            Some(custom) if Some(codec) == config.codec.audio => custom.clone(),
            _ => audio_codec_string(codec),
        };
        let request = AudioEncoderConfig {
            codec,
            codec_string,
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate: config.audio_bitrate,
        };
        match platform.probe_audio(&request) {
            Ok(support) if support.supported => Some(support.config),
            Ok(_) => {
                tracing::debug!(%codec, "Audio config not supported");
                None
            }
            Err(e) => {
                tracing::warn!(%codec, error = %e, "Audio support probe failed");
                None
            }
        }
    });

    let Some(adopted) = adopted else {
        return Ok(None);
    };
    if adopted.sample_rate != config.sample_rate || adopted.channels != config.channels {
        return Err(EncodeError::Configuration(format!(
            "{} encoder negotiated {} Hz / {} ch, requested {} Hz / {} ch",
            adopted.codec,
            adopted.sample_rate,
            adopted.channels,
            config.sample_rate,
            config.channels
        )));
    }
    tracing::info!(
        codec = %adopted.codec,
        sample_rate = adopted.sample_rate,
        channels = adopted.channels,
        requested = ?config.codec.audio,
        "Audio codec negotiated"
    );
    Ok(Some(adopted))
}

/// Outcome of negotiating every enabled track.
#[derive(Clone, Debug)]
pub struct Negotiated {
    /// The input config with actual codecs filled in and refused tracks
    /// disabled.
    pub config: EncoderConfig,
    pub video: Option<VideoEncoderConfig>,
    pub audio: Option<AudioEncoderConfig>,
}

/// Negotiate both tracks. A track whose candidates are all refused is
/// disabled; if that leaves nothing to encode the result is `NotSupported`.
pub fn negotiate_tracks(
    platform: &dyn CodecPlatform,
    config: &EncoderConfig,
) -> EncodeResult<Negotiated> {
    let mut resolved = config.clone();

    let video = if config.video_enabled() {
        let video = negotiate_video(platform, config)?;
        if video.is_none() {
            tracing::warn!(
                container = %config.container,
                requested = ?config.codec.video,
                "No supported video codec, disabling video track"
            );
            resolved.disable_video();
        }
        video
    } else {
        None
    };

    let audio = if config.audio_enabled() {
        let audio = negotiate_audio(platform, config)?;
        if audio.is_none() {
            tracing::warn!(
                container = %config.container,
                requested = ?config.codec.audio,
                "No supported audio codec, disabling audio track"
            );
            resolved.disable_audio();
        }
        audio
    } else {
        None
    };

    if video.is_none() && audio.is_none() {
        return Err(EncodeError::NotSupported(format!(
            "no supported codec configuration for {} on {}",
            config.container,
            platform.name()
        )));
    }

    if let Some(v) = &video {
        resolved.codec.video = Some(v.codec);
        resolved.codec_string.video = Some(v.codec_string.clone());
    }
    if let Some(a) = &audio {
        resolved.codec.audio = Some(a.codec);
        resolved.codec_string.audio = Some(a.codec_string.clone());
    }

    Ok(Negotiated {
        config: resolved,
        video,
        audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwarePlatform;
    use ek_common::{ErrorKind, HardwareAcceleration};

    #[test]
    fn generic_negotiation_returns_first_accepted() {
        let mut tried = Vec::new();
        let picked = negotiate([1, 2, 3, 4], |n| {
            tried.push(n);
            (n % 3 == 0).then_some(n * 10)
        });
        assert_eq!(picked, Some(30));
        assert_eq!(tried, vec![1, 2, 3]);
        assert_eq!(negotiate(Vec::<u8>::new(), |n| Some(n)), None);
    }

    #[test]
    fn candidate_order_and_filtering() {
        let mut config = EncoderConfig::default();
        config.codec.video = Some(VideoCodec::Av1);
        assert_eq!(
            video_candidates(&config),
            vec![VideoCodec::Av1, VideoCodec::Avc, VideoCodec::Hevc, VideoCodec::Vp9]
        );

        config.container = ContainerFormat::WebM;
        config.codec.audio = Some(AudioCodec::Aac);
        assert_eq!(
            audio_candidates(&config),
            vec![AudioCodec::Opus, AudioCodec::Vorbis]
        );
    }

    #[test]
    fn unsupported_request_falls_back_in_order() {
        let platform = SoftwarePlatform::builder()
            .video_codecs(&[VideoCodec::Vp9])
            .build();
        let mut config = EncoderConfig::default();
        config.codec.video = Some(VideoCodec::Hevc);
        let video = negotiate_video(&platform, &config).unwrap().unwrap();
        assert_eq!(video.codec, VideoCodec::Vp9);
        assert_eq!(video.codec_string, "vp09.00.31.08");
    }

    #[test]
    fn hardware_preference_retry() {
        let platform = SoftwarePlatform::builder()
            .hardware_preferences(&[HardwareAcceleration::PreferSoftware])
            .build();
        let mut config = EncoderConfig::default();
        config.hardware_acceleration = HardwareAcceleration::PreferHardware;
        let video = negotiate_video(&platform, &config).unwrap().unwrap();
        assert_eq!(video.codec, VideoCodec::Avc);
        assert_eq!(video.hardware_acceleration, HardwareAcceleration::PreferSoftware);
    }

    #[test]
    fn codec_string_override_only_for_requested_codec() {
        let platform = SoftwarePlatform::builder()
            .video_codecs(&[VideoCodec::Hevc])
            .build();
        let mut config = EncoderConfig::default();
        config.codec.video = Some(VideoCodec::Avc);
        config.codec_string.video = Some("avc1.640033".into());
        let video = negotiate_video(&platform, &config).unwrap().unwrap();
        assert_eq!(video.codec, VideoCodec::Hevc);
        assert_eq!(video.codec_string, "hvc1.1.6.L93.B0");
    }

    #[test]
    fn audio_mismatch_is_configuration_error() {
        let platform = SoftwarePlatform::builder().force_audio_channels(1).build();
        let config = EncoderConfig::default();
        let err = negotiate_audio(&platform, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn refused_track_is_disabled() {
        let platform = SoftwarePlatform::builder().audio_codecs(&[]).build();
        let negotiated = negotiate_tracks(&platform, &EncoderConfig::default()).unwrap();
        assert!(negotiated.audio.is_none());
        assert!(!negotiated.config.audio_enabled());
        assert_eq!(negotiated.config.codec.video, Some(VideoCodec::Avc));
        assert_eq!(
            negotiated.config.codec_string.video.as_deref(),
            Some("avc1.42E01F")
        );
    }

    #[test]
    fn nothing_supported_is_fatal() {
        let platform = SoftwarePlatform::builder()
            .video_codecs(&[])
            .audio_codecs(&[])
            .build();
        let err = negotiate_tracks(&platform, &EncoderConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
