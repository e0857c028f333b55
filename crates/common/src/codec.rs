//! Video/audio codec and container format enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[serde(alias = "h264")]
    Avc,
    #[serde(alias = "h265")]
    Hevc,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 5] = [Self::Avc, Self::Hevc, Self::Vp8, Self::Vp9, Self::Av1];

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Avc => "H.264/AVC",
            Self::Hevc => "H.265/HEVC",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::Av1 => "AV1",
        }
    }

    /// Recognize a codec from a full codec string (`avc1.64001F`, `vp09.00.31.08`, ...).
    pub fn from_codec_string(s: &str) -> Option<Self> {
        let prefix = s.split('.').next().unwrap_or_default();
        match prefix {
            "avc1" | "avc3" | "avc" | "h264" => Some(Self::Avc),
            "hvc1" | "hev1" | "hevc" | "h265" => Some(Self::Hevc),
            "vp8" => Some(Self::Vp8),
            "vp09" | "vp9" => Some(Self::Vp9),
            "av01" | "av1" => Some(Self::Av1),
            _ => None,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Audio codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
    Vorbis,
}

impl AudioCodec {
    pub const ALL: [AudioCodec; 3] = [Self::Aac, Self::Opus, Self::Vorbis];

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Aac => "AAC-LC",
            Self::Opus => "Opus",
            Self::Vorbis => "Vorbis",
        }
    }

    /// Fixed codec string understood by platform encoders.
    pub fn codec_string(self) -> &'static str {
        match self {
            Self::Aac => "mp4a.40.2",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
        }
    }

    /// Samples per channel in one encoded frame.
    pub fn frame_size(self) -> u32 {
        match self {
            Self::Aac => 1024,
            Self::Opus => 960,
            Self::Vorbis => 1024,
        }
    }

    pub fn from_codec_string(s: &str) -> Option<Self> {
        match s.split('.').next().unwrap_or_default() {
            "mp4a" | "aac" => Some(Self::Aac),
            "opus" => Some(Self::Opus),
            "vorbis" => Some(Self::Vorbis),
            _ => None,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Output container format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// ISO BMFF (progressive or fragmented).
    #[default]
    Mp4,
    /// WebM (Matroska subset, EBML clusters).
    WebM,
}

impl ContainerFormat {
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::WebM => "webm",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::WebM => "video/webm",
        }
    }

    /// Conventional video codec for the container.
    pub fn default_video_codec(self) -> VideoCodec {
        match self {
            Self::Mp4 => VideoCodec::Avc,
            Self::WebM => VideoCodec::Vp9,
        }
    }

    /// Conventional audio codec for the container.
    pub fn default_audio_codec(self) -> AudioCodec {
        match self {
            Self::Mp4 => AudioCodec::Aac,
            Self::WebM => AudioCodec::Opus,
        }
    }

    /// Every video codec the container can legally carry, in preference order.
    pub fn video_codecs(self) -> &'static [VideoCodec] {
        match self {
            Self::Mp4 => &[VideoCodec::Avc, VideoCodec::Hevc, VideoCodec::Vp9, VideoCodec::Av1],
            Self::WebM => &[VideoCodec::Vp9, VideoCodec::Vp8, VideoCodec::Av1],
        }
    }

    /// Every audio codec the container can legally carry, in preference order.
    pub fn audio_codecs(self) -> &'static [AudioCodec] {
        match self {
            Self::Mp4 => &[AudioCodec::Aac, AudioCodec::Opus],
            Self::WebM => &[AudioCodec::Opus, AudioCodec::Vorbis],
        }
    }

    pub fn supports_video(self, codec: VideoCodec) -> bool {
        self.video_codecs().contains(&codec)
    }

    pub fn supports_audio(self, codec: AudioCodec) -> bool {
        self.audio_codecs().contains(&codec)
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_defaults_are_legal() {
        for container in [ContainerFormat::Mp4, ContainerFormat::WebM] {
            assert!(container.supports_video(container.default_video_codec()));
            assert!(container.supports_audio(container.default_audio_codec()));
        }
    }

    #[test]
    fn aac_is_mp4_only() {
        assert!(ContainerFormat::Mp4.supports_audio(AudioCodec::Aac));
        assert!(!ContainerFormat::WebM.supports_audio(AudioCodec::Aac));
        assert!(!ContainerFormat::Mp4.supports_video(VideoCodec::Vp8));
    }

    #[test]
    fn codec_strings_are_recognized() {
        assert_eq!(VideoCodec::from_codec_string("avc1.64001F"), Some(VideoCodec::Avc));
        assert_eq!(VideoCodec::from_codec_string("vp09.00.31.08"), Some(VideoCodec::Vp9));
        assert_eq!(VideoCodec::from_codec_string("av01.0.08M.08"), Some(VideoCodec::Av1));
        assert_eq!(VideoCodec::from_codec_string("theora"), None);
        assert_eq!(AudioCodec::from_codec_string("mp4a.40.2"), Some(AudioCodec::Aac));
    }

    #[test]
    fn serde_names() {
        let codec: VideoCodec = serde_json::from_str("\"h264\"").unwrap();
        assert_eq!(codec, VideoCodec::Avc);
        assert_eq!(serde_json::to_string(&ContainerFormat::WebM).unwrap(), "\"webm\"");
    }
}
