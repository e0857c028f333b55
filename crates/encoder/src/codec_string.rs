//! Deterministic codec strings derived from resolution and frame rate.
//!
//! The level is chosen from macroblocks per second (16x16 blocks × fps):
//!
//! | MB/s          | level |
//! |---------------|-------|
//! | ≤ 108,000     | 3.1   |
//! | ≤ 216,000     | 3.2   |
//! | ≤ 245,760     | 4.0   |
//! | ≤ 522,240     | 4.2   |
//! | ≤ 589,824     | 5.0   |
//! | ≤ 983,040     | 5.1   |
//! | above         | 5.2   |

use std::fmt;

use ek_common::{AudioCodec, FrameRate, Resolution, VideoCodec};

/// A codec level such as 3.1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Level {
    pub major: u8,
    pub minor: u8,
}

impl Level {
    const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// `level_idc` as used by AVC and VP9 (3.1 → 31).
    pub fn idc(self) -> u8 {
        self.major * 10 + self.minor
    }

    /// HEVC `general_level_idc` (level × 30).
    pub fn hevc_idc(self) -> u32 {
        self.idc() as u32 * 3
    }

    /// AV1 `seq_level_idx` for the closest AV1 level at or above this one.
    pub fn av1_seq_level_idx(self) -> u8 {
        match (self.major, self.minor) {
            (0..=3, 0..=1) => 5, // 3.1
            (3, _) | (4, 0) => 8, // 4.0
            (4, _) => 9,          // 4.1
            (5, 0) => 12,
            (5, 1) => 13,
            _ => 14, // 5.2
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

const LEVEL_TABLE: [(u64, Level); 6] = [
    (108_000, Level::new(3, 1)),
    (216_000, Level::new(3, 2)),
    (245_760, Level::new(4, 0)),
    (522_240, Level::new(4, 2)),
    (589_824, Level::new(5, 0)),
    (983_040, Level::new(5, 1)),
];

/// Level for `resolution` at `frame_rate`.
pub fn level_for(resolution: Resolution, frame_rate: FrameRate) -> Level {
    let fps = if frame_rate.is_valid() {
        frame_rate.as_f64()
    } else {
        FrameRate::FPS_30.as_f64()
    };
    let mbps = (resolution.macroblocks() as f64 * fps).ceil() as u64;
    LEVEL_TABLE
        .iter()
        .find(|(limit, _)| mbps <= *limit)
        .map_or(Level::new(5, 2), |(_, level)| *level)
}

/// AVC profile_idc and constraint flags by resolution.
fn avc_profile(resolution: Resolution) -> (u8, u8) {
    if resolution.width >= 1920 && resolution.height >= 1080 {
        (0x64, 0x00) // High
    } else if resolution.width >= 1280 && resolution.height >= 720 {
        (0x4D, 0x00) // Main
    } else {
        (0x42, 0xE0) // Constrained Baseline
    }
}

/// Codec string for a video codec at the given resolution and frame rate.
pub fn video_codec_string(
    codec: VideoCodec,
    resolution: Resolution,
    frame_rate: FrameRate,
) -> String {
    let level = level_for(resolution, frame_rate);
    match codec {
        VideoCodec::Avc => {
            let (profile, constraints) = avc_profile(resolution);
            format!("avc1.{profile:02X}{constraints:02X}{:02X}", level.idc())
        }
        VideoCodec::Hevc => format!("hvc1.1.6.L{}.B0", level.hevc_idc()),
        VideoCodec::Vp8 => "vp8".to_string(),
        VideoCodec::Vp9 => format!("vp09.00.{:02}.08", level.idc()),
        VideoCodec::Av1 => format!("av01.0.{:02}M.08", level.av1_seq_level_idx()),
    }
}

pub fn audio_codec_string(codec: AudioCodec) -> String {
    codec.codec_string().to_string()
}
