//! Core value types shared by every stage of the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds per second; all pipeline timestamps are in microseconds.
pub const MICROS_PER_SECOND: u64 = 1_000_000;

/// Video/image resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Fallback when no dimensions can be inferred from the source.
    pub const VGA: Self = Self {
        width: 640,
        height: 480,
    };
    pub const HD720: Self = Self {
        width: 1280,
        height: 720,
    };
    pub const HD: Self = Self {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of 16x16 macroblocks needed to cover one picture.
    pub fn macroblocks(self) -> u64 {
        let mb_w = (self.width as u64).div_ceil(16);
        let mb_h = (self.height as u64).div_ceil(16);
        mb_w * mb_h
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frames per second. Fractional rates (29.97) are allowed.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameRate(pub f64);

impl FrameRate {
    pub const FPS_30: Self = Self(30.0);

    pub fn as_f64(self) -> f64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }

    /// Whole frames in `seconds`, at least one.
    pub fn frames_in(self, seconds: f64) -> u32 {
        if !self.is_valid() {
            return 1;
        }
        ((self.0 * seconds).round() as u32).max(1)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as u64)
        } else {
            write!(f, "{:.3}", self.0)
        }
    }
}

/// Which track of the output a sample or chunk belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Timestamp of the `index`-th video frame at a constant frame rate.
pub fn frame_timestamp(index: u64, frame_rate: f64) -> u64 {
    if frame_rate <= 0.0 {
        return 0;
    }
    (index as f64 * MICROS_PER_SECOND as f64 / frame_rate).round() as u64
}

/// Timestamp of an audio chunk that starts after `frames` sample frames.
pub fn audio_timestamp(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    ((frames as u128 * MICROS_PER_SECOND as u128) / sample_rate as u128) as u64
}

/// Duration in microseconds of one frame at `frame_rate`.
pub fn frame_duration(frame_rate: f64) -> u64 {
    if frame_rate <= 0.0 {
        return 0;
    }
    (MICROS_PER_SECOND as f64 / frame_rate).round() as u64
}
