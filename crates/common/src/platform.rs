//! Codec platform abstraction traits.
//!
//! The platform's encoders are external collaborators. The engine programs
//! against these traits only: it probes support for concrete configurations,
//! creates per-track encoders, and feeds them samples.
//!
//! ```text
//!   negotiator ──probe_video/probe_audio──▶ CodecPlatform
//!   session    ──create_*_encoder─────────▶ Box<dyn TrackEncoder<S>>
//!                                              │ encode / take_output / flush
//!                                              ▼
//!                                          EncodedChunk ──▶ muxer
//! ```

use crate::codec::{AudioCodec, VideoCodec};
use crate::config::{HardwareAcceleration, LatencyMode};
use crate::error::EncodeError;
use crate::packet::EncodedChunk;
use crate::sample::{AudioData, VideoFrame};
use crate::types::{FrameRate, Resolution};

/// Concrete configuration handed to a platform video encoder.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoEncoderConfig {
    pub codec: VideoCodec,
    pub codec_string: String,
    pub resolution: Resolution,
    pub bitrate: u64,
    pub frame_rate: FrameRate,
    pub hardware_acceleration: HardwareAcceleration,
    pub latency_mode: LatencyMode,
}

/// Concrete configuration handed to a platform audio encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    pub codec: AudioCodec,
    pub codec_string: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u64,
}

/// Result of a video support probe. `config` is what the platform would
/// actually run with.
#[derive(Clone, Debug)]
pub struct VideoSupport {
    pub supported: bool,
    pub config: VideoEncoderConfig,
}

/// Result of an audio support probe. The platform may report a different
/// sample rate or channel count than requested.
#[derive(Clone, Debug)]
pub struct AudioSupport {
    pub supported: bool,
    pub config: AudioEncoderConfig,
}

/// Which sample kinds the platform accepts by move across the
/// execution-context boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferCapabilities {
    pub video_frames: bool,
    pub audio_data: bool,
}

impl Default for TransferCapabilities {
    fn default() -> Self {
        Self {
            video_frames: true,
            audio_data: true,
        }
    }
}

/// Platform codec layer.
pub trait CodecPlatform: Send + Sync {
    /// Human-readable platform name.
    fn name(&self) -> &str;

    /// Ask whether a concrete video configuration can be encoded.
    fn probe_video(&self, config: &VideoEncoderConfig) -> Result<VideoSupport, EncodeError>;

    /// Ask whether a concrete audio configuration can be encoded.
    fn probe_audio(&self, config: &AudioEncoderConfig) -> Result<AudioSupport, EncodeError>;

    fn create_video_encoder(
        &self,
        config: &VideoEncoderConfig,
    ) -> Result<Box<dyn TrackEncoder<VideoFrame>>, EncodeError>;

    fn create_audio_encoder(
        &self,
        config: &AudioEncoderConfig,
    ) -> Result<Box<dyn TrackEncoder<AudioData>>, EncodeError>;

    fn transfer_capabilities(&self) -> TransferCapabilities {
        TransferCapabilities::default()
    }
}

/// One live per-track encoder.
///
/// `encode` takes ownership of the sample; the encoder releases it. Output
/// is collected with `take_output`, which never blocks.
pub trait TrackEncoder<S>: Send {
    /// Queue one sample for encoding.
    fn encode(&mut self, sample: S, key_frame: bool) -> Result<(), EncodeError>;

    /// Chunks finished since the last call, in presentation order.
    fn take_output(&mut self) -> Result<Vec<EncodedChunk>, EncodeError>;

    /// Samples accepted but not yet encoded.
    fn queue_depth(&self) -> usize;

    /// Drain the encoder and return the remaining chunks.
    fn flush(&mut self) -> Result<Vec<EncodedChunk>, EncodeError>;

    /// Release encoder resources. Safe to call more than once.
    fn close(&mut self);
}
