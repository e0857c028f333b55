//! `ek-common` -- Shared types, traits, and errors for the encode engine.
//!
//! This crate is the foundation the muxer and encoder crates depend on:
//!
//! - **Types**: `Resolution`, `FrameRate`, `TrackKind`, microsecond timestamp helpers
//! - **Samples**: `VideoFrame`, `AudioData`, `Sample`, `SampleData` (owned or shared buffers)
//! - **Packets**: `EncodedChunk`, `DecoderConfig` (encoder output)
//! - **Config**: `EncoderConfig` and its option enums
//! - **Platform**: `CodecPlatform`, `TrackEncoder` (codec backend abstraction)
//! - **Errors**: `EncodeError`, `ErrorKind` (thiserror-based)

pub mod codec;
pub mod config;
pub mod error;
pub mod packet;
pub mod platform;
pub mod sample;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{AudioCodec, ContainerFormat, VideoCodec};
pub use config::{
    BackpressureStrategy, CodecSelection, CodecStrings, EncoderConfig, FirstTimestampBehavior,
    HardwareAcceleration, LatencyMode, OutputMode, QualityPreset,
};
pub use error::{EncodeError, EncodeResult, ErrorKind};
pub use packet::{DecoderConfig, EncodedChunk};
pub use platform::{
    AudioEncoderConfig, AudioSupport, CodecPlatform, TrackEncoder, TransferCapabilities,
    VideoEncoderConfig, VideoSupport,
};
pub use sample::{AudioData, PixelFormat, Sample, SampleData, VideoFrame};
pub use types::{FrameRate, Resolution, TrackKind, MICROS_PER_SECOND};
