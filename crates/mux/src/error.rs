//! Muxer error types.

use ek_common::{ContainerFormat, EncodeError, TrackKind};
use thiserror::Error;

/// Errors that can occur while writing a container.
#[derive(Error, Debug)]
pub enum MuxError {
    /// I/O error on the in-memory writer.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid muxer configuration.
    #[error("Invalid muxer config: {0}")]
    InvalidConfig(String),

    /// Track-related error (e.g. chunk for a track that was never configured).
    #[error("Track error: {0}")]
    TrackError(String),

    /// A size or offset does not fit the field it is written to.
    #[error("Buffer full: {0}")]
    BufferFull(String),

    /// The negotiated codec cannot be carried by the container.
    #[error("{container} cannot carry {track} codec {codec}")]
    CodecMismatch {
        container: ContainerFormat,
        track: TrackKind,
        codec: String,
    },

    /// First timestamp on a track was non-zero under strict timestamp handling.
    #[error("First {track} timestamp is {timestamp}us, expected 0")]
    NonZeroFirstTimestamp { track: TrackKind, timestamp: i64 },

    /// Timestamp went backwards after offsetting.
    #[error("{track} timestamp {timestamp}us precedes the track start")]
    NegativeTimestamp { track: TrackKind, timestamp: i64 },

    #[error("Muxer already finalized")]
    AlreadyFinalized,
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;

impl From<MuxError> for EncodeError {
    fn from(err: MuxError) -> Self {
        EncodeError::MuxingFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ek_common::ErrorKind;

    #[test]
    fn mux_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::WriteZero, "short write");
        let mux_err = MuxError::from(io_err);
        assert!(mux_err.to_string().contains("IO error"));
        assert!(mux_err.to_string().contains("short write"));
    }

    #[test]
    fn mux_error_display_codec_mismatch() {
        let err = MuxError::CodecMismatch {
            container: ContainerFormat::WebM,
            track: TrackKind::Audio,
            codec: "AAC-LC".into(),
        };
        assert_eq!(err.to_string(), "webm cannot carry audio codec AAC-LC");
    }

    #[test]
    fn mux_error_display_strict_timestamp() {
        let err = MuxError::NonZeroFirstTimestamp {
            track: TrackKind::Video,
            timestamp: 40_000,
        };
        assert_eq!(err.to_string(), "First video timestamp is 40000us, expected 0");
    }

    #[test]
    fn converts_to_muxing_failed() {
        let err: EncodeError = MuxError::AlreadyFinalized.into();
        assert_eq!(err.kind(), ErrorKind::MuxingFailed);
        assert_eq!(err.message(), "Muxer already finalized");
    }
}
