//! Central error taxonomy for the encode engine (thiserror-based).
//!
//! Every failure that reaches a caller is one [`EncodeError`]. Errors cross
//! the execution-context boundary as `(kind, message)` pairs, so each variant
//! can be rebuilt from its [`ErrorKind`] on the controller side.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, serializable error classification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotSupported,
    InitializationFailed,
    ConfigurationError,
    VideoEncodingError,
    AudioEncodingError,
    MuxingFailed,
    Cancelled,
    WorkerError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSupported => "not-supported",
            Self::InitializationFailed => "initialization-failed",
            Self::ConfigurationError => "configuration-error",
            Self::VideoEncodingError => "video-encoding-error",
            Self::AudioEncodingError => "audio-encoding-error",
            Self::MuxingFailed => "muxing-failed",
            Self::Cancelled => "cancelled",
            Self::WorkerError => "worker-error",
            Self::InternalError => "internal-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode pipeline errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Video encoding failed: {0}")]
    VideoEncoding(String),

    #[error("Audio encoding failed: {0}")]
    AudioEncoding(String),

    #[error("Muxing failed: {0}")]
    MuxingFailed(String),

    #[error("Encode cancelled")]
    Cancelled,

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EncodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::InitializationFailed(_) => ErrorKind::InitializationFailed,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::VideoEncoding(_) => ErrorKind::VideoEncodingError,
            Self::AudioEncoding(_) => ErrorKind::AudioEncodingError,
            Self::MuxingFailed(_) => ErrorKind::MuxingFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Worker(_) => ErrorKind::WorkerError,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// The message without the kind prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Self::NotSupported(m)
            | Self::InitializationFailed(m)
            | Self::Configuration(m)
            | Self::VideoEncoding(m)
            | Self::AudioEncoding(m)
            | Self::MuxingFailed(m)
            | Self::Worker(m)
            | Self::Internal(m) => m,
            Self::Cancelled => "cancelled",
        }
    }

    /// Rebuild an error received as an `error` event.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::NotSupported => Self::NotSupported(message),
            ErrorKind::InitializationFailed => Self::InitializationFailed(message),
            ErrorKind::ConfigurationError => Self::Configuration(message),
            ErrorKind::VideoEncodingError => Self::VideoEncoding(message),
            ErrorKind::AudioEncodingError => Self::AudioEncoding(message),
            ErrorKind::MuxingFailed => Self::MuxingFailed(message),
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::WorkerError => Self::Worker(message),
            ErrorKind::InternalError => Self::Internal(message),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience Result type for encode operations.
pub type EncodeResult<T> = Result<T, EncodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_from_kind() {
        let errors = [
            EncodeError::NotSupported("vp8 in mp4".into()),
            EncodeError::Configuration("channel mismatch".into()),
            EncodeError::MuxingFailed("moov".into()),
            EncodeError::Cancelled,
            EncodeError::Worker("panicked".into()),
        ];
        for err in errors {
            let rebuilt = EncodeError::from_kind(err.kind(), err.message());
            assert_eq!(rebuilt, err);
        }
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::VideoEncodingError).unwrap();
        assert_eq!(json, "\"video-encoding-error\"");
        assert_eq!(ErrorKind::NotSupported.to_string(), "not-supported");
    }

    #[test]
    fn display_includes_message() {
        let err = EncodeError::Configuration("sample rate 44100 != 48000".into());
        assert_eq!(err.to_string(), "Configuration error: sample rate 44100 != 48000");
        assert_eq!(EncodeError::Cancelled.to_string(), "Encode cancelled");
    }
}
