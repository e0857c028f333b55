//! Encoder-crate error types.
//!
//! Everything crossing the public API is an `ek_common::EncodeError`. The
//! types here cover failures that originate in this crate's own inputs and
//! convert into the common taxonomy.

use ek_common::{EncodeError, TrackKind};
use thiserror::Error;

/// Failure reported by a media source while producing samples.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Failed to read {track} sample: {reason}")]
    Read { track: TrackKind, reason: String },

    #[error("Failed to decode {track} sample: {reason}")]
    Decode { track: TrackKind, reason: String },

    #[error("Source produced no samples")]
    Empty,
}

impl SourceError {
    pub fn track(&self) -> Option<TrackKind> {
        match self {
            Self::Read { track, .. } | Self::Decode { track, .. } => Some(*track),
            Self::Empty => None,
        }
    }
}

impl From<SourceError> for EncodeError {
    fn from(err: SourceError) -> Self {
        let message = format!("source: {err}");
        match err.track() {
            Some(TrackKind::Audio) => EncodeError::AudioEncoding(message),
            Some(TrackKind::Video) => EncodeError::VideoEncoding(message),
            None => EncodeError::Configuration(message),
        }
    }
}
