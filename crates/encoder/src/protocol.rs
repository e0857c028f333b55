//! Command and event envelopes between the controller and the worker.
//!
//! ```text
//!   controller ── Command ──▶ worker        worker ── Event ──▶ controller
//!     initialize                              initialized
//!     addVideoFrame                           progress
//!     addAudioData                            queueSize
//!     finalize                                dataChunk
//!     cancel                                  finalized
//!                                             error
//!                                             cancelled
//! ```
//!
//! Every envelope names itself through `tag()`, so a receiver can match on
//! kind alone without pairing requests and replies.

use ek_common::{
    AudioCodec, AudioData, EncodeError, EncoderConfig, ErrorKind, VideoCodec, VideoFrame,
};
use ek_mux::DataChunk;

/// Controller → worker.
#[derive(Debug)]
pub enum Command {
    Initialize {
        config: Box<EncoderConfig>,
        total_samples: Option<u64>,
    },
    AddVideoFrame {
        frame: VideoFrame,
        timestamp: i64,
    },
    AddAudioData {
        data: AudioData,
        timestamp: i64,
        sample_rate: u32,
        channels: u16,
    },
    Finalize,
    Cancel,
}

impl Command {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::AddVideoFrame { .. } => "addVideoFrame",
            Self::AddAudioData { .. } => "addAudioData",
            Self::Finalize => "finalize",
            Self::Cancel => "cancel",
        }
    }

    /// Release any sample the command carries.
    pub fn release(self) {
        match self {
            Self::AddVideoFrame { frame, .. } => frame.close(),
            Self::AddAudioData { data, .. } => data.close(),
            _ => {}
        }
    }
}

/// Worker → controller.
#[derive(Debug)]
pub enum Event {
    Initialized {
        actual_video_codec: Option<VideoCodec>,
        actual_audio_codec: Option<AudioCodec>,
    },
    Progress {
        processed: u64,
        total: Option<u64>,
    },
    QueueSize {
        video_queue_size: usize,
        audio_queue_size: usize,
    },
    DataChunk(DataChunk),
    Finalized {
        output: Option<Vec<u8>>,
    },
    Error {
        message: String,
        kind: ErrorKind,
        /// Where in the worker the error surfaced, innermost first.
        stack: Option<String>,
    },
    Cancelled,
}

impl Event {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::Progress { .. } => "progress",
            Self::QueueSize { .. } => "queueSize",
            Self::DataChunk(_) => "dataChunk",
            Self::Finalized { .. } => "finalized",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn error(err: &EncodeError, stack: Option<String>) -> Self {
        Self::Error {
            message: err.message().to_string(),
            kind: err.kind(),
            stack,
        }
    }

    /// Events that end the operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finalized { .. } | Self::Error { .. } | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_wire_names() {
        assert_eq!(Command::Finalize.tag(), "finalize");
        assert_eq!(
            Command::Initialize {
                config: Box::default(),
                total_samples: None
            }
            .tag(),
            "initialize"
        );
        assert_eq!(
            Event::QueueSize {
                video_queue_size: 0,
                audio_queue_size: 0
            }
            .tag(),
            "queueSize"
        );
        assert_eq!(Event::Cancelled.tag(), "cancelled");
    }

    #[test]
    fn error_event_round_trips_kind_and_message() {
        let err = EncodeError::NotSupported("no codec".into());
        let Event::Error {
            message,
            kind,
            stack,
        } = Event::error(&err, Some("initialize".into()))
        else {
            panic!("expected error event");
        };
        assert_eq!(EncodeError::from_kind(kind, message), err);
        assert_eq!(stack.as_deref(), Some("initialize"));
    }

    #[test]
    fn terminal_events() {
        assert!(Event::Cancelled.is_terminal());
        assert!(Event::Finalized { output: None }.is_terminal());
        assert!(!Event::Progress {
            processed: 1,
            total: None
        }
        .is_terminal());
    }
}
