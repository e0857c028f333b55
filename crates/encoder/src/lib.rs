//! `ek-encoder` -- Encode orchestration engine.
//!
//! Turns time-ordered video and audio samples into MP4 or WebM bytes using
//! whatever codecs the platform accepts at run time. Encoding runs on a
//! dedicated worker thread that talks to the controller only through
//! command and event channels.
//!
//! # Architecture
//!
//! - [`source`] -- Source normalizer (collections, live capture, lazy sequences, files)
//! - [`resolve`] -- Config resolver (inference, user overrides, quality presets)
//! - [`codec_string`] -- Deterministic codec strings from resolution and frame rate
//! - [`negotiate`] -- Codec negotiator (ordered candidates, hardware retry, degraded init)
//! - [`backpressure`] -- Per-track drop / wait admission control
//! - [`session`] -- `EncodeSession`: encoders + muxer + counters, single teardown path
//! - [`protocol`] -- Command and event envelopes
//! - [`worker`] -- The execution-context thread and its state machine
//! - [`transfer`] -- Move-or-copy of sample buffers across the boundary
//! - [`orchestrator`] -- Controller-side `EncodeOperation`, observer and cancel handle
//! - [`export`] -- `encode`, `encode_with`, `encode_stream`
//! - [`software`] -- Threaded software reference codec platform
//!
//! # Encode Pipeline
//!
//! ```text
//! MediaSource
//!   --> SampleStream (peek for hints, assign timestamps)
//!     --> resolve_config(hints, EncodeOptions) -> EncoderConfig
//!       --> EncodeOperation::start -- initialize --> worker
//!             negotiate codecs, create encoders + muxer
//!       --> add_video_frame / add_audio_data -- per sample --> worker
//!             backpressure -> TrackEncoder -> MuxerAdapter
//!       --> finalize -- flush, mux, teardown --> bytes | data chunks
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ek_encoder::{encode, EncodeOptions, SoftwarePlatform};
//!
//! let options = EncodeOptions::from_json(r#"{ "quality": "high", "audio": false }"#)?;
//! let mp4 = encode(Arc::new(SoftwarePlatform::new()), frames, &options)?;
//! ```

pub mod backpressure;
pub mod codec_string;
pub mod error;
pub mod export;
pub mod negotiate;
pub mod orchestrator;
pub mod protocol;
pub mod resolve;
pub mod session;
pub mod software;
pub mod source;
pub mod transfer;
pub mod worker;

pub use error::SourceError;
pub use export::{encode, encode_stream, encode_with, ChunkStream};
pub use orchestrator::{
    CancelHandle, EncodeObserver, EncodeOperation, InitializedCodecs, NullObserver,
    OperationState,
};
pub use resolve::{resolve_config, AudioOptions, EncodeOptions, TrackOption, VideoOptions};
pub use session::{EncodeSession, SessionStats};
pub use software::{SoftwarePlatform, SoftwarePlatformBuilder};
pub use source::{
    AudioTrackSettings, FileSource, LiveCapture, MediaSource, SampleStream, SourceHints,
    VideoTrackSettings,
};
