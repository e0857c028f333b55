//! `ek-mux` -- MP4 and WebM container writers for the encode engine.
//!
//! Encoded video and audio chunks go in; a playable container comes out,
//! either as one byte array (buffered) or as a sequence of byte ranges
//! (streaming).
//!
//! # Architecture
//!
//! - **Pure Rust box/element writing** -- no native muxing library
//! - **MP4 buffered** -- `ftyp`, a growing 64-bit `mdat`, `moov` written in `finalize()`
//! - **MP4 streaming** -- init segment (`ftyp` + `moov`/`mvex`) then `moof`+`mdat` pairs
//! - **WebM** -- EBML header, Segment, Info, Tracks, Clusters (plus Cues when buffered)
//! - **Adapter** -- [`MuxerAdapter`] picks the container and rebases timestamps per track
//!
//! # Usage
//!
//! ```ignore
//! use ek_mux::{MuxerAdapter, MuxTracks, VideoTrackConfig};
//!
//! let mut muxer = MuxerAdapter::new(&config, &MuxTracks {
//!     video: Some(VideoTrackConfig { codec, codec_string, resolution, frame_rate }),
//!     audio: None,
//! })?;
//!
//! for chunk in encoded_chunks {
//!     muxer.add_video_chunk(&chunk)?;
//!     for range in muxer.take_data_chunks() {
//!         send(range);
//!     }
//! }
//! let file = muxer.finalize()?; // Some(bytes) when buffered
//! ```

pub mod adapter;
pub mod atoms;
pub mod container;
pub mod ebml;
pub mod error;
pub mod mp4;
pub mod muxer;
pub mod webm;

// Re-export primary API types
pub use adapter::MuxerAdapter;
pub use container::{
    assemble, AudioTrackConfig, ContainerMuxer, DataChunk, MuxSample, MuxTracks, VideoTrackConfig,
};
pub use error::{MuxError, MuxResult};
pub use muxer::Mp4Muxer;
pub use webm::WebmMuxer;
