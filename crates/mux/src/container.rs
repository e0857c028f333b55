//! Types shared by the MP4 and WebM writers.
//!
//! ```text
//!   MuxerAdapter ──MuxSample──▶ dyn ContainerMuxer ──▶ Mp4Muxer | WebmMuxer
//!                                      │
//!                     streaming: StreamSink ──▶ DataChunk (header / media)
//!                     buffered:  finalize() ──▶ Vec<u8>
//! ```

use ek_common::{
    AudioCodec, ContainerFormat, DecoderConfig, FrameRate, OutputMode, Resolution, VideoCodec,
};

use crate::error::MuxResult;

/// Video track as negotiated.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoTrackConfig {
    pub codec: VideoCodec,
    pub codec_string: String,
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
}

/// Audio track as negotiated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioTrackConfig {
    pub codec: AudioCodec,
    pub codec_string: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u64,
}

/// The set of tracks a muxer is created with.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MuxTracks {
    pub video: Option<VideoTrackConfig>,
    pub audio: Option<AudioTrackConfig>,
}

impl MuxTracks {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// One chunk handed to a container writer, timestamp already normalized.
#[derive(Clone, Copy, Debug)]
pub struct MuxSample<'a> {
    pub data: &'a [u8],
    /// Microseconds from the track start.
    pub timestamp: u64,
    pub duration: Option<u64>,
    pub key_frame: bool,
    pub decoder_config: Option<&'a DecoderConfig>,
}

/// A byte range of streaming output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataChunk {
    pub bytes: Vec<u8>,
    /// Container header / initialization data rather than media data.
    pub is_header: bool,
    /// Position of `bytes` in the complete stream.
    pub byte_offset: u64,
    pub container: ContainerFormat,
}

/// Collects streaming output ranges and tracks the running byte offset.
#[derive(Debug)]
pub struct StreamSink {
    container: ContainerFormat,
    position: u64,
    ready: Vec<DataChunk>,
}

impl StreamSink {
    pub fn new(container: ContainerFormat) -> Self {
        Self {
            container,
            position: 0,
            ready: Vec::new(),
        }
    }

    pub fn emit(&mut self, bytes: Vec<u8>, is_header: bool) {
        if bytes.is_empty() {
            return;
        }
        let byte_offset = self.position;
        self.position += bytes.len() as u64;
        self.ready.push(DataChunk {
            bytes,
            is_header,
            byte_offset,
            container: self.container,
        });
    }

    /// Total bytes emitted so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn drain(&mut self) -> Vec<DataChunk> {
        std::mem::take(&mut self.ready)
    }
}

/// Container-specific muxing strategy.
pub trait ContainerMuxer: Send {
    fn container(&self) -> ContainerFormat;

    fn output_mode(&self) -> OutputMode;

    fn write_video(&mut self, sample: MuxSample<'_>) -> MuxResult<()>;

    fn write_audio(&mut self, sample: MuxSample<'_>) -> MuxResult<()>;

    /// Streaming ranges ready since the last call. Always empty when buffered.
    fn take_ready(&mut self) -> Vec<DataChunk>;

    /// Finish the container. Buffered muxers return the complete file;
    /// streaming muxers push their last ranges to the sink and return `None`.
    fn finalize(&mut self) -> MuxResult<Option<Vec<u8>>>;

    /// Bytes produced so far (buffered: written into the file buffer).
    fn bytes_written(&self) -> u64;
}

/// Stitch streaming ranges back into one byte array by offset.
pub fn assemble(chunks: &[DataChunk]) -> Vec<u8> {
    let len = chunks
        .iter()
        .map(|c| c.byte_offset as usize + c.bytes.len())
        .max()
        .unwrap_or(0);
    let mut out = vec![0u8; len];
    for chunk in chunks {
        let start = chunk.byte_offset as usize;
        out[start..start + chunk.bytes.len()].copy_from_slice(&chunk.bytes);
    }
    out
}
