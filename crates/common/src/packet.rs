//! Encoded chunks: output of a track encoder, input to the muxer.

use crate::types::TrackKind;

/// Codec-specific setup data sent along with the first chunk of a track
/// (and again whenever it changes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Concrete codec string, e.g. `avc1.64001F` or `opus`.
    pub codec_string: String,
    /// avcC / hvcC / av1C record, AudioSpecificConfig or OpusHead.
    pub description: Option<Vec<u8>>,
}

/// One compressed unit.
#[derive(Clone, Debug)]
pub struct EncodedChunk {
    pub track: TrackKind,
    /// Bitstream bytes. AVC/HEVC use 4-byte length-prefixed NAL units.
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub timestamp: i64,
    /// Duration in microseconds.
    pub duration: Option<u64>,
    pub key_frame: bool,
    pub decoder_config: Option<DecoderConfig>,
}

impl EncodedChunk {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
