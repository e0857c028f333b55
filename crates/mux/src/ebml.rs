//! EBML (Extensible Binary Meta Language) writer and WebM element IDs.
//!
//! All integers in EBML are big-endian. Element sizes use the leading-1
//! variable-size integer encoding:
//! - 1 byte:  `1xxx xxxx`                (7 data bits)
//! - 2 bytes: `01xx xxxx xxxx xxxx`       (14 data bits)
//! - ...
//! - 8 bytes: `0000 0001 ...`             (56 data bits)
//!
//! Element IDs keep their marker bit, so the raw bytes form the ID directly.

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{MuxError, MuxResult};

// ─── EBML Header ─────────────────────────────────────────────────────

pub const EBML_HEADER: u32 = 0x1A45DFA3;
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_VERSION: u32 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// ─── Segment ─────────────────────────────────────────────────────────

pub const SEGMENT: u32 = 0x18538067;

// ─── Segment Information ─────────────────────────────────────────────

pub const INFO: u32 = 0x1549A966;
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
pub const DURATION: u32 = 0x4489;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;

// ─── Tracks ──────────────────────────────────────────────────────────

pub const TRACKS: u32 = 0x1654AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63A2;
pub const DEFAULT_DURATION: u32 = 0x23E383;
pub const CODEC_DELAY: u32 = 0x56AA;
pub const SEEK_PRE_ROLL: u32 = 0x56BB;
pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const AUDIO: u32 = 0xE1;
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
pub const CHANNELS: u32 = 0x9F;

/// TrackType values.
pub const TRACK_TYPE_VIDEO: u64 = 1;
pub const TRACK_TYPE_AUDIO: u64 = 2;

// ─── Cluster ─────────────────────────────────────────────────────────

pub const CLUSTER: u32 = 0x1F43B675;
pub const TIMECODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;

// ─── Cueing Data ─────────────────────────────────────────────────────

pub const CUES: u32 = 0x1C53BB6B;
pub const CUE_POINT: u32 = 0xBB;
pub const CUE_TIME: u32 = 0xB3;
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const CUE_TRACK: u32 = 0xF7;
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;

/// 8-byte "unknown size" marker used for live Segments.
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Largest value an 8-byte size can carry (all-ones is reserved for unknown).
const MAX_SIZE_8: u64 = (1 << 56) - 2;

/// Write an element ID (1-4 bytes, marker bit included).
pub fn write_id(buf: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Width in bytes of the shortest size encoding for `size`.
pub fn size_width(size: u64) -> usize {
    // All-ones at a width means "unknown", so each width holds one less.
    (1..=8)
        .find(|&w| size < (1u64 << (7 * w)) - 1)
        .unwrap_or(8)
}

/// Write a data size with the shortest encoding.
pub fn write_size(buf: &mut Vec<u8>, size: u64) -> MuxResult<()> {
    write_size_fixed(buf, size, size_width(size))
}

/// Write a data size using exactly `width` bytes.
pub fn write_size_fixed(buf: &mut Vec<u8>, size: u64, width: usize) -> MuxResult<()> {
    if !(1..=8).contains(&width) || size > MAX_SIZE_8 || size >= (1u64 << (7 * width)) - 1 {
        return Err(MuxError::BufferFull(format!(
            "EBML size {size} does not fit in {width} bytes"
        )));
    }
    let marked = size | (1u64 << (7 * width));
    let bytes = marked.to_be_bytes();
    buf.extend_from_slice(&bytes[8 - width..]);
    Ok(())
}

/// Overwrite an 8-byte size field at `pos` in place.
pub fn patch_size_8(buf: &mut [u8], pos: usize, size: u64) -> MuxResult<()> {
    let mut field = Vec::with_capacity(8);
    write_size_fixed(&mut field, size, 8)?;
    buf[pos..pos + 8].copy_from_slice(&field);
    Ok(())
}

/// Write an element with a raw binary payload.
pub fn write_binary(buf: &mut Vec<u8>, id: u32, data: &[u8]) -> MuxResult<()> {
    write_id(buf, id);
    write_size(buf, data.len() as u64)?;
    buf.extend_from_slice(data);
    Ok(())
}

/// Write an unsigned integer element using the fewest bytes.
pub fn write_uint(buf: &mut Vec<u8>, id: u32, value: u64) -> MuxResult<()> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    write_binary(buf, id, &bytes[skip..])
}

/// Write an 8-byte float element.
pub fn write_float(buf: &mut Vec<u8>, id: u32, value: f64) -> MuxResult<()> {
    write_id(buf, id);
    write_size(buf, 8)?;
    buf.write_f64::<BigEndian>(value)?;
    Ok(())
}

pub fn write_string(buf: &mut Vec<u8>, id: u32, value: &str) -> MuxResult<()> {
    write_binary(buf, id, value.as_bytes())
}

/// Write a master element whose children are produced by `body`.
pub fn write_master<F>(buf: &mut Vec<u8>, id: u32, body: F) -> MuxResult<()>
where
    F: FnOnce(&mut Vec<u8>) -> MuxResult<()>,
{
    let mut children = Vec::new();
    body(&mut children)?;
    write_binary(buf, id, &children)
}

/// Encode a SimpleBlock payload: track number, signed relative timecode,
/// flags, frame data. No lacing.
pub fn simple_block(
    track_number: u64,
    relative_timecode: i16,
    key_frame: bool,
    data: &[u8],
) -> MuxResult<Vec<u8>> {
    let mut block = Vec::with_capacity(data.len() + 4);
    write_size(&mut block, track_number)?;
    block.write_i16::<BigEndian>(relative_timecode)?;
    block.push(if key_frame { 0x80 } else { 0x00 });
    block.extend_from_slice(data);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_id_lengths() {
        let mut buf = Vec::new();
        write_id(&mut buf, SIMPLE_BLOCK);
        write_id(&mut buf, EBML_VERSION);
        write_id(&mut buf, TIMECODE_SCALE);
        write_id(&mut buf, SEGMENT);
        assert_eq!(
            buf,
            vec![0xA3, 0x42, 0x86, 0x2A, 0xD7, 0xB1, 0x18, 0x53, 0x80, 0x67]
        );
    }

    #[test]
    fn test_size_encoding() {
        let mut buf = Vec::new();
        write_size(&mut buf, 5).unwrap();
        assert_eq!(buf, vec![0x85]);

        // 127 is all-ones in one byte (unknown), so it needs two bytes.
        let mut buf = Vec::new();
        write_size(&mut buf, 127).unwrap();
        assert_eq!(buf, vec![0x40, 0x7F]);

        let mut buf = Vec::new();
        write_size_fixed(&mut buf, 300, 8).unwrap();
        assert_eq!(buf, vec![0x01, 0, 0, 0, 0, 0, 0x01, 0x2C]);
    }

    #[test]
    fn test_size_overflow() {
        let mut buf = Vec::new();
        assert!(write_size_fixed(&mut buf, 200, 1).is_err());
    }

    #[test]
    fn test_write_uint_minimal() {
        let mut buf = Vec::new();
        write_uint(&mut buf, TRACK_NUMBER, 1).unwrap();
        assert_eq!(buf, vec![0xD7, 0x81, 0x01]);

        let mut buf = Vec::new();
        write_uint(&mut buf, TIMECODE, 0).unwrap();
        assert_eq!(buf, vec![0xE7, 0x81, 0x00]);

        let mut buf = Vec::new();
        write_uint(&mut buf, TIMECODE_SCALE, 1_000_000).unwrap();
        assert_eq!(buf, vec![0x2A, 0xD7, 0xB1, 0x83, 0x0F, 0x42, 0x40]);
    }

    #[test]
    fn test_master_wraps_children() {
        let mut buf = Vec::new();
        write_master(&mut buf, VIDEO, |b| {
            write_uint(b, PIXEL_WIDTH, 640)?;
            write_uint(b, PIXEL_HEIGHT, 480)
        })
        .unwrap();
        assert_eq!(buf[0], 0xE0);
        assert_eq!(buf[1], 0x80 | 8);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_simple_block_layout() {
        let block = simple_block(2, -5, true, &[0xAB, 0xCD]).unwrap();
        assert_eq!(block, vec![0x82, 0xFF, 0xFB, 0x80, 0xAB, 0xCD]);
    }

    #[test]
    fn test_patch_size_8() {
        let mut buf = UNKNOWN_SIZE.to_vec();
        patch_size_8(&mut buf, 0, 42).unwrap();
        assert_eq!(buf, vec![0x01, 0, 0, 0, 0, 0, 0, 42]);
    }
}
