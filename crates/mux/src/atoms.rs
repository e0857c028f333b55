//! Low-level MP4 atom/box writing primitives.
//!
//! MP4 files are structured as nested boxes (atoms). Each box has:
//! - 4-byte big-endian size (includes header)
//! - 4-byte ASCII type (e.g. "ftyp", "moov", "mdat")
//!
//! "Full boxes" additionally have:
//! - 1-byte version
//! - 3-byte flags
//!
//! Nested boxes are written with [`write_box`] / [`write_full_box`]: the size
//! is reserved up front and patched once the body closure returns.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};

use ek_common::MICROS_PER_SECOND;

use crate::error::{MuxError, MuxResult};

/// Standard video timescale (90kHz, same as MPEG-TS).
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Movie-level timescale (1000 = millisecond precision).
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Seconds between the MP4 epoch (1904-01-01) and the Unix epoch.
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Write a standard box header: 4-byte size + 4-byte type.
pub fn write_box_header<W: Write>(writer: &mut W, box_type: &[u8; 4], size: u32) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    Ok(())
}

/// Write a "full box" header: size + type + 1-byte version + 3-byte flags.
pub fn write_full_box_header<W: Write>(
    writer: &mut W,
    box_type: &[u8; 4],
    size: u32,
    version: u8,
    flags: u32,
) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    write_version_flags(writer, version, flags)
}

pub fn write_version_flags<W: Write>(writer: &mut W, version: u8, flags: u32) -> MuxResult<()> {
    let version_flags = ((version as u32) << 24) | (flags & 0x00FF_FFFF);
    writer.write_u32::<BigEndian>(version_flags)?;
    Ok(())
}

/// Write a box size placeholder (4 bytes of zeros) and return the stream
/// position where the size should be patched later.
pub fn box_size_placeholder<W: Write + Seek>(writer: &mut W) -> MuxResult<u64> {
    let pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    Ok(pos)
}

/// Patch the box size at `size_pos` with the distance to the current position.
pub fn fill_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let current = writer.stream_position()?;
    let size = current - size_pos;
    if size > u32::MAX as u64 {
        return Err(MuxError::BufferFull(format!(
            "Box size {} exceeds 32-bit limit",
            size
        )));
    }
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Write a complete box whose body is produced by `body`.
pub fn write_box<W, F>(writer: &mut W, box_type: &[u8; 4], body: F) -> MuxResult<()>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> MuxResult<()>,
{
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(box_type)?;
    body(writer)?;
    fill_box_size(writer, size_pos)
}

/// Write a complete full box whose body is produced by `body`.
pub fn write_full_box<W, F>(
    writer: &mut W,
    box_type: &[u8; 4],
    version: u8,
    flags: u32,
    body: F,
) -> MuxResult<()>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> MuxResult<()>,
{
    write_box(writer, box_type, |w| {
        write_version_flags(w, version, flags)?;
        body(w)
    })
}

/// Write a placeholder for a 64-bit box header and return the position
/// where the extended size field starts.
pub fn large_box_size_placeholder<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
) -> MuxResult<u64> {
    writer.write_u32::<BigEndian>(1)?; // size=1 signals extended size
    writer.write_all(box_type)?;
    let size_pos = writer.stream_position()?;
    writer.write_u64::<BigEndian>(0)?;
    Ok(size_pos)
}

/// Fill in a 64-bit extended size. `size_pos` points at the 8-byte field
/// written by [`large_box_size_placeholder`].
pub fn fill_large_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let current = writer.stream_position()?;
    let total_size = current - (size_pos - 8);
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u64::<BigEndian>(total_size)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Convert microseconds to ticks of `timescale`.
pub fn micros_to_timescale(micros: u64, timescale: u32) -> u64 {
    ((micros as u128 * timescale as u128 + MICROS_PER_SECOND as u128 / 2)
        / MICROS_PER_SECOND as u128) as u64
}

/// Rescale a tick count from one timescale to another.
pub fn rescale(ticks: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    ((ticks as u128 * to as u128 + from as u128 / 2) / from as u128) as u64
}

/// Write a fixed-point 16.16 number.
pub fn write_fixed_point_16_16<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    let fixed = (value * 65536.0).round() as i32;
    writer.write_i32::<BigEndian>(fixed)?;
    Ok(())
}

/// Write a fixed-point 8.8 number.
pub fn write_fixed_point_8_8<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    let fixed = (value * 256.0).round() as i16;
    writer.write_i16::<BigEndian>(fixed)?;
    Ok(())
}

/// Write the 3x3 unity transformation matrix used by mvhd and tkhd.
pub fn write_unity_matrix<W: Write>(writer: &mut W) -> MuxResult<()> {
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        writer.write_u32::<BigEndian>(value)?;
    }
    Ok(())
}

/// Write zero padding bytes.
pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> MuxResult<()> {
    writer.write_all(&vec![0u8; count])?;
    Ok(())
}

/// ISO 639-2/T language code packed into 3x5 bits. Falls back to "und".
pub fn encode_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_lowercase) {
        return encode_language("und");
    }
    let a = (bytes[0] - 0x60) as u16;
    let b = (bytes[1] - 0x60) as u16;
    let c = (bytes[2] - 0x60) as u16;
    (a << 10) | (b << 5) | c
}

/// Fixed creation time (2024-01-01 UTC as MP4 time) so output is reproducible.
pub fn mp4_creation_time() -> u64 {
    MP4_EPOCH_OFFSET + 1_704_067_200
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_full_box_header() {
        let mut buf = Vec::new();
        write_full_box_header(&mut buf, b"tfhd", 16, 0, 0x020000).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[4..8], b"tfhd");
        assert_eq!(&buf[8..12], &[0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_write_box_patches_size() {
        let mut cursor = Cursor::new(Vec::new());
        write_box(&mut cursor, b"moov", |w| {
            write_full_box(w, b"mvex", 0, 0, |w| write_zeros(w, 4))
        })
        .unwrap();
        let buf = cursor.into_inner();
        // moov(8) + mvex(12 + 4)
        assert_eq!(buf.len(), 24);
        assert_eq!(&buf[0..4], &[0, 0, 0, 24]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 16]);
        assert_eq!(&buf[12..16], b"mvex");
    }

    #[test]
    fn test_large_box_placeholder_and_fill() {
        let mut cursor = Cursor::new(Vec::new());
        let size_pos = large_box_size_placeholder(&mut cursor, b"mdat").unwrap();
        cursor.write_all(&[0xBB; 32]).unwrap();
        fill_large_box_size(&mut cursor, size_pos).unwrap();

        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 48);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x01]);
        let extended_size = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        assert_eq!(extended_size, 48);
    }

    #[test]
    fn test_micros_to_timescale() {
        assert_eq!(micros_to_timescale(1_000_000, VIDEO_TIMESCALE), 90_000);
        assert_eq!(micros_to_timescale(33_333, VIDEO_TIMESCALE), 3_000);
        assert_eq!(micros_to_timescale(21_333, 48_000), 1_024);
        assert_eq!(micros_to_timescale(0, 48_000), 0);
    }

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(90_000, VIDEO_TIMESCALE, MOVIE_TIMESCALE), 1_000);
        assert_eq!(rescale(48_000, 48_000, MOVIE_TIMESCALE), 1_000);
        assert_eq!(rescale(5, 0, MOVIE_TIMESCALE), 0);
    }

    #[test]
    fn test_fixed_point() {
        let mut buf = Vec::new();
        write_fixed_point_16_16(&mut buf, 1.0).unwrap();
        write_fixed_point_8_8(&mut buf, 1.0).unwrap();
        assert_eq!(&buf, &[0x00, 0x01, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_encode_language() {
        assert_eq!(encode_language("und"), 0x55C4);
        assert_eq!(encode_language("eng"), 5575);
        assert_eq!(encode_language("x"), 0x55C4);
    }

    #[test]
    fn test_unity_matrix_length() {
        let mut buf = Vec::new();
        write_unity_matrix(&mut buf).unwrap();
        assert_eq!(buf.len(), 36);
    }
}
