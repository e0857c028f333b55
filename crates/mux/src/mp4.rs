//! MP4 box (atom) writers for ISO Base Media File Format (ISO 14496-12).
//!
//! This module writes the structural boxes of both MP4 flavours:
//!
//! - progressive: `ftyp`, `mdat`, then `moov` with full sample tables
//! - fragmented: `ftyp` + `moov` (empty sample tables, `mvex`/`trex`), then
//!   `moof` + `mdat` pairs (ISO 14496-12 §8.8)
//!
//! Sample entries are built from the decoder-config description bytes the
//! encoder attached to its first chunk. Records that encoders do not emit
//! (`vpcC`, and `av1C`/AudioSpecificConfig when missing) are synthesized
//! from the codec string and track parameters.

use byteorder::{BigEndian, WriteBytesExt};
use ek_common::{AudioCodec, VideoCodec};
use std::io::{Cursor, Seek, Write};

use crate::atoms::{
    encode_language, mp4_creation_time, rescale, write_box, write_box_header, write_full_box,
    write_full_box_header, write_unity_matrix, write_zeros, MOVIE_TIMESCALE,
};
use crate::error::{MuxError, MuxResult};

// ---------------------------------------------------------------------------
// Track description
// ---------------------------------------------------------------------------

/// Information about a single sample (frame) in a progressive track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleInfo {
    /// Absolute byte offset of the sample in the file.
    pub offset: u64,
    pub size: u32,
    /// Duration in track timescale units.
    pub duration: u32,
    /// Whether this is a sync sample (key frame).
    pub is_sync: bool,
}

/// Track media handler type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackHandler {
    Video {
        codec: VideoCodec,
        codec_string: String,
        width: u32,
        height: u32,
        /// avcC / hvcC / av1C record body.
        description: Option<Vec<u8>>,
    },
    Audio {
        codec: AudioCodec,
        sample_rate: u32,
        channels: u16,
        bitrate: u64,
        /// AudioSpecificConfig (AAC) or OpusHead (Opus).
        description: Option<Vec<u8>>,
    },
}

impl TrackHandler {
    fn handler_type(&self) -> &'static [u8; 4] {
        match self {
            Self::Video { .. } => b"vide",
            Self::Audio { .. } => b"soun",
        }
    }

    fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }
}

/// Describes a track to be written into the moov box.
#[derive(Clone, Copy, Debug)]
pub struct TrackInfo<'a> {
    /// 1-based track ID.
    pub track_id: u32,
    pub timescale: u32,
    /// Total duration in track timescale units.
    pub duration: u64,
    pub handler: &'a TrackHandler,
    /// Empty for fragmented output.
    pub samples: &'a [SampleInfo],
    /// Default sample duration advertised in `trex`.
    pub default_duration: u32,
}

// ---------------------------------------------------------------------------
// ftyp / moov
// ---------------------------------------------------------------------------

/// Write the ftyp (File Type) box.
pub fn write_ftyp<W: Write>(writer: &mut W, fragmented: bool) -> MuxResult<()> {
    let (major, brands): (&[u8; 4], [&[u8; 4]; 4]) = if fragmented {
        (b"iso5", [b"iso5", b"iso6", b"dash", b"mp41"])
    } else {
        (b"isom", [b"isom", b"iso2", b"iso6", b"mp41"])
    };
    let size = 8 + 4 + 4 + 4 * brands.len() as u32;
    write_box_header(writer, b"ftyp", size)?;
    writer.write_all(major)?;
    writer.write_u32::<BigEndian>(0x200)?; // minor version
    for brand in brands {
        writer.write_all(brand)?;
    }
    Ok(())
}

/// Write the mvhd (Movie Header) box. `duration` is in movie timescale units.
pub fn write_mvhd<W: Write + Seek>(
    writer: &mut W,
    duration: u64,
    next_track_id: u32,
) -> MuxResult<()> {
    let creation_time = mp4_creation_time();
    write_full_box(writer, b"mvhd", 1, 0, |w| {
        w.write_u64::<BigEndian>(creation_time)?;
        w.write_u64::<BigEndian>(creation_time)?;
        w.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
        w.write_u64::<BigEndian>(duration)?;
        w.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
        w.write_u16::<BigEndian>(0x0100)?; // volume 1.0
        write_zeros(w, 10)?;
        write_unity_matrix(w)?;
        write_zeros(w, 24)?; // pre_defined
        w.write_u32::<BigEndian>(next_track_id)?;
        Ok(())
    })
}

/// Write the tkhd (Track Header) box. `duration` is in movie timescale units.
pub fn write_tkhd<W: Write + Seek>(
    writer: &mut W,
    track_id: u32,
    duration: u64,
    handler: &TrackHandler,
) -> MuxResult<()> {
    let creation_time = mp4_creation_time();
    let (width, height, volume) = match handler {
        TrackHandler::Video { width, height, .. } => (*width, *height, 0u16),
        TrackHandler::Audio { .. } => (0, 0, 0x0100),
    };
    // flags: track_enabled | track_in_movie
    write_full_box(writer, b"tkhd", 1, 0x000003, |w| {
        w.write_u64::<BigEndian>(creation_time)?;
        w.write_u64::<BigEndian>(creation_time)?;
        w.write_u32::<BigEndian>(track_id)?;
        write_zeros(w, 4)?;
        w.write_u64::<BigEndian>(duration)?;
        write_zeros(w, 8)?;
        w.write_i16::<BigEndian>(0)?; // layer
        w.write_i16::<BigEndian>(0)?; // alternate_group
        w.write_u16::<BigEndian>(volume)?;
        write_zeros(w, 2)?;
        write_unity_matrix(w)?;
        w.write_u32::<BigEndian>(width << 16)?;
        w.write_u32::<BigEndian>(height << 16)?;
        Ok(())
    })
}

/// Write the mdhd (Media Header) box.
pub fn write_mdhd<W: Write + Seek>(writer: &mut W, timescale: u32, duration: u64) -> MuxResult<()> {
    let creation_time = mp4_creation_time();
    write_full_box(writer, b"mdhd", 1, 0, |w| {
        w.write_u64::<BigEndian>(creation_time)?;
        w.write_u64::<BigEndian>(creation_time)?;
        w.write_u32::<BigEndian>(timescale)?;
        w.write_u64::<BigEndian>(duration)?;
        w.write_u16::<BigEndian>(encode_language("und"))?;
        w.write_u16::<BigEndian>(0)?;
        Ok(())
    })
}

/// Write the hdlr (Handler Reference) box.
pub fn write_hdlr<W: Write + Seek>(writer: &mut W, handler_type: &[u8; 4]) -> MuxResult<()> {
    let name: &[u8] = match handler_type {
        b"vide" => b"VideoHandler\0",
        b"soun" => b"SoundHandler\0",
        _ => b"DataHandler\0",
    };
    write_full_box(writer, b"hdlr", 0, 0, |w| {
        write_zeros(w, 4)?; // pre_defined
        w.write_all(handler_type)?;
        write_zeros(w, 12)?;
        w.write_all(name)?;
        Ok(())
    })
}

/// Write the complete moov (Movie) box. Fragmented output adds `mvex`.
pub fn write_moov<W: Write + Seek>(
    writer: &mut W,
    tracks: &[TrackInfo<'_>],
    fragmented: bool,
) -> MuxResult<()> {
    let movie_duration = tracks
        .iter()
        .map(|t| rescale(t.duration, t.timescale, MOVIE_TIMESCALE))
        .max()
        .unwrap_or(0);
    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;

    write_box(writer, b"moov", |w| {
        write_mvhd(w, movie_duration, next_track_id)?;
        for track in tracks {
            write_trak(w, track)?;
        }
        if fragmented {
            write_mvex(w, tracks)?;
        }
        Ok(())
    })
}

fn write_trak<W: Write + Seek>(writer: &mut W, track: &TrackInfo<'_>) -> MuxResult<()> {
    write_box(writer, b"trak", |w| {
        let duration = rescale(track.duration, track.timescale, MOVIE_TIMESCALE);
        write_tkhd(w, track.track_id, duration, track.handler)?;
        write_box(w, b"mdia", |w| {
            write_mdhd(w, track.timescale, track.duration)?;
            write_hdlr(w, track.handler.handler_type())?;
            write_minf(w, track)
        })
    })
}

fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackInfo<'_>) -> MuxResult<()> {
    write_box(writer, b"minf", |w| {
        match track.handler {
            TrackHandler::Video { .. } => {
                write_full_box_header(w, b"vmhd", 20, 0, 0x000001)?;
                write_zeros(w, 8)?; // graphicsmode + opcolor
            }
            TrackHandler::Audio { .. } => {
                write_full_box_header(w, b"smhd", 16, 0, 0)?;
                write_zeros(w, 4)?; // balance + reserved
            }
        }
        write_box(w, b"dinf", |w| {
            write_full_box(w, b"dref", 0, 0, |w| {
                w.write_u32::<BigEndian>(1)?;
                // self-contained data reference
                write_full_box_header(w, b"url ", 12, 0, 0x000001)
            })
        })?;
        write_stbl(w, track.samples, track.handler)
    })
}

fn write_mvex<W: Write + Seek>(writer: &mut W, tracks: &[TrackInfo<'_>]) -> MuxResult<()> {
    write_box(writer, b"mvex", |w| {
        for track in tracks {
            write_full_box(w, b"trex", 0, 0, |w| {
                w.write_u32::<BigEndian>(track.track_id)?;
                w.write_u32::<BigEndian>(1)?; // sample description index
                w.write_u32::<BigEndian>(track.default_duration)?;
                w.write_u32::<BigEndian>(0)?; // default size
                w.write_u32::<BigEndian>(0)?; // default flags
                Ok(())
            })?;
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Sample tables
// ---------------------------------------------------------------------------

/// Write the stbl (Sample Table) box.
pub fn write_stbl<W: Write + Seek>(
    writer: &mut W,
    samples: &[SampleInfo],
    handler: &TrackHandler,
) -> MuxResult<()> {
    write_box(writer, b"stbl", |w| {
        write_stsd(w, handler)?;
        write_stts(w, samples)?;
        write_stsc(w, samples)?;
        write_stsz(w, samples)?;
        if samples.iter().any(|s| s.offset > u32::MAX as u64) {
            write_co64(w, samples)?;
        } else {
            write_stco(w, samples)?;
        }
        // No stss means every sample is a sync sample, which is also the
        // right reading for empty fragmented tables.
        if handler.is_video() && !samples.is_empty() && !samples.iter().all(|s| s.is_sync) {
            write_stss(w, samples)?;
        }
        Ok(())
    })
}

/// Run-length encode sample durations: Vec<(count, duration)>.
fn run_length_encode_durations(samples: &[SampleInfo]) -> Vec<(u32, u32)> {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for sample in samples {
        match entries.last_mut() {
            Some((count, duration)) if *duration == sample.duration => *count += 1,
            _ => entries.push((1, sample.duration)),
        }
    }
    entries
}

fn write_stts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let entries = run_length_encode_durations(samples);
    write_full_box(writer, b"stts", 0, 0, |w| {
        w.write_u32::<BigEndian>(entries.len() as u32)?;
        for (count, duration) in &entries {
            w.write_u32::<BigEndian>(*count)?;
            w.write_u32::<BigEndian>(*duration)?;
        }
        Ok(())
    })
}

/// One sample per chunk.
fn write_stsc<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    write_full_box(writer, b"stsc", 0, 0, |w| {
        if samples.is_empty() {
            w.write_u32::<BigEndian>(0)?;
        } else {
            w.write_u32::<BigEndian>(1)?; // entry_count
            w.write_u32::<BigEndian>(1)?; // first_chunk
            w.write_u32::<BigEndian>(1)?; // samples_per_chunk
            w.write_u32::<BigEndian>(1)?; // sample_description_index
        }
        Ok(())
    })
}

fn write_stsz<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    write_full_box(writer, b"stsz", 0, 0, |w| {
        let uniform = samples
            .first()
            .filter(|first| samples.iter().all(|s| s.size == first.size))
            .map(|first| first.size);
        match uniform {
            Some(size) => {
                w.write_u32::<BigEndian>(size)?;
                w.write_u32::<BigEndian>(samples.len() as u32)?;
            }
            None => {
                w.write_u32::<BigEndian>(0)?;
                w.write_u32::<BigEndian>(samples.len() as u32)?;
                for sample in samples {
                    w.write_u32::<BigEndian>(sample.size)?;
                }
            }
        }
        Ok(())
    })
}

fn write_stco<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    write_full_box(writer, b"stco", 0, 0, |w| {
        w.write_u32::<BigEndian>(samples.len() as u32)?;
        for sample in samples {
            w.write_u32::<BigEndian>(sample.offset as u32)?;
        }
        Ok(())
    })
}

fn write_co64<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    write_full_box(writer, b"co64", 0, 0, |w| {
        w.write_u32::<BigEndian>(samples.len() as u32)?;
        for sample in samples {
            w.write_u64::<BigEndian>(sample.offset)?;
        }
        Ok(())
    })
}

/// Sync sample numbers are 1-based.
fn write_stss<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let sync: Vec<u32> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_sync)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    write_full_box(writer, b"stss", 0, 0, |w| {
        w.write_u32::<BigEndian>(sync.len() as u32)?;
        for n in sync {
            w.write_u32::<BigEndian>(n)?;
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Sample entries
// ---------------------------------------------------------------------------

fn write_stsd<W: Write + Seek>(writer: &mut W, handler: &TrackHandler) -> MuxResult<()> {
    write_full_box(writer, b"stsd", 0, 0, |w| {
        w.write_u32::<BigEndian>(1)?; // entry_count
        match handler {
            TrackHandler::Video {
                codec,
                codec_string,
                width,
                height,
                description,
            } => write_visual_sample_entry(
                w,
                *codec,
                codec_string,
                *width,
                *height,
                description.as_deref(),
            ),
            TrackHandler::Audio {
                codec,
                sample_rate,
                channels,
                bitrate,
                description,
            } => write_audio_sample_entry(
                w,
                *codec,
                *sample_rate,
                *channels,
                *bitrate,
                description.as_deref(),
            ),
        }
    })
}

fn write_visual_sample_entry<W: Write + Seek>(
    writer: &mut W,
    codec: VideoCodec,
    codec_string: &str,
    width: u32,
    height: u32,
    description: Option<&[u8]>,
) -> MuxResult<()> {
    let entry_type: &[u8; 4] = match codec {
        VideoCodec::Avc => b"avc1",
        VideoCodec::Hevc => b"hvc1",
        VideoCodec::Vp9 => b"vp09",
        VideoCodec::Av1 => b"av01",
        VideoCodec::Vp8 => {
            return Err(MuxError::InvalidConfig(
                "VP8 has no MP4 sample entry".into(),
            ))
        }
    };
    write_box(writer, entry_type, |w| {
        write_zeros(w, 6)?; // reserved
        w.write_u16::<BigEndian>(1)?; // data_reference_index
        write_zeros(w, 16)?; // pre_defined + reserved
        w.write_u16::<BigEndian>(width as u16)?;
        w.write_u16::<BigEndian>(height as u16)?;
        w.write_u32::<BigEndian>(0x0048_0000)?; // 72 dpi
        w.write_u32::<BigEndian>(0x0048_0000)?;
        write_zeros(w, 4)?;
        w.write_u16::<BigEndian>(1)?; // frame_count
        write_zeros(w, 32)?; // compressorname
        w.write_u16::<BigEndian>(0x0018)?; // depth
        w.write_i16::<BigEndian>(-1)?;

        match codec {
            VideoCodec::Avc => {
                let record = required_description(description, "avcC")?;
                write_box(w, b"avcC", |w| Ok(w.write_all(record)?))
            }
            VideoCodec::Hevc => {
                let record = required_description(description, "hvcC")?;
                write_box(w, b"hvcC", |w| Ok(w.write_all(record)?))
            }
            VideoCodec::Vp9 => write_vpcc(w, codec_string),
            VideoCodec::Av1 => {
                let record = match description {
                    Some(d) if !d.is_empty() => d.to_vec(),
                    _ => av1c_from_codec_string(codec_string),
                };
                write_box(w, b"av1C", |w| Ok(w.write_all(&record)?))
            }
            VideoCodec::Vp8 => Ok(()),
        }
    })
}

fn required_description<'a>(description: Option<&'a [u8]>, record: &str) -> MuxResult<&'a [u8]> {
    match description {
        Some(d) if !d.is_empty() => Ok(d),
        _ => Err(MuxError::InvalidConfig(format!(
            "missing {record} decoder configuration"
        ))),
    }
}

/// VP Codec Configuration box (version 1), 8-bit 4:2:0 BT.709.
fn write_vpcc<W: Write + Seek>(writer: &mut W, codec_string: &str) -> MuxResult<()> {
    let fields = codec_string_fields(codec_string);
    let profile = fields.first().copied().unwrap_or(0) as u8;
    let level = fields.get(1).copied().unwrap_or(31) as u8;
    let bit_depth = fields.get(2).copied().unwrap_or(8) as u8;
    write_full_box(writer, b"vpcC", 1, 0, |w| {
        w.write_u8(profile)?;
        w.write_u8(level)?;
        // bitDepth(4) | chromaSubsampling(3) = 4:2:0 colocated | videoFullRangeFlag(1)
        w.write_u8((bit_depth << 4) | (1 << 1))?;
        w.write_u8(1)?; // colour_primaries
        w.write_u8(1)?; // transfer_characteristics
        w.write_u8(1)?; // matrix_coefficients
        w.write_u16::<BigEndian>(0)?; // codecInitializationDataSize
        Ok(())
    })
}

/// Numeric fields after the four-character prefix of a codec string:
/// `vp09.00.31.08` → `[0, 31, 8]`, `av01.0.08M.08` → `[0, 8, 8]`.
fn codec_string_fields(codec_string: &str) -> Vec<u32> {
    codec_string
        .split('.')
        .skip(1)
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

/// Minimal AV1CodecConfigurationRecord for an 8-bit 4:2:0 stream.
pub fn av1c_from_codec_string(codec_string: &str) -> Vec<u8> {
    let fields = codec_string_fields(codec_string);
    let profile = fields.first().copied().unwrap_or(0) as u8 & 0x07;
    let level = fields.get(1).copied().unwrap_or(8) as u8 & 0x1F;
    vec![
        0x81, // marker | version 1
        (profile << 5) | level,
        0x0C, // chroma_subsampling_x | chroma_subsampling_y
        0x00, // no initial_presentation_delay
    ]
}

fn write_audio_sample_entry<W: Write + Seek>(
    writer: &mut W,
    codec: AudioCodec,
    sample_rate: u32,
    channels: u16,
    bitrate: u64,
    description: Option<&[u8]>,
) -> MuxResult<()> {
    let entry_type: &[u8; 4] = match codec {
        AudioCodec::Aac => b"mp4a",
        AudioCodec::Opus => b"Opus",
        AudioCodec::Vorbis => {
            return Err(MuxError::InvalidConfig(
                "Vorbis has no MP4 sample entry".into(),
            ))
        }
    };
    write_box(writer, entry_type, |w| {
        write_zeros(w, 6)?;
        w.write_u16::<BigEndian>(1)?; // data_reference_index
        write_zeros(w, 8)?;
        w.write_u16::<BigEndian>(channels)?;
        w.write_u16::<BigEndian>(16)?; // samplesize
        write_zeros(w, 4)?;
        // 16.16 fixed point; rates above 65535 do not fit and are written as 0
        let rate_field = if sample_rate <= u16::MAX as u32 {
            sample_rate << 16
        } else {
            0
        };
        w.write_u32::<BigEndian>(rate_field)?;

        match codec {
            AudioCodec::Aac => {
                let asc = match description {
                    Some(d) if !d.is_empty() => d.to_vec(),
                    _ => aac_audio_specific_config(sample_rate, channels),
                };
                write_esds(w, &asc, bitrate)
            }
            AudioCodec::Opus => {
                let head = description.and_then(parse_opus_head).unwrap_or(OpusHead {
                    channels: channels as u8,
                    pre_skip: 312,
                    input_sample_rate: sample_rate,
                    output_gain: 0,
                });
                write_dops(w, &head)
            }
            AudioCodec::Vorbis => Ok(()),
        }
    })
}

/// Elementary Stream Descriptor wrapping an AudioSpecificConfig.
fn write_esds<W: Write + Seek>(writer: &mut W, asc: &[u8], bitrate: u64) -> MuxResult<()> {
    let bitrate = bitrate.min(u32::MAX as u64) as u32;
    write_full_box(writer, b"esds", 0, 0, |w| {
        let dec_specific_len = asc.len();
        let dec_config_len = 13 + 1 + descr_length_size(dec_specific_len) + dec_specific_len;
        let sl_config_len = 1;
        let es_len = 3
            + 1
            + descr_length_size(dec_config_len)
            + dec_config_len
            + 1
            + descr_length_size(sl_config_len)
            + sl_config_len;

        w.write_u8(0x03)?; // ES_DescrTag
        write_descr_length(w, es_len)?;
        w.write_u16::<BigEndian>(1)?; // ES_ID
        w.write_u8(0)?; // flags

        w.write_u8(0x04)?; // DecoderConfigDescrTag
        write_descr_length(w, dec_config_len)?;
        w.write_u8(0x40)?; // Audio ISO/IEC 14496-3
        w.write_u8(0x15)?; // audio stream
        write_zeros(w, 3)?; // bufferSizeDB
        w.write_u32::<BigEndian>(bitrate)?; // maxBitrate
        w.write_u32::<BigEndian>(bitrate)?; // avgBitrate

        w.write_u8(0x05)?; // DecoderSpecificInfoTag
        write_descr_length(w, dec_specific_len)?;
        w.write_all(asc)?;

        w.write_u8(0x06)?; // SLConfigDescrTag
        write_descr_length(w, sl_config_len)?;
        w.write_u8(0x02)?;
        Ok(())
    })
}

fn descr_length_size(len: usize) -> usize {
    match len {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    }
}

/// MPEG-4 descriptor length in expandable form (1-4 bytes).
fn write_descr_length<W: Write>(writer: &mut W, len: usize) -> MuxResult<()> {
    let n = descr_length_size(len);
    for i in (0..n).rev() {
        let byte = ((len >> (7 * i)) & 0x7F) as u8;
        writer.write_u8(if i > 0 { byte | 0x80 } else { byte })?;
    }
    Ok(())
}

const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Two-byte AudioSpecificConfig for AAC-LC.
pub fn aac_audio_specific_config(sample_rate: u32, channels: u16) -> Vec<u8> {
    let freq_index = AAC_SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(3) as u16;
    let object_type = 2u16; // AAC-LC
    let channel_config = channels.min(7);
    let packed = (object_type << 11) | (freq_index << 7) | (channel_config << 3);
    packed.to_be_bytes().to_vec()
}

/// Fields of an `OpusHead` identification header that `dOps` carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpusHead {
    pub channels: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
}

/// Build an `OpusHead` identification header (RFC 7845 §5.1, mapping family 0).
pub fn opus_head(channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(channels as u8);
    head.extend_from_slice(&312u16.to_le_bytes());
    head.extend_from_slice(&sample_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(0); // mapping family
    head
}

/// Parse an `OpusHead` (little-endian) identification header.
pub fn parse_opus_head(bytes: &[u8]) -> Option<OpusHead> {
    if bytes.len() < 19 || &bytes[..8] != b"OpusHead" {
        return None;
    }
    Some(OpusHead {
        channels: bytes[9],
        pre_skip: u16::from_le_bytes([bytes[10], bytes[11]]),
        input_sample_rate: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        output_gain: i16::from_le_bytes([bytes[16], bytes[17]]),
    })
}

/// Opus Specific box (big-endian, unlike OpusHead).
fn write_dops<W: Write + Seek>(writer: &mut W, head: &OpusHead) -> MuxResult<()> {
    write_box(writer, b"dOps", |w| {
        w.write_u8(0)?; // version
        w.write_u8(head.channels)?;
        w.write_u16::<BigEndian>(head.pre_skip)?;
        w.write_u32::<BigEndian>(head.input_sample_rate)?;
        w.write_i16::<BigEndian>(head.output_gain)?;
        w.write_u8(0)?; // ChannelMappingFamily
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

/// One sample inside a fragment.
#[derive(Clone, Debug)]
pub struct FragmentSample {
    pub data: Vec<u8>,
    pub duration: u32,
    pub is_sync: bool,
}

/// The samples of one track inside a fragment.
#[derive(Clone, Debug)]
pub struct TrackRun {
    pub track_id: u32,
    /// Decode time of the first sample, in track timescale units.
    pub base_decode_time: u64,
    pub samples: Vec<FragmentSample>,
}

const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000; // depends_on = 2 (independent)
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000; // depends_on = 1, non-sync

/// Write one `moof` + `mdat` pair and return its bytes.
pub fn write_fragment(sequence_number: u32, runs: &[TrackRun]) -> MuxResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut data_offset_positions = Vec::with_capacity(runs.len());

    write_box(&mut cursor, b"moof", |w| {
        write_full_box(w, b"mfhd", 0, 0, |w| {
            w.write_u32::<BigEndian>(sequence_number)?;
            Ok(())
        })?;
        for run in runs {
            write_box(w, b"traf", |w| {
                // default-base-is-moof
                write_full_box(w, b"tfhd", 0, 0x020000, |w| {
                    w.write_u32::<BigEndian>(run.track_id)?;
                    Ok(())
                })?;
                write_full_box(w, b"tfdt", 1, 0, |w| {
                    w.write_u64::<BigEndian>(run.base_decode_time)?;
                    Ok(())
                })?;
                // data-offset | sample-duration | sample-size | sample-flags
                write_full_box(w, b"trun", 0, 0x000701, |w| {
                    w.write_u32::<BigEndian>(run.samples.len() as u32)?;
                    data_offset_positions.push(w.stream_position()?);
                    w.write_i32::<BigEndian>(0)?; // patched below
                    for sample in &run.samples {
                        w.write_u32::<BigEndian>(sample.duration)?;
                        w.write_u32::<BigEndian>(sample.data.len() as u32)?;
                        w.write_u32::<BigEndian>(if sample.is_sync {
                            SAMPLE_FLAGS_SYNC
                        } else {
                            SAMPLE_FLAGS_NON_SYNC
                        })?;
                    }
                    Ok(())
                })
            })?;
        }
        Ok(())
    })?;

    let moof_size = cursor.position();
    let payload: u64 = runs
        .iter()
        .flat_map(|r| r.samples.iter())
        .map(|s| s.data.len() as u64)
        .sum();
    let mdat_size = 8 + payload;
    if mdat_size > u32::MAX as u64 {
        return Err(MuxError::BufferFull(format!(
            "fragment payload {} exceeds 32-bit mdat",
            payload
        )));
    }

    // trun data offsets are relative to the start of moof.
    let mut offset = moof_size + 8;
    for (run, pos) in runs.iter().zip(&data_offset_positions) {
        cursor.set_position(*pos);
        cursor.write_i32::<BigEndian>(offset as i32)?;
        offset += run.samples.iter().map(|s| s.data.len() as u64).sum::<u64>();
    }
    cursor.set_position(moof_size);

    write_box_header(&mut cursor, b"mdat", mdat_size as u32)?;
    for run in runs {
        for sample in &run.samples {
            cursor.write_all(&sample.data)?;
        }
    }
    Ok(cursor.into_inner())
}
