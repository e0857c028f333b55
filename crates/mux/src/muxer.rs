//! High-level MP4 muxer.
//!
//! Two layouts, chosen by [`OutputMode`]:
//!
//! ```text
//! Buffered:   ftyp │ mdat (64-bit, grows) ......................│ moov
//! Streaming:  ftyp+moov(mvex) │ moof mdat │ moof mdat │ ...
//!             └── header ───┘ └─ cut at video key frames, or every 1 s
//!                                for audio-only output ─┘
//! ```
//!
//! In streaming mode the init segment goes out as soon as every AVC/HEVC
//! track has delivered the encoder's decoder-config record; all other sample
//! entries are synthesized from the track config. A track still without its
//! record after [`HEADER_WAIT_MICROS`] of other media is left out of the
//! stream.

use std::io::{Cursor, Write};

use ek_common::{ContainerFormat, OutputMode, TrackKind, VideoCodec, MICROS_PER_SECOND};

use crate::atoms::{self, micros_to_timescale, VIDEO_TIMESCALE};
use crate::container::{
    AudioTrackConfig, ContainerMuxer, DataChunk, MuxSample, MuxTracks, StreamSink,
    VideoTrackConfig,
};
use crate::error::{MuxError, MuxResult};
use crate::mp4::{self, FragmentSample, SampleInfo, TrackHandler, TrackInfo, TrackRun};

/// Audio-only fragments are cut after this much media.
const AUDIO_FRAGMENT_MICROS: u64 = 1_000_000;

/// Media buffered ahead of the init segment before a track that has not
/// delivered its decoder config is given up on.
pub const HEADER_WAIT_MICROS: u64 = 1_000_000;

/// A sample waiting for the next fragment.
struct PendingSample {
    data: Vec<u8>,
    duration: u32,
    is_sync: bool,
}

/// Internal track state during muxing.
struct TrackState {
    track_id: u32,
    timescale: u32,
    handler: TrackHandler,
    /// Progressive sample table.
    samples: Vec<SampleInfo>,
    /// Fragmented: samples since the last flushed fragment.
    pending: Vec<PendingSample>,
    /// Decode time of `pending[0]`.
    pending_start: u64,
    last_pts: Option<u64>,
    /// Whether the last sample's duration is an estimate to fix up.
    last_duration_estimated: bool,
    default_duration: u32,
    seen_first: bool,
}

impl TrackState {
    fn video(track_id: u32, config: &VideoTrackConfig) -> Self {
        let fps = if config.frame_rate.is_valid() {
            config.frame_rate.as_f64()
        } else {
            30.0
        };
        Self::new(
            track_id,
            VIDEO_TIMESCALE,
            (VIDEO_TIMESCALE as f64 / fps).round() as u32,
            TrackHandler::Video {
                codec: config.codec,
                codec_string: config.codec_string.clone(),
                width: config.resolution.width,
                height: config.resolution.height,
                description: None,
            },
        )
    }

    fn audio(track_id: u32, config: &AudioTrackConfig) -> Self {
        Self::new(
            track_id,
            config.sample_rate,
            config.codec.frame_size(),
            TrackHandler::Audio {
                codec: config.codec,
                sample_rate: config.sample_rate,
                channels: config.channels,
                bitrate: config.bitrate,
                description: None,
            },
        )
    }

    fn new(track_id: u32, timescale: u32, default_duration: u32, handler: TrackHandler) -> Self {
        Self {
            track_id,
            timescale,
            handler,
            samples: Vec::new(),
            pending: Vec::new(),
            pending_start: 0,
            last_pts: None,
            last_duration_estimated: false,
            default_duration: default_duration.max(1),
            seen_first: false,
        }
    }

    /// AVC and HEVC sample entries cannot be synthesized.
    fn needs_description(&self) -> bool {
        matches!(
            self.handler,
            TrackHandler::Video {
                codec: VideoCodec::Avc | VideoCodec::Hevc,
                ..
            }
        )
    }

    fn include_in_header(&self) -> bool {
        self.seen_first || !self.needs_description()
    }

    fn apply_decoder_config(&mut self, sample: &MuxSample<'_>) {
        let Some(config) = sample.decoder_config else {
            return;
        };
        match &mut self.handler {
            TrackHandler::Video {
                codec_string,
                description,
                ..
            } => {
                if !config.codec_string.is_empty() {
                    *codec_string = config.codec_string.clone();
                }
                if config.description.is_some() {
                    *description = config.description.clone();
                }
            }
            TrackHandler::Audio { description, .. } => {
                if config.description.is_some() {
                    *description = config.description.clone();
                }
            }
        }
    }

    /// Fix the previous sample's estimated duration now that `pts` is known,
    /// and return the duration to record for the new sample.
    fn next_duration(&mut self, pts: u64, explicit: Option<u32>) -> u32 {
        if let Some(prev) = self.last_pts {
            let gap = pts.saturating_sub(prev) as u32;
            if self.last_duration_estimated && gap > 0 {
                if let Some(s) = self.pending.last_mut() {
                    s.duration = gap;
                } else if let Some(s) = self.samples.last_mut() {
                    s.duration = gap;
                }
            }
        }
        self.last_pts = Some(pts);
        self.last_duration_estimated = explicit.is_none();
        explicit.filter(|d| *d > 0).unwrap_or(self.default_duration)
    }

    fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    fn pending_span(&self, pts: u64) -> u64 {
        pts.saturating_sub(self.pending_start)
    }

    /// Media held in `pending`, in microseconds.
    fn pending_micros(&self) -> u64 {
        let ticks: u64 = self.pending.iter().map(|p| p.duration as u64).sum();
        (ticks as u128 * MICROS_PER_SECOND as u128 / self.timescale.max(1) as u128) as u64
    }

    fn info(&self) -> TrackInfo<'_> {
        TrackInfo {
            track_id: self.track_id,
            timescale: self.timescale,
            duration: self.total_duration(),
            handler: &self.handler,
            samples: &self.samples,
            default_duration: self.default_duration,
        }
    }

    fn take_run(&mut self) -> Option<TrackRun> {
        if self.pending.is_empty() {
            return None;
        }
        let samples: Vec<FragmentSample> = self
            .pending
            .drain(..)
            .map(|p| FragmentSample {
                data: p.data,
                duration: p.duration,
                is_sync: p.is_sync,
            })
            .collect();
        let base_decode_time = self.pending_start;
        self.pending_start += samples.iter().map(|s| s.duration as u64).sum::<u64>();
        Some(TrackRun {
            track_id: self.track_id,
            base_decode_time,
            samples,
        })
    }
}

/// MP4 muxer writing into memory.
pub struct Mp4Muxer {
    mode: OutputMode,
    video: Option<TrackState>,
    audio: Option<TrackState>,
    /// Progressive file buffer (ftyp + open mdat).
    file: Cursor<Vec<u8>>,
    /// Position of the mdat extended size field.
    mdat_size_pos: u64,
    sink: StreamSink,
    header_written: bool,
    /// Tracks left out of the init segment; their samples are discarded.
    dropped: Vec<TrackKind>,
    sequence_number: u32,
    finalized: bool,
}

impl Mp4Muxer {
    pub fn new(mode: OutputMode, tracks: &MuxTracks) -> MuxResult<Self> {
        if tracks.is_empty() {
            return Err(MuxError::InvalidConfig("MP4 output needs at least one track".into()));
        }
        if let Some(video) = &tracks.video {
            if !ContainerFormat::Mp4.supports_video(video.codec) {
                return Err(MuxError::CodecMismatch {
                    container: ContainerFormat::Mp4,
                    track: TrackKind::Video,
                    codec: video.codec.to_string(),
                });
            }
        }
        if let Some(audio) = &tracks.audio {
            if !ContainerFormat::Mp4.supports_audio(audio.codec) {
                return Err(MuxError::CodecMismatch {
                    container: ContainerFormat::Mp4,
                    track: TrackKind::Audio,
                    codec: audio.codec.to_string(),
                });
            }
        }

        let mut next_id = 1;
        let video = tracks.video.as_ref().map(|config| {
            let track = TrackState::video(next_id, config);
            next_id += 1;
            track
        });
        let audio = tracks
            .audio
            .as_ref()
            .map(|config| TrackState::audio(next_id, config));

        let mut file = Cursor::new(Vec::new());
        let mut mdat_size_pos = 0;
        if mode == OutputMode::Buffered {
            mp4::write_ftyp(&mut file, false)?;
            // The final size is unknown and may exceed 4GB; patched in finalize().
            mdat_size_pos = atoms::large_box_size_placeholder(&mut file, b"mdat")?;
        }

        tracing::info!(
            ?mode,
            video = ?tracks.video.as_ref().map(|v| v.codec),
            audio = ?tracks.audio.as_ref().map(|a| a.codec),
            "Created MP4 muxer"
        );

        Ok(Self {
            mode,
            video,
            audio,
            file,
            mdat_size_pos,
            sink: StreamSink::new(ContainerFormat::Mp4),
            header_written: false,
            dropped: Vec::new(),
            sequence_number: 0,
            finalized: false,
        })
    }

    fn track_mut(&mut self, kind: TrackKind) -> MuxResult<&mut TrackState> {
        let track = match kind {
            TrackKind::Video => self.video.as_mut(),
            TrackKind::Audio => self.audio.as_mut(),
        };
        track.ok_or_else(|| MuxError::TrackError(format!("no {kind} track configured")))
    }

    fn write_sample(&mut self, kind: TrackKind, sample: MuxSample<'_>) -> MuxResult<()> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }
        if self.dropped.contains(&kind) {
            tracing::trace!(track = %kind, "Sample for dropped track discarded");
            return Ok(());
        }
        let size = u32::try_from(sample.data.len())
            .map_err(|_| MuxError::BufferFull(format!("{kind} sample exceeds 4GB")))?;

        match self.mode {
            OutputMode::Buffered => {
                let offset = self.file.position();
                let track = self.track_mut(kind)?;
                track.apply_decoder_config(&sample);
                track.seen_first = true;
                let pts = micros_to_timescale(sample.timestamp, track.timescale);
                let explicit = sample
                    .duration
                    .map(|d| micros_to_timescale(d, track.timescale) as u32);
                let duration = track.next_duration(pts, explicit);
                track.samples.push(SampleInfo {
                    offset,
                    size,
                    duration,
                    is_sync: sample.key_frame || kind == TrackKind::Audio,
                });
                self.file.write_all(sample.data)?;
            }
            OutputMode::Streaming => {
                let audio_only = self.video.is_none();
                let track = self.track_mut(kind)?;
                track.apply_decoder_config(&sample);
                let pts = micros_to_timescale(sample.timestamp, track.timescale);
                let explicit = sample
                    .duration
                    .map(|d| micros_to_timescale(d, track.timescale) as u32);
                let duration = track.next_duration(pts, explicit);
                let first = !track.seen_first;
                track.seen_first = true;
                if first {
                    track.pending_start = pts;
                }

                let cut = match kind {
                    TrackKind::Video => sample.key_frame,
                    TrackKind::Audio => {
                        audio_only
                            && track.pending_span(pts)
                                >= micros_to_timescale(AUDIO_FRAGMENT_MICROS, track.timescale)
                    }
                };
                if cut {
                    self.flush_fragment()?;
                }

                let track = self.track_mut(kind)?;
                if track.pending.is_empty() {
                    track.pending_start = pts;
                }
                track.pending.push(PendingSample {
                    data: sample.data.to_vec(),
                    duration,
                    is_sync: sample.key_frame || kind == TrackKind::Audio,
                });
                self.maybe_write_header()?;
            }
        }
        Ok(())
    }

    fn tracks(&self) -> impl Iterator<Item = &TrackState> {
        self.video.iter().chain(self.audio.iter())
    }

    fn header_tracks(&self) -> Vec<TrackInfo<'_>> {
        self.tracks()
            .filter(|t| t.include_in_header())
            .map(TrackState::info)
            .collect()
    }

    /// Emit ftyp + moov once every track has its sample entry data.
    fn maybe_write_header(&mut self) -> MuxResult<()> {
        if self.header_written {
            return Ok(());
        }
        if self.tracks().all(TrackState::include_in_header) {
            return self.write_init_segment();
        }
        let buffered = self
            .tracks()
            .map(TrackState::pending_micros)
            .max()
            .unwrap_or(0);
        if buffered >= HEADER_WAIT_MICROS {
            self.drop_waiting_tracks();
            return self.write_init_segment();
        }
        Ok(())
    }

    fn drop_waiting_tracks(&mut self) {
        for kind in [TrackKind::Video, TrackKind::Audio] {
            let slot = match kind {
                TrackKind::Video => &mut self.video,
                TrackKind::Audio => &mut self.audio,
            };
            if slot.as_ref().is_some_and(|t| !t.include_in_header()) {
                *slot = None;
                self.dropped.push(kind);
                tracing::warn!(
                    track = %kind,
                    waited_us = HEADER_WAIT_MICROS,
                    "No decoder config, track left out of the stream"
                );
            }
        }
    }

    fn write_init_segment(&mut self) -> MuxResult<()> {
        let mut init = Cursor::new(Vec::new());
        mp4::write_ftyp(&mut init, true)?;
        mp4::write_moov(&mut init, &self.header_tracks(), true)?;
        let bytes = init.into_inner();
        tracing::debug!(bytes = bytes.len(), "MP4 init segment ready");
        self.sink.emit(bytes, true);
        self.header_written = true;
        Ok(())
    }

    /// Write everything pending as one moof + mdat. Held back until the
    /// init segment is out.
    fn flush_fragment(&mut self) -> MuxResult<()> {
        if !self.header_written {
            return Ok(());
        }
        let runs: Vec<TrackRun> = [self.video.as_mut(), self.audio.as_mut()]
            .into_iter()
            .flatten()
            .filter_map(TrackState::take_run)
            .collect();
        if runs.is_empty() {
            return Ok(());
        }
        self.sequence_number += 1;
        let bytes = mp4::write_fragment(self.sequence_number, &runs)?;
        tracing::debug!(
            sequence = self.sequence_number,
            bytes = bytes.len(),
            samples = runs.iter().map(|r| r.samples.len()).sum::<usize>(),
            "MP4 fragment flushed"
        );
        self.sink.emit(bytes, false);
        Ok(())
    }

    /// Number of samples muxed into a track so far.
    pub fn track_sample_count(&self, kind: TrackKind) -> usize {
        let track = match kind {
            TrackKind::Video => self.video.as_ref(),
            TrackKind::Audio => self.audio.as_ref(),
        };
        track.map_or(0, |t| t.samples.len() + t.pending.len())
    }
}

impl ContainerMuxer for Mp4Muxer {
    fn container(&self) -> ContainerFormat {
        ContainerFormat::Mp4
    }

    fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn write_video(&mut self, sample: MuxSample<'_>) -> MuxResult<()> {
        self.write_sample(TrackKind::Video, sample)
    }

    fn write_audio(&mut self, sample: MuxSample<'_>) -> MuxResult<()> {
        self.write_sample(TrackKind::Audio, sample)
    }

    fn take_ready(&mut self) -> Vec<DataChunk> {
        self.sink.drain()
    }

    fn finalize(&mut self) -> MuxResult<Option<Vec<u8>>> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }
        self.finalized = true;

        match self.mode {
            OutputMode::Buffered => {
                atoms::fill_large_box_size(&mut self.file, self.mdat_size_pos)?;
                let (moov, track_count) = {
                    let tracks = self.header_tracks();
                    let mut moov = Cursor::new(Vec::new());
                    mp4::write_moov(&mut moov, &tracks, false)?;
                    (moov.into_inner(), tracks.len())
                };
                self.file.write_all(&moov)?;
                let bytes = std::mem::take(self.file.get_mut());
                tracing::info!(
                    tracks = track_count,
                    bytes = bytes.len(),
                    "MP4 file finalized"
                );
                Ok(Some(bytes))
            }
            OutputMode::Streaming => {
                if !self.header_written {
                    self.write_init_segment()?;
                }
                self.flush_fragment()?;
                tracing::info!(
                    fragments = self.sequence_number,
                    bytes = self.sink.position(),
                    "Fragmented MP4 finalized"
                );
                Ok(None)
            }
        }
    }

    fn bytes_written(&self) -> u64 {
        match self.mode {
            OutputMode::Buffered => self.file.get_ref().len() as u64,
            OutputMode::Streaming => self.sink.position(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::assemble;
    use ek_common::{AudioCodec, DecoderConfig, FrameRate, Resolution};

    /// Minimal avcC record (Baseline, level 3.0) with one SPS and one PPS.
    fn test_avcc() -> Vec<u8> {
        vec![
            0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00,
            0x04, 0x68, 0xCE, 0x38, 0x80,
        ]
    }

    fn avc_config() -> DecoderConfig {
        DecoderConfig {
            codec_string: "avc1.42C01E".into(),
            description: Some(test_avcc()),
        }
    }

    fn test_tracks(video: bool, audio: bool) -> MuxTracks {
        MuxTracks {
            video: video.then(|| VideoTrackConfig {
                codec: VideoCodec::Avc,
                codec_string: "avc1.42E01E".into(),
                resolution: Resolution::VGA,
                frame_rate: FrameRate(30.0),
            }),
            audio: audio.then(|| AudioTrackConfig {
                codec: AudioCodec::Aac,
                codec_string: "mp4a.40.2".into(),
                sample_rate: 48_000,
                channels: 2,
                bitrate: 128_000,
            }),
        }
    }

    fn video_sample<'a>(
        data: &'a [u8],
        index: u64,
        config: Option<&'a DecoderConfig>,
    ) -> MuxSample<'a> {
        MuxSample {
            data,
            timestamp: index * 33_333,
            duration: Some(33_333),
            key_frame: index % 30 == 0,
            decoder_config: config,
        }
    }

    fn audio_sample(data: &[u8], index: u64) -> MuxSample<'_> {
        MuxSample {
            data,
            timestamp: index * 21_333,
            duration: Some(21_333),
            key_frame: true,
            decoder_config: None,
        }
    }

    fn top_level_boxes(buf: &[u8]) -> Vec<[u8; 4]> {
        let mut boxes = Vec::new();
        let mut offset = 0;
        while offset + 8 <= buf.len() {
            let size = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap()) as u64;
            let mut kind = [0u8; 4];
            kind.copy_from_slice(&buf[offset + 4..offset + 8]);
            boxes.push(kind);
            let size = if size == 1 {
                u64::from_be_bytes(buf[offset + 8..offset + 16].try_into().unwrap())
            } else {
                size
            };
            if size == 0 {
                break;
            }
            offset += size as usize;
        }
        boxes
    }

    #[test]
    fn test_buffered_layout_is_ftyp_mdat_moov() {
        let mut muxer = Mp4Muxer::new(OutputMode::Buffered, &test_tracks(true, true)).unwrap();
        let config = avc_config();
        let frame = [0u8, 0, 0, 4, 0x65, 0xAA, 0xBB, 0xCC];
        let aac = [0x21u8; 64];
        for i in 0..30 {
            let cfg = (i == 0).then_some(&config);
            muxer.write_video(video_sample(&frame, i, cfg)).unwrap();
            muxer.write_audio(audio_sample(&aac, i)).unwrap();
        }
        assert!(muxer.take_ready().is_empty());
        let file = muxer.finalize().unwrap().unwrap();

        assert_eq!(top_level_boxes(&file), vec![*b"ftyp", *b"mdat", *b"moov"]);
        for needle in [b"avcC", b"esds", b"vide", b"soun", b"stts", b"stco"] {
            assert!(file.windows(4).any(|w| w == needle));
        }
        assert_eq!(muxer.track_sample_count(TrackKind::Video), 30);
    }

    #[test]
    fn test_streaming_emits_header_then_fragments() {
        let mut muxer = Mp4Muxer::new(OutputMode::Streaming, &test_tracks(true, false)).unwrap();
        let config = avc_config();
        let frame = [0u8; 32];
        for i in 0..65 {
            let cfg = (i == 0).then_some(&config);
            muxer.write_video(video_sample(&frame, i, cfg)).unwrap();
        }
        let mut chunks = muxer.take_ready();
        assert!(muxer.finalize().unwrap().is_none());
        chunks.extend(muxer.take_ready());

        assert!(chunks[0].is_header);
        assert!(chunks[1..].iter().all(|c| !c.is_header));
        // key frames at 0, 30, 60 → three fragments
        assert_eq!(chunks.len(), 4);

        let stream = assemble(&chunks);
        assert_eq!(
            top_level_boxes(&stream),
            vec![*b"ftyp", *b"moov", *b"moof", *b"mdat", *b"moof", *b"mdat", *b"moof", *b"mdat"]
        );
    }

    #[test]
    fn test_streaming_header_does_not_wait_for_synthesized_tracks() {
        let mut muxer = Mp4Muxer::new(OutputMode::Streaming, &test_tracks(true, true)).unwrap();
        let config = avc_config();
        let frame = [0u8; 16];
        muxer.write_video(video_sample(&frame, 0, Some(&config))).unwrap();
        let ready = muxer.take_ready();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].is_header);
        assert_eq!(ready[0].byte_offset, 0);
        // AAC entry built from the track config
        assert!(ready[0].bytes.windows(4).any(|w| w == b"esds"));

        // video-only media flows at the next key frame
        for i in 1..31 {
            muxer.write_video(video_sample(&frame, i, None)).unwrap();
        }
        let ready = muxer.take_ready();
        assert_eq!(ready.len(), 1);
        assert!(!ready[0].is_header);
        assert_eq!(&ready[0].bytes[4..8], b"moof");
    }

    #[test]
    fn test_streaming_header_waits_for_avc_config() {
        let mut muxer = Mp4Muxer::new(OutputMode::Streaming, &test_tracks(true, true)).unwrap();
        muxer.write_audio(audio_sample(&[1u8; 8], 0)).unwrap();
        assert!(muxer.take_ready().is_empty());

        let config = avc_config();
        muxer.write_video(video_sample(&[0u8; 16], 0, Some(&config))).unwrap();
        let ready = muxer.take_ready();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].is_header);
        assert!(ready[0].bytes.windows(4).any(|w| w == b"avcC"));
    }

    #[test]
    fn test_streaming_gives_up_on_silent_avc_track() {
        let mut muxer = Mp4Muxer::new(OutputMode::Streaming, &test_tracks(true, true)).unwrap();
        let aac = [0x21u8; 16];
        // 21.333 ms frames: the 47th crosses one second of buffered audio
        for i in 0..47 {
            muxer.write_audio(audio_sample(&aac, i)).unwrap();
        }
        let ready = muxer.take_ready();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].is_header);
        assert!(!ready[0].bytes.windows(4).any(|w| w == b"avcC"));
        assert!(ready[0].bytes.windows(4).any(|w| w == b"esds"));

        // late video is discarded; audio fragments every second
        let config = avc_config();
        muxer.write_video(video_sample(&[0u8; 16], 0, Some(&config))).unwrap();
        for i in 47..100 {
            muxer.write_audio(audio_sample(&aac, i)).unwrap();
        }
        muxer.finalize().unwrap();
        let chunks = muxer.take_ready();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| !c.is_header));
        assert_eq!(muxer.track_sample_count(TrackKind::Video), 0);
    }

    #[test]
    fn test_audio_only_fragments_every_second() {
        let mut muxer = Mp4Muxer::new(OutputMode::Streaming, &test_tracks(false, true)).unwrap();
        let aac = [0x21u8; 16];
        // 100 frames of 21.333ms ≈ 2.13 s
        for i in 0..100 {
            muxer.write_audio(audio_sample(&aac, i)).unwrap();
        }
        muxer.finalize().unwrap();
        let chunks = muxer.take_ready();
        let fragments = chunks.iter().filter(|c| !c.is_header).count();
        assert_eq!(fragments, 3);
    }

    #[test]
    fn test_rejects_codec_the_container_cannot_carry() {
        let mut tracks = test_tracks(true, false);
        if let Some(video) = tracks.video.as_mut() {
            video.codec = VideoCodec::Vp8;
        }
        let err = Mp4Muxer::new(OutputMode::Buffered, &tracks).err().unwrap();
        assert!(matches!(err, MuxError::CodecMismatch { .. }));
    }

    #[test]
    fn test_write_to_missing_track() {
        let mut muxer = Mp4Muxer::new(OutputMode::Buffered, &test_tracks(true, false)).unwrap();
        let err = muxer.write_audio(audio_sample(&[0u8; 4], 0)).unwrap_err();
        assert!(matches!(err, MuxError::TrackError(_)));
    }

    #[test]
    fn test_double_finalize_fails() {
        let mut muxer = Mp4Muxer::new(OutputMode::Buffered, &test_tracks(false, true)).unwrap();
        muxer.write_audio(audio_sample(&[0u8; 4], 0)).unwrap();
        muxer.finalize().unwrap();
        assert!(matches!(muxer.finalize(), Err(MuxError::AlreadyFinalized)));
        assert!(matches!(
            muxer.write_audio(audio_sample(&[0u8; 4], 1)),
            Err(MuxError::AlreadyFinalized)
        ));
    }

    #[test]
    fn test_estimated_durations_are_fixed_up() {
        let mut muxer = Mp4Muxer::new(OutputMode::Buffered, &test_tracks(false, true)).unwrap();
        for ts in [0u64, 20_000, 40_000] {
            muxer
                .write_audio(MuxSample {
                    data: &[0u8; 4],
                    timestamp: ts,
                    duration: None,
                    key_frame: true,
                    decoder_config: None,
                })
                .unwrap();
        }
        let track = muxer.audio.as_ref().unwrap();
        // 20ms at 48 kHz
        assert_eq!(track.samples[0].duration, 960);
        assert_eq!(track.samples[1].duration, 960);
        // last one keeps the codec frame size estimate
        assert_eq!(track.samples[2].duration, 1024);
    }
}
