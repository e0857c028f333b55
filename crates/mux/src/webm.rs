//! WebM (Matroska subset) muxer.
//!
//! ```text
//! Buffered:   EBML │ Segment(size patched) { Info(Duration) Tracks Cluster* Cues }
//! Streaming:  EBML │ Segment(unknown size) { Info Tracks } │ Cluster │ Cluster │ ...
//!             └──────────── header ───────────────────┘  └─ one range per cluster
//! ```
//!
//! Timecodes use a 1 ms scale. A cluster is closed when a video key frame
//! arrives (after the cluster already holds video), every second for
//! audio-only output, or when a block's offset from the cluster timecode no
//! longer fits the SimpleBlock's signed 16-bit field.
//!
//! The header waits only for Vorbis, whose CodecPrivate must come from the
//! encoder; Opus and AV1 private data is synthesized. A Vorbis track still
//! silent after [`crate::muxer::HEADER_WAIT_MICROS`] of other media is left
//! out.

use ek_common::{AudioCodec, ContainerFormat, OutputMode, TrackKind, VideoCodec};

use crate::container::{
    AudioTrackConfig, ContainerMuxer, DataChunk, MuxSample, MuxTracks, StreamSink,
    VideoTrackConfig,
};
use crate::ebml::{self, *};
use crate::error::{MuxError, MuxResult};
use crate::mp4::{av1c_from_codec_string, opus_head, parse_opus_head};
use crate::muxer::HEADER_WAIT_MICROS;

/// Nanoseconds per timecode tick.
const TIMECODE_SCALE_NS: u64 = 1_000_000;

/// Audio-only clusters are cut after this many milliseconds.
const AUDIO_CLUSTER_MILLIS: i64 = 1_000;

/// Opus decoders need 80 ms of pre-roll after a seek.
const OPUS_SEEK_PRE_ROLL_NS: u64 = 80_000_000;

const MUXING_APP_NAME: &str = concat!("ek-mux ", env!("CARGO_PKG_VERSION"));

fn micros_to_millis(micros: u64) -> u64 {
    (micros + 500) / 1000
}

#[derive(Debug)]
enum TrackSettings {
    Video {
        codec: VideoCodec,
        codec_string: String,
        width: u32,
        height: u32,
        default_duration_ns: u64,
    },
    Audio {
        codec: AudioCodec,
        sample_rate: u32,
        channels: u16,
    },
}

#[derive(Debug)]
struct WebmTrack {
    number: u64,
    settings: TrackSettings,
    codec_private: Option<Vec<u8>>,
    seen_first: bool,
}

impl WebmTrack {
    fn video(number: u64, config: &VideoTrackConfig) -> Self {
        let fps = if config.frame_rate.is_valid() {
            config.frame_rate.as_f64()
        } else {
            30.0
        };
        Self {
            number,
            settings: TrackSettings::Video {
                codec: config.codec,
                codec_string: config.codec_string.clone(),
                width: config.resolution.width,
                height: config.resolution.height,
                default_duration_ns: (1e9 / fps).round() as u64,
            },
            codec_private: None,
            seen_first: false,
        }
    }

    fn audio(number: u64, config: &AudioTrackConfig) -> Self {
        Self {
            number,
            settings: TrackSettings::Audio {
                codec: config.codec,
                sample_rate: config.sample_rate,
                channels: config.channels,
            },
            codec_private: None,
            seen_first: false,
        }
    }

    /// Vorbis headers cannot be synthesized.
    fn needs_codec_private(&self) -> bool {
        matches!(
            self.settings,
            TrackSettings::Audio {
                codec: AudioCodec::Vorbis,
                ..
            }
        )
    }

    fn header_ready(&self) -> bool {
        self.seen_first || !self.needs_codec_private()
    }

    fn codec_id(&self) -> &'static str {
        match self.settings {
            TrackSettings::Video { codec, .. } => match codec {
                VideoCodec::Vp8 => "V_VP8",
                VideoCodec::Vp9 => "V_VP9",
                VideoCodec::Av1 => "V_AV1",
                VideoCodec::Avc => "V_MPEG4/ISO/AVC",
                VideoCodec::Hevc => "V_MPEGH/ISO/HEVC",
            },
            TrackSettings::Audio { codec, .. } => match codec {
                AudioCodec::Opus => "A_OPUS",
                AudioCodec::Vorbis => "A_VORBIS",
                AudioCodec::Aac => "A_AAC",
            },
        }
    }

    fn apply_decoder_config(&mut self, sample: &MuxSample<'_>) {
        let Some(config) = sample.decoder_config else {
            return;
        };
        if let TrackSettings::Video { codec_string, .. } = &mut self.settings {
            if !config.codec_string.is_empty() {
                *codec_string = config.codec_string.clone();
            }
        }
        if let Some(description) = &config.description {
            if !description.is_empty() {
                self.codec_private = Some(description.clone());
            }
        }
    }

    /// CodecPrivate as written to the header, synthesized where possible.
    fn resolved_codec_private(&self) -> MuxResult<Option<Vec<u8>>> {
        match &self.settings {
            TrackSettings::Video {
                codec: VideoCodec::Av1,
                codec_string,
                ..
            } => Ok(Some(
                self.codec_private
                    .clone()
                    .unwrap_or_else(|| av1c_from_codec_string(codec_string)),
            )),
            TrackSettings::Video { .. } => Ok(self.codec_private.clone()),
            TrackSettings::Audio {
                codec: AudioCodec::Opus,
                sample_rate,
                channels,
            } => {
                let head = self
                    .codec_private
                    .clone()
                    .filter(|d| parse_opus_head(d).is_some())
                    .unwrap_or_else(|| opus_head(*channels, *sample_rate));
                Ok(Some(head))
            }
            TrackSettings::Audio {
                codec: AudioCodec::Vorbis,
                ..
            } => match &self.codec_private {
                Some(headers) => Ok(Some(headers.clone())),
                None => Err(MuxError::InvalidConfig(
                    "Vorbis track has no codec headers".into(),
                )),
            },
            TrackSettings::Audio { .. } => Ok(self.codec_private.clone()),
        }
    }

    fn write_entry(&self, buf: &mut Vec<u8>) -> MuxResult<()> {
        let codec_private = self.resolved_codec_private()?;
        write_master(buf, TRACK_ENTRY, |b| {
            write_uint(b, TRACK_NUMBER, self.number)?;
            write_uint(b, TRACK_UID, self.number)?;
            match &self.settings {
                TrackSettings::Video {
                    width,
                    height,
                    default_duration_ns,
                    ..
                } => {
                    write_uint(b, TRACK_TYPE, TRACK_TYPE_VIDEO)?;
                    write_string(b, CODEC_ID, self.codec_id())?;
                    if let Some(private) = &codec_private {
                        write_binary(b, CODEC_PRIVATE, private)?;
                    }
                    write_uint(b, DEFAULT_DURATION, *default_duration_ns)?;
                    write_master(b, VIDEO, |v| {
                        write_uint(v, PIXEL_WIDTH, *width as u64)?;
                        write_uint(v, PIXEL_HEIGHT, *height as u64)
                    })
                }
                TrackSettings::Audio {
                    codec,
                    sample_rate,
                    channels,
                } => {
                    write_uint(b, TRACK_TYPE, TRACK_TYPE_AUDIO)?;
                    write_string(b, CODEC_ID, self.codec_id())?;
                    if let Some(private) = &codec_private {
                        write_binary(b, CODEC_PRIVATE, private)?;
                    }
                    if *codec == AudioCodec::Opus {
                        let pre_skip = codec_private
                            .as_deref()
                            .and_then(parse_opus_head)
                            .map_or(0, |h| h.pre_skip as u64);
                        write_uint(b, CODEC_DELAY, pre_skip * 1_000_000_000 / 48_000)?;
                        write_uint(b, SEEK_PRE_ROLL, OPUS_SEEK_PRE_ROLL_NS)?;
                    }
                    write_master(b, AUDIO, |a| {
                        write_float(a, SAMPLING_FREQUENCY, *sample_rate as f64)?;
                        write_uint(a, CHANNELS, *channels as u64)
                    })
                }
            }
        })
    }
}

/// A block that arrived before the header could be written.
struct PendingBlock {
    kind: TrackKind,
    timecode: u64,
    key_frame: bool,
    data: Vec<u8>,
}

/// The cluster currently being filled.
struct OpenCluster {
    timecode: u64,
    body: Vec<u8>,
    has_video: bool,
    /// Track of the first key frame in the cluster, used for its cue point.
    cue_track: Option<u64>,
}

struct CuePoint {
    time: u64,
    track: u64,
    cluster_position: u64,
}

/// WebM muxer writing into memory.
pub struct WebmMuxer {
    mode: OutputMode,
    video: Option<WebmTrack>,
    audio: Option<WebmTrack>,
    /// Buffered output: header plus closed clusters.
    file: Vec<u8>,
    segment_size_pos: usize,
    segment_data_start: u64,
    duration_pos: Option<usize>,
    sink: StreamSink,
    header_written: bool,
    /// Tracks left out of the header; their samples are discarded.
    dropped: Vec<TrackKind>,
    pending: Vec<PendingBlock>,
    cluster: Option<OpenCluster>,
    clusters_written: u32,
    cues: Vec<CuePoint>,
    /// End of the latest block, in milliseconds.
    duration_ms: u64,
    finalized: bool,
}

impl WebmMuxer {
    pub fn new(mode: OutputMode, tracks: &MuxTracks) -> MuxResult<Self> {
        if tracks.is_empty() {
            return Err(MuxError::InvalidConfig("WebM output needs at least one track".into()));
        }
        if let Some(video) = &tracks.video {
            if !ContainerFormat::WebM.supports_video(video.codec) {
                return Err(MuxError::CodecMismatch {
                    container: ContainerFormat::WebM,
                    track: TrackKind::Video,
                    codec: video.codec.to_string(),
                });
            }
        }
        if let Some(audio) = &tracks.audio {
            if !ContainerFormat::WebM.supports_audio(audio.codec) {
                return Err(MuxError::CodecMismatch {
                    container: ContainerFormat::WebM,
                    track: TrackKind::Audio,
                    codec: audio.codec.to_string(),
                });
            }
        }

        let mut next_number = 1;
        let video = tracks.video.as_ref().map(|config| {
            let track = WebmTrack::video(next_number, config);
            next_number += 1;
            track
        });
        let audio = tracks
            .audio
            .as_ref()
            .map(|config| WebmTrack::audio(next_number, config));

        tracing::info!(
            ?mode,
            video = ?tracks.video.as_ref().map(|v| v.codec),
            audio = ?tracks.audio.as_ref().map(|a| a.codec),
            "Created WebM muxer"
        );

        Ok(Self {
            mode,
            video,
            audio,
            file: Vec::new(),
            segment_size_pos: 0,
            segment_data_start: 0,
            duration_pos: None,
            sink: StreamSink::new(ContainerFormat::WebM),
            header_written: false,
            dropped: Vec::new(),
            pending: Vec::new(),
            cluster: None,
            clusters_written: 0,
            cues: Vec::new(),
            duration_ms: 0,
            finalized: false,
        })
    }

    fn track_mut(&mut self, kind: TrackKind) -> MuxResult<&mut WebmTrack> {
        let track = match kind {
            TrackKind::Video => self.video.as_mut(),
            TrackKind::Audio => self.audio.as_mut(),
        };
        track.ok_or_else(|| MuxError::TrackError(format!("no {kind} track configured")))
    }

    fn track_number(&self, kind: TrackKind) -> u64 {
        let track = match kind {
            TrackKind::Video => self.video.as_ref(),
            TrackKind::Audio => self.audio.as_ref(),
        };
        track.map_or(0, |t| t.number)
    }

    fn tracks(&self) -> impl Iterator<Item = &WebmTrack> {
        self.video.iter().chain(self.audio.iter())
    }

    fn write_sample(&mut self, kind: TrackKind, sample: MuxSample<'_>) -> MuxResult<()> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }
        if self.dropped.contains(&kind) {
            tracing::trace!(track = %kind, "Block for dropped track discarded");
            return Ok(());
        }
        let track = self.track_mut(kind)?;
        track.apply_decoder_config(&sample);
        track.seen_first = true;

        let timecode = micros_to_millis(sample.timestamp);
        let end = timecode + sample.duration.map_or(0, micros_to_millis);
        self.duration_ms = self.duration_ms.max(end);

        let block = PendingBlock {
            kind,
            timecode,
            key_frame: sample.key_frame || kind == TrackKind::Audio,
            data: sample.data.to_vec(),
        };

        if self.header_written {
            return self.place_block(block);
        }
        self.pending.push(block);
        if self.tracks().all(WebmTrack::header_ready) {
            return self.write_header();
        }
        if self.pending_millis() >= HEADER_WAIT_MICROS / 1_000 {
            self.drop_waiting_tracks();
            return self.write_header();
        }
        Ok(())
    }

    fn pending_millis(&self) -> u64 {
        let first = self.pending.iter().map(|b| b.timecode).min();
        let last = self.pending.iter().map(|b| b.timecode).max();
        match (first, last) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    fn drop_waiting_tracks(&mut self) {
        for kind in [TrackKind::Video, TrackKind::Audio] {
            let slot = match kind {
                TrackKind::Video => &mut self.video,
                TrackKind::Audio => &mut self.audio,
            };
            if slot.as_ref().is_some_and(|t| !t.header_ready()) {
                *slot = None;
                self.dropped.push(kind);
                tracing::warn!(
                    track = %kind,
                    "No codec private data, track left out of the stream"
                );
            }
        }
    }

    /// Write EBML header, Segment start, Info and Tracks, then replay any
    /// blocks held back while waiting for codec data.
    fn write_header(&mut self) -> MuxResult<()> {
        let mut header = Vec::new();
        write_master(&mut header, EBML_HEADER, |b| {
            write_uint(b, EBML_VERSION, 1)?;
            write_uint(b, EBML_READ_VERSION, 1)?;
            write_uint(b, EBML_MAX_ID_LENGTH, 4)?;
            write_uint(b, EBML_MAX_SIZE_LENGTH, 8)?;
            write_string(b, DOC_TYPE, "webm")?;
            write_uint(b, DOC_TYPE_VERSION, 4)?;
            write_uint(b, DOC_TYPE_READ_VERSION, 2)
        })?;

        write_id(&mut header, SEGMENT);
        let segment_size_pos = header.len();
        header.extend_from_slice(&UNKNOWN_SIZE);
        let segment_data_start = header.len();

        let buffered = self.mode == OutputMode::Buffered;
        write_master(&mut header, INFO, |b| {
            write_uint(b, TIMECODE_SCALE, TIMECODE_SCALE_NS)?;
            write_string(b, MUXING_APP, MUXING_APP_NAME)?;
            write_string(b, WRITING_APP, MUXING_APP_NAME)?;
            if buffered {
                // Patched in finalize(); must stay the last child.
                write_float(b, DURATION, 0.0)?;
            }
            Ok(())
        })?;
        let duration_pos = buffered.then(|| header.len() - 8);

        let mut entries = Vec::new();
        for track in self.tracks() {
            track.write_entry(&mut entries)?;
        }
        ebml::write_binary(&mut header, TRACKS, &entries)?;

        tracing::debug!(bytes = header.len(), "WebM header ready");
        match self.mode {
            OutputMode::Buffered => {
                self.file = header;
                self.segment_size_pos = segment_size_pos;
                self.duration_pos = duration_pos;
            }
            OutputMode::Streaming => self.sink.emit(header, true),
        }
        self.segment_data_start = segment_data_start as u64;
        self.header_written = true;

        for block in std::mem::take(&mut self.pending) {
            self.place_block(block)?;
        }
        Ok(())
    }

    fn should_cut(&self, cluster: &OpenCluster, block: &PendingBlock) -> bool {
        let relative = block.timecode as i64 - cluster.timecode as i64;
        if relative > i16::MAX as i64 || relative < i16::MIN as i64 {
            return true;
        }
        match block.kind {
            TrackKind::Video => block.key_frame && cluster.has_video,
            TrackKind::Audio => self.video.is_none() && relative >= AUDIO_CLUSTER_MILLIS,
        }
    }

    fn place_block(&mut self, block: PendingBlock) -> MuxResult<()> {
        let cut = self
            .cluster
            .as_ref()
            .is_some_and(|cluster| self.should_cut(cluster, &block));
        if cut {
            self.close_cluster()?;
        }

        let number = self.track_number(block.kind);
        let cluster = self.cluster.get_or_insert_with(|| OpenCluster {
            timecode: block.timecode,
            body: Vec::new(),
            has_video: false,
            cue_track: None,
        });
        let relative = (block.timecode as i64 - cluster.timecode as i64) as i16;
        let payload = simple_block(number, relative, block.key_frame, &block.data)?;
        ebml::write_binary(&mut cluster.body, SIMPLE_BLOCK, &payload)?;
        if block.kind == TrackKind::Video {
            cluster.has_video = true;
        }
        if block.key_frame {
            // Video key frames take the cue over audio.
            let replace = match cluster.cue_track {
                None => true,
                Some(track) => block.kind == TrackKind::Video && track != number,
            };
            if replace {
                cluster.cue_track = Some(number);
            }
        }
        Ok(())
    }

    fn close_cluster(&mut self) -> MuxResult<()> {
        let Some(open) = self.cluster.take() else {
            return Ok(());
        };
        let mut bytes = Vec::with_capacity(open.body.len() + 16);
        write_master(&mut bytes, CLUSTER, |b| {
            write_uint(b, TIMECODE, open.timecode)?;
            b.extend_from_slice(&open.body);
            Ok(())
        })?;
        self.clusters_written += 1;

        match self.mode {
            OutputMode::Buffered => {
                if let Some(track) = open.cue_track {
                    self.cues.push(CuePoint {
                        time: open.timecode,
                        track,
                        cluster_position: self.file.len() as u64 - self.segment_data_start,
                    });
                }
                self.file.extend_from_slice(&bytes);
            }
            OutputMode::Streaming => {
                tracing::debug!(
                    timecode = open.timecode,
                    bytes = bytes.len(),
                    "WebM cluster flushed"
                );
                self.sink.emit(bytes, false);
            }
        }
        Ok(())
    }

    fn write_cues(&mut self) -> MuxResult<()> {
        if self.cues.is_empty() {
            return Ok(());
        }
        let cues = std::mem::take(&mut self.cues);
        write_master(&mut self.file, CUES, |b| {
            for cue in &cues {
                write_master(b, CUE_POINT, |p| {
                    write_uint(p, CUE_TIME, cue.time)?;
                    write_master(p, CUE_TRACK_POSITIONS, |t| {
                        write_uint(t, CUE_TRACK, cue.track)?;
                        write_uint(t, CUE_CLUSTER_POSITION, cue.cluster_position)
                    })
                })?;
            }
            Ok(())
        })
    }

    /// Number of clusters closed so far.
    pub fn cluster_count(&self) -> u32 {
        self.clusters_written
    }
}

impl ContainerMuxer for WebmMuxer {
    fn container(&self) -> ContainerFormat {
        ContainerFormat::WebM
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

        if !self.header_written {
            if self.tracks().any(|t| t.seen_first) {
                self.drop_waiting_tracks();
            }
            self.write_header()?;
        }
        self.close_cluster()?;

        match self.mode {
            OutputMode::Buffered => {
                self.write_cues()?;
                let segment_size = self.file.len() as u64 - self.segment_data_start;
                patch_size_8(&mut self.file, self.segment_size_pos, segment_size)?;
                if let Some(pos) = self.duration_pos {
                    let duration = (self.duration_ms as f64).to_be_bytes();
                    self.file[pos..pos + 8].copy_from_slice(&duration);
                }
                let bytes = std::mem::take(&mut self.file);
                tracing::info!(
                    clusters = self.clusters_written,
                    duration_ms = self.duration_ms,
                    bytes = bytes.len(),
                    "WebM file finalized"
                );
                Ok(Some(bytes))
            }
            OutputMode::Streaming => {
                tracing::info!(
                    clusters = self.clusters_written,
                    bytes = self.sink.position(),
                    "Live WebM finalized"
                );
                Ok(None)
            }
        }
    }

    fn bytes_written(&self) -> u64 {
        match self.mode {
            OutputMode::Buffered => self.file.len() as u64,
            OutputMode::Streaming => self.sink.position(),
        }
    }
}
