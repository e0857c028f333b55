//! One muxing interface over the MP4 and WebM writers.
//!
//! The adapter picks the container writer from the resolved config, rejects
//! codec/container mismatches before any chunk arrives, and rebases each
//! track's timestamps so the timeline starts at zero.

use ek_common::{
    ContainerFormat, EncodedChunk, EncoderConfig, FirstTimestampBehavior, OutputMode, TrackKind,
};

use crate::container::{ContainerMuxer, DataChunk, MuxSample, MuxTracks};
use crate::error::{MuxError, MuxResult};
use crate::muxer::Mp4Muxer;
use crate::webm::WebmMuxer;

/// Per-track first-timestamp bookkeeping.
#[derive(Clone, Copy, Debug)]
struct TimestampBase {
    behavior: FirstTimestampBehavior,
    first: Option<i64>,
}

impl TimestampBase {
    fn new(behavior: FirstTimestampBehavior) -> Self {
        Self {
            behavior,
            first: None,
        }
    }

    fn normalize(&mut self, track: TrackKind, timestamp: i64) -> MuxResult<u64> {
        let base = match self.first {
            Some(base) => base,
            None => {
                let base = match self.behavior {
                    FirstTimestampBehavior::Offset => timestamp,
                    FirstTimestampBehavior::Strict if timestamp != 0 => {
                        return Err(MuxError::NonZeroFirstTimestamp { track, timestamp });
                    }
                    FirstTimestampBehavior::Strict => 0,
                };
                self.first = Some(base);
                base
            }
        };
        let rebased = timestamp - base;
        u64::try_from(rebased).map_err(|_| MuxError::NegativeTimestamp {
            track,
            timestamp: rebased,
        })
    }
}

/// Muxer Adapter: `add_video_chunk` / `add_audio_chunk` / `finalize` over
/// whichever container the config selects.
pub struct MuxerAdapter {
    inner: Box<dyn ContainerMuxer>,
    video_base: TimestampBase,
    audio_base: TimestampBase,
    video_chunks: u64,
    audio_chunks: u64,
}

impl MuxerAdapter {
    pub fn new(config: &EncoderConfig, tracks: &MuxTracks) -> MuxResult<Self> {
        let mode = config.output_mode();
        let inner: Box<dyn ContainerMuxer> = match config.container {
            ContainerFormat::Mp4 => Box::new(Mp4Muxer::new(mode, tracks)?),
            ContainerFormat::WebM => Box::new(WebmMuxer::new(mode, tracks)?),
        };
        Ok(Self {
            inner,
            video_base: TimestampBase::new(config.first_timestamp_behavior),
            audio_base: TimestampBase::new(config.first_timestamp_behavior),
            video_chunks: 0,
            audio_chunks: 0,
        })
    }

    pub fn container(&self) -> ContainerFormat {
        self.inner.container()
    }

    pub fn output_mode(&self) -> OutputMode {
        self.inner.output_mode()
    }

    pub fn add_video_chunk(&mut self, chunk: &EncodedChunk) -> MuxResult<()> {
        let timestamp = self.video_base.normalize(TrackKind::Video, chunk.timestamp)?;
        self.inner.write_video(sample_of(chunk, timestamp))?;
        self.video_chunks += 1;
        Ok(())
    }

    pub fn add_audio_chunk(&mut self, chunk: &EncodedChunk) -> MuxResult<()> {
        let timestamp = self.audio_base.normalize(TrackKind::Audio, chunk.timestamp)?;
        self.inner.write_audio(sample_of(chunk, timestamp))?;
        self.audio_chunks += 1;
        Ok(())
    }

    /// Route a chunk by its track.
    pub fn add_chunk(&mut self, chunk: &EncodedChunk) -> MuxResult<()> {
        match chunk.track {
            TrackKind::Video => self.add_video_chunk(chunk),
            TrackKind::Audio => self.add_audio_chunk(chunk),
        }
    }

    /// Streaming ranges ready for delivery, in stream order.
    pub fn take_data_chunks(&mut self) -> Vec<DataChunk> {
        self.inner.take_ready()
    }

    /// Buffered: the complete file. Streaming: `None`, remaining ranges are
    /// left for [`take_data_chunks`](Self::take_data_chunks).
    pub fn finalize(&mut self) -> MuxResult<Option<Vec<u8>>> {
        let output = self.inner.finalize()?;
        tracing::debug!(
            container = %self.inner.container(),
            video_chunks = self.video_chunks,
            audio_chunks = self.audio_chunks,
            "Muxer finalized"
        );
        Ok(output)
    }

    pub fn bytes_muxed(&self) -> u64 {
        self.inner.bytes_written()
    }

    pub fn chunk_count(&self, track: TrackKind) -> u64 {
        match track {
            TrackKind::Video => self.video_chunks,
            TrackKind::Audio => self.audio_chunks,
        }
    }
}

fn sample_of(chunk: &EncodedChunk, timestamp: u64) -> MuxSample<'_> {
    MuxSample {
        data: &chunk.data,
        timestamp,
        duration: chunk.duration,
        key_frame: chunk.key_frame,
        decoder_config: chunk.decoder_config.as_ref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{AudioTrackConfig, VideoTrackConfig};
    use ek_common::{AudioCodec, DecoderConfig, FrameRate, LatencyMode, Resolution, VideoCodec};

    fn webm_config(latency_mode: LatencyMode, behavior: FirstTimestampBehavior) -> EncoderConfig {
        EncoderConfig {
            container: ContainerFormat::WebM,
            latency_mode,
            first_timestamp_behavior: behavior,
            ..EncoderConfig::default()
        }
    }

    fn webm_tracks() -> MuxTracks {
        MuxTracks {
            video: Some(VideoTrackConfig {
                codec: VideoCodec::Vp9,
                codec_string: "vp09.00.30.08".into(),
                resolution: Resolution::VGA,
                frame_rate: FrameRate(30.0),
            }),
            audio: Some(AudioTrackConfig {
                codec: AudioCodec::Opus,
                codec_string: "opus".into(),
                sample_rate: 48_000,
                channels: 2,
                bitrate: 128_000,
            }),
        }
    }

    fn chunk(track: TrackKind, timestamp: i64, key_frame: bool) -> EncodedChunk {
        EncodedChunk {
            track,
            data: vec![0xAA; 12],
            timestamp,
            duration: Some(20_000),
            key_frame,
            decoder_config: None,
        }
    }

    #[test]
    fn offset_rebases_each_track() {
        let mut base = TimestampBase::new(FirstTimestampBehavior::Offset);
        assert_eq!(base.normalize(TrackKind::Video, 5_000_000).unwrap(), 0);
        assert_eq!(base.normalize(TrackKind::Video, 5_033_333).unwrap(), 33_333);
        let err = base.normalize(TrackKind::Video, 4_000_000).unwrap_err();
        assert!(matches!(err, MuxError::NegativeTimestamp { .. }));
    }

    #[test]
    fn strict_rejects_non_zero_start() {
        let mut base = TimestampBase::new(FirstTimestampBehavior::Strict);
        let err = base.normalize(TrackKind::Audio, 10).unwrap_err();
        assert_eq!(err.to_string(), "First audio timestamp is 10us, expected 0");

        let mut base = TimestampBase::new(FirstTimestampBehavior::Strict);
        assert_eq!(base.normalize(TrackKind::Audio, 0).unwrap(), 0);
        assert_eq!(base.normalize(TrackKind::Audio, 20_000).unwrap(), 20_000);
    }

    #[test]
    fn mismatched_codec_rejected_at_construction() {
        let config = webm_config(LatencyMode::Quality, FirstTimestampBehavior::Offset);
        let mut tracks = webm_tracks();
        if let Some(video) = tracks.video.as_mut() {
            video.codec = VideoCodec::Avc;
        }
        let err = MuxerAdapter::new(&config, &tracks).err().unwrap();
        assert!(matches!(err, MuxError::CodecMismatch { .. }));
    }

    #[test]
    fn buffered_returns_file_without_data_chunks() {
        let config = webm_config(LatencyMode::Quality, FirstTimestampBehavior::Offset);
        let mut adapter = MuxerAdapter::new(&config, &webm_tracks()).unwrap();
        assert_eq!(adapter.output_mode(), OutputMode::Buffered);
        for i in 0..10 {
            adapter.add_chunk(&chunk(TrackKind::Video, 1_000_000 + i * 33_333, i == 0)).unwrap();
            adapter.add_chunk(&chunk(TrackKind::Audio, 1_000_000 + i * 20_000, true)).unwrap();
        }
        assert!(adapter.take_data_chunks().is_empty());
        let file = adapter.finalize().unwrap().unwrap();
        assert!(!file.is_empty());
        assert_eq!(adapter.chunk_count(TrackKind::Video), 10);
    }

    #[test]
    fn streaming_emits_ranges_and_returns_none() {
        let config = EncoderConfig {
            latency_mode: LatencyMode::Realtime,
            ..EncoderConfig::default()
        };
        let tracks = MuxTracks {
            video: None,
            audio: Some(AudioTrackConfig {
                codec: AudioCodec::Aac,
                codec_string: "mp4a.40.2".into(),
                sample_rate: 48_000,
                channels: 2,
                bitrate: 128_000,
            }),
        };
        let mut adapter = MuxerAdapter::new(&config, &tracks).unwrap();
        let mut audio = chunk(TrackKind::Audio, 0, true);
        audio.decoder_config = Some(DecoderConfig {
            codec_string: "mp4a.40.2".into(),
            description: Some(vec![0x11, 0x90]),
        });
        adapter.add_audio_chunk(&audio).unwrap();
        let mut ranges = adapter.take_data_chunks();
        assert!(ranges[0].is_header);

        assert!(adapter.finalize().unwrap().is_none());
        ranges.extend(adapter.take_data_chunks());
        let total: usize = ranges.iter().map(|r| r.bytes.len()).sum();
        assert_eq!(total as u64, adapter.bytes_muxed());
        assert!(ranges.iter().all(|r| r.container == ContainerFormat::Mp4));
    }
}
