//! Execution-context encode session.
//!
//! `EncodeSession` owns everything one operation needs inside the worker:
//! the negotiated config, both track encoders, the muxer and the counters.
//! It is created by `initialize`, mutated only by command handlers, and torn
//! down exactly once, whether the operation finishes, is cancelled or fails.

use std::time::Duration;

use ek_common::{
    AudioCodec, AudioData, CodecPlatform, EncodeError, EncodeResult, EncoderConfig,
    TrackEncoder, VideoCodec, VideoFrame,
};
use ek_mux::{AudioTrackConfig, DataChunk, MuxTracks, MuxerAdapter, VideoTrackConfig};
use tracing::{debug, info, warn};

use crate::backpressure::{Admission, BackpressureController};
use crate::negotiate::negotiate_tracks;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters for one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub video_frames_submitted: u64,
    pub audio_chunks_submitted: u64,
    /// Samples released by backpressure without encoding.
    pub dropped_video: u64,
    pub dropped_audio: u64,
    pub key_frames: u64,
    pub bytes_muxed: u64,
}

/// What happened to one submitted sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// Released by backpressure.
    Dropped,
    /// The sample's track is disabled; it was released unencoded.
    TrackDisabled,
    /// A cancel arrived while waiting for queue space.
    Interrupted,
}

/// Result of a successful finalize.
#[derive(Debug)]
pub struct FinishedOutput {
    /// Complete file in buffered mode, `None` in streaming mode.
    pub output: Option<Vec<u8>>,
    /// Streaming ranges produced by the final flush.
    pub trailing: Vec<DataChunk>,
}

// ---------------------------------------------------------------------------
// EncodeSession
// ---------------------------------------------------------------------------

pub struct EncodeSession {
    config: EncoderConfig,
    video: Option<Box<dyn TrackEncoder<VideoFrame>>>,
    audio: Option<Box<dyn TrackEncoder<AudioData>>>,
    muxer: Option<MuxerAdapter>,
    video_backpressure: BackpressureController,
    audio_backpressure: BackpressureController,
    key_frame_interval: u64,
    video_index: u64,
    processed: u64,
    total: Option<u64>,
    stats: SessionStats,
    torn_down: bool,
}

impl std::fmt::Debug for EncodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeSession")
            .field("container", &self.config.container)
            .field("video", &self.config.codec.video)
            .field("audio", &self.config.codec.audio)
            .field("processed", &self.processed)
            .field("total", &self.total)
            .field("stats", &self.stats)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl EncodeSession {
    /// Validate, negotiate codecs, create the muxer and both encoders.
    pub fn initialize(
        platform: &dyn CodecPlatform,
        config: &EncoderConfig,
        total: Option<u64>,
    ) -> EncodeResult<Self> {
        config.validate()?;
        let negotiated = negotiate_tracks(platform, config)?;
        let config = negotiated.config;

        let tracks = MuxTracks {
            video: negotiated.video.as_ref().map(|v| VideoTrackConfig {
                codec: v.codec,
                codec_string: v.codec_string.clone(),
                resolution: v.resolution,
                frame_rate: v.frame_rate,
            }),
            audio: negotiated.audio.as_ref().map(|a| AudioTrackConfig {
                codec: a.codec,
                codec_string: a.codec_string.clone(),
                sample_rate: a.sample_rate,
                channels: a.channels,
                bitrate: a.bitrate,
            }),
        };
        let muxer = MuxerAdapter::new(&config, &tracks)?;

        let mut session = Self {
            video_backpressure: BackpressureController::new(
                config.backpressure_strategy,
                config.max_video_queue_size,
            ),
            audio_backpressure: BackpressureController::new(
                config.backpressure_strategy,
                config.max_audio_queue_size,
            ),
            key_frame_interval: u64::from(config.key_frame_interval_frames().max(1)),
            config,
            video: None,
            audio: None,
            muxer: Some(muxer),
            video_index: 0,
            processed: 0,
            total,
            stats: SessionStats::default(),
            torn_down: false,
        };

        // A failure here drops `session`, which tears down whatever was created.
        if let Some(video) = &negotiated.video {
            session.video = Some(
                platform
                    .create_video_encoder(video)
                    .map_err(|e| init_error("video", e))?,
            );
        }
        if let Some(audio) = &negotiated.audio {
            session.audio = Some(
                platform
                    .create_audio_encoder(audio)
                    .map_err(|e| init_error("audio", e))?,
            );
        }

        info!(
            platform = platform.name(),
            container = %session.config.container,
            mode = ?session.config.output_mode(),
            video = ?session.config.codec.video,
            audio = ?session.config.codec.audio,
            key_frame_interval = session.key_frame_interval,
            "Encode session created"
        );
        Ok(session)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn actual_video_codec(&self) -> Option<VideoCodec> {
        self.config.codec.video
    }

    pub fn actual_audio_codec(&self) -> Option<AudioCodec> {
        self.config.codec.audio
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Samples accepted for encoding so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Current (video, audio) encoder queue depths.
    pub fn queue_sizes(&self) -> (usize, usize) {
        (
            self.video.as_ref().map_or(0, |e| e.queue_depth()),
            self.audio.as_ref().map_or(0, |e| e.queue_depth()),
        )
    }

    fn ensure_live(&self) -> EncodeResult<()> {
        if self.torn_down {
            return Err(EncodeError::Internal("session already closed".into()));
        }
        Ok(())
    }

    /// Submit one video frame through backpressure.
    ///
    /// `wait` sleeps for the given duration and returns `true` when a cancel
    /// interrupted it.
    pub fn submit_video<W>(&mut self, frame: VideoFrame, wait: W) -> EncodeResult<Submission>
    where
        W: FnMut(Duration) -> bool,
    {
        self.ensure_live()?;
        let Some(encoder) = self.video.as_mut() else {
            frame.close();
            return Ok(Submission::TrackDisabled);
        };

        match self.video_backpressure.admit(|| encoder.queue_depth(), wait) {
            Admission::Accept => {}
            Admission::Drop => {
                frame.close();
                self.stats.dropped_video += 1;
                debug!(
                    dropped = self.stats.dropped_video,
                    max_queue = self.video_backpressure.max_queue_size(),
                    "Video frame dropped by backpressure"
                );
                return Ok(Submission::Dropped);
            }
            Admission::Interrupted => {
                frame.close();
                return Ok(Submission::Interrupted);
            }
        }

        let key_frame = self.video_index % self.key_frame_interval == 0;
        encoder.encode(frame, key_frame)?;
        self.video_index += 1;
        self.stats.video_frames_submitted += 1;
        if key_frame {
            self.stats.key_frames += 1;
        }
        self.processed += 1;
        self.drain_output()?;
        Ok(Submission::Accepted)
    }

    /// Submit one audio buffer through backpressure. Its format must match
    /// the negotiated track exactly.
    pub fn submit_audio<W>(&mut self, data: AudioData, wait: W) -> EncodeResult<Submission>
    where
        W: FnMut(Duration) -> bool,
    {
        self.ensure_live()?;
        let Some(encoder) = self.audio.as_mut() else {
            data.close();
            return Ok(Submission::TrackDisabled);
        };
        if data.sample_rate != self.config.sample_rate || data.channels != self.config.channels {
            return Err(EncodeError::AudioEncoding(format!(
                "audio data is {} Hz / {} ch, track is {} Hz / {} ch",
                data.sample_rate, data.channels, self.config.sample_rate, self.config.channels
            )));
        }

        match self.audio_backpressure.admit(|| encoder.queue_depth(), wait) {
            Admission::Accept => {}
            Admission::Drop => {
                data.close();
                self.stats.dropped_audio += 1;
                debug!(
                    dropped = self.stats.dropped_audio,
                    max_queue = self.audio_backpressure.max_queue_size(),
                    "Audio data dropped by backpressure"
                );
                return Ok(Submission::Dropped);
            }
            Admission::Interrupted => {
                data.close();
                return Ok(Submission::Interrupted);
            }
        }

        encoder.encode(data, true)?;
        self.stats.audio_chunks_submitted += 1;
        self.processed += 1;
        self.drain_output()?;
        Ok(Submission::Accepted)
    }

    /// Move finished chunks from both encoders into the muxer.
    fn drain_output(&mut self) -> EncodeResult<()> {
        let Some(muxer) = self.muxer.as_mut() else {
            return Err(EncodeError::Internal("muxer already closed".into()));
        };
        if let Some(encoder) = self.video.as_mut() {
            for chunk in encoder.take_output()? {
                muxer.add_video_chunk(&chunk)?;
            }
        }
        if let Some(encoder) = self.audio.as_mut() {
            for chunk in encoder.take_output()? {
                muxer.add_audio_chunk(&chunk)?;
            }
        }
        Ok(())
    }

    /// Streaming ranges the muxer has ready.
    pub fn take_data_chunks(&mut self) -> Vec<DataChunk> {
        self.muxer
            .as_mut()
            .map(MuxerAdapter::take_data_chunks)
            .unwrap_or_default()
    }

    /// Flush both encoders, finalize the muxer and tear down.
    pub fn finalize(&mut self) -> EncodeResult<FinishedOutput> {
        self.ensure_live()?;
        let Some(muxer) = self.muxer.as_mut() else {
            return Err(EncodeError::Internal("muxer already closed".into()));
        };
        if let Some(encoder) = self.video.as_mut() {
            for chunk in encoder.flush()? {
                muxer.add_video_chunk(&chunk)?;
            }
        }
        if let Some(encoder) = self.audio.as_mut() {
            for chunk in encoder.flush()? {
                muxer.add_audio_chunk(&chunk)?;
            }
        }
        let output = muxer.finalize()?;
        let trailing = muxer.take_data_chunks();
        self.stats.bytes_muxed = muxer.bytes_muxed();

        info!(
            processed = self.processed,
            bytes = self.stats.bytes_muxed,
            key_frames = self.stats.key_frames,
            dropped_video = self.stats.dropped_video,
            dropped_audio = self.stats.dropped_audio,
            "Encode session finalized"
        );
        self.teardown();
        Ok(FinishedOutput { output, trailing })
    }

    /// Release encoders and muxer. Runs once; later calls do nothing.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(mut encoder) = self.video.take() {
            encoder.close();
        }
        if let Some(mut encoder) = self.audio.take() {
            encoder.close();
        }
        self.muxer = None;
        debug!(processed = self.processed, "Encode session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!("Encode session dropped without finalize, tearing down");
            self.teardown();
        }
    }
}

fn init_error(track: &str, err: EncodeError) -> EncodeError {
    match err {
        EncodeError::InitializationFailed(_) | EncodeError::NotSupported(_) => err,
        other => EncodeError::InitializationFailed(format!("{track} encoder: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwarePlatform;
    use ek_common::{
        BackpressureStrategy, ContainerFormat, ErrorKind, LatencyMode, PixelFormat, Resolution,
    };

    fn no_wait(_: Duration) -> bool {
        false
    }

    fn frame(ts: i64) -> VideoFrame {
        VideoFrame::new(vec![1u8; 32], PixelFormat::Rgba, Resolution::VGA).with_timestamp(ts)
    }

    #[test]
    fn buffered_session_produces_file() {
        let platform = SoftwarePlatform::new();
        let mut session =
            EncodeSession::initialize(&platform, &EncoderConfig::default(), Some(3)).unwrap();
        assert_eq!(session.actual_video_codec(), Some(VideoCodec::Avc));
        assert_eq!(session.actual_audio_codec(), Some(AudioCodec::Aac));

        for i in 0..3 {
            assert_eq!(
                session.submit_video(frame(i * 33_333), no_wait).unwrap(),
                Submission::Accepted
            );
        }
        let audio = AudioData::silence(1024, 48_000, 2).with_timestamp(0);
        assert_eq!(session.submit_audio(audio, no_wait).unwrap(), Submission::Accepted);
        assert_eq!(session.processed(), 4);
        assert_eq!(session.stats().key_frames, 1);

        let finished = session.finalize().unwrap();
        let file = finished.output.unwrap();
        assert_eq!(&file[4..8], b"ftyp");
        assert!(finished.trailing.is_empty());
        assert!(session.is_torn_down());
        assert!(session.finalize().is_err());
    }

    #[test]
    fn streaming_session_emits_ranges() {
        let platform = SoftwarePlatform::new();
        let mut config = EncoderConfig::default();
        config.latency_mode = LatencyMode::Realtime;
        config.container = ContainerFormat::WebM;
        config.codec.video = Some(VideoCodec::Vp9);
        config.codec.audio = Some(AudioCodec::Opus);
        config.disable_audio();
        let mut session = EncodeSession::initialize(&platform, &config, None).unwrap();
        for i in 0..5 {
            session.submit_video(frame(i * 33_333), no_wait).unwrap();
        }
        let mut chunks = session.take_data_chunks();
        let finished = session.finalize().unwrap();
        assert!(finished.output.is_none());
        chunks.extend(finished.trailing);
        assert!(chunks[0].is_header);
        assert_eq!(&chunks[0].bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    }

    #[test]
    fn disabled_track_samples_are_released() {
        let platform = SoftwarePlatform::new();
        let mut config = EncoderConfig::default();
        config.disable_audio();
        let mut session = EncodeSession::initialize(&platform, &config, None).unwrap();
        let audio = AudioData::silence(1024, 48_000, 2);
        assert_eq!(
            session.submit_audio(audio, no_wait).unwrap(),
            Submission::TrackDisabled
        );
        assert_eq!(session.processed(), 0);
    }

    #[test]
    fn audio_format_mismatch_is_rejected() {
        let platform = SoftwarePlatform::new();
        let mut session =
            EncodeSession::initialize(&platform, &EncoderConfig::default(), None).unwrap();
        let err = session
            .submit_audio(AudioData::silence(1024, 44_100, 2), no_wait)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioEncodingError);
    }

    #[test]
    fn full_queue_drops_without_error() {
        let platform = SoftwarePlatform::builder()
            .encode_delay(Duration::from_millis(50))
            .build();
        let mut config = EncoderConfig::default();
        config.disable_audio();
        config.max_video_queue_size = 1;
        config.backpressure_strategy = BackpressureStrategy::Drop;
        let mut session = EncodeSession::initialize(&platform, &config, None).unwrap();
        let outcomes: Vec<Submission> = (0..4)
            .map(|i| session.submit_video(frame(i * 33_333), no_wait).unwrap())
            .collect();
        assert_eq!(outcomes[0], Submission::Accepted);
        assert!(outcomes.contains(&Submission::Dropped));
        assert!(session.stats().dropped_video > 0);
        assert!(session.processed() < 4);
        session.finalize().unwrap();
    }

    #[test]
    fn interrupted_wait_releases_sample() {
        let platform = SoftwarePlatform::builder()
            .encode_delay(Duration::from_millis(50))
            .build();
        let mut config = EncoderConfig::default();
        config.disable_audio();
        config.max_video_queue_size = 1;
        config.backpressure_strategy = BackpressureStrategy::Wait;
        let mut session = EncodeSession::initialize(&platform, &config, None).unwrap();
        session.submit_video(frame(0), no_wait).unwrap();
        assert_eq!(
            session.submit_video(frame(33_333), |_| true).unwrap(),
            Submission::Interrupted
        );
        session.teardown();
        session.teardown();
    }

    #[test]
    fn invalid_config_fails_before_negotiation() {
        let platform = SoftwarePlatform::new();
        let mut config = EncoderConfig::default();
        config.disable_audio();
        config.disable_video();
        let err = EncodeSession::initialize(&platform, &config, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }
}
