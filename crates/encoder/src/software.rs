//! Software reference codec platform.
//!
//! Stands in for a real platform codec layer: each encoder runs on its own
//! thread so queue depth is real, and emits placeholder bitstreams with
//! well-formed decoder-config descriptions (avcC, hvcC, av1C,
//! AudioSpecificConfig, OpusHead, Vorbis headers). Supported codecs,
//! accepted hardware preferences, negotiated audio format and per-sample
//! latency are configurable through [`SoftwarePlatformBuilder`].
//!
//! ```text
//!   encode(sample) ──jobs──▶ [encoder thread] ──output──▶ take_output()
//!        │                        │
//!        └── pending += 1         └── pending -= 1 after each sample
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use ek_common::types::{audio_timestamp, frame_duration};
use ek_common::{
    AudioCodec, AudioData, AudioEncoderConfig, AudioSupport, CodecPlatform, DecoderConfig,
    EncodeError, EncodeResult, EncodedChunk, HardwareAcceleration, TrackEncoder, TrackKind,
    TransferCapabilities, VideoCodec, VideoEncoderConfig, VideoFrame, VideoSupport,
};
use ek_mux::mp4::{aac_audio_specific_config, av1c_from_codec_string, opus_head};

/// Bytes of sample payload copied into each placeholder chunk.
const PAYLOAD_DIGEST_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// In-process codec platform with configurable capabilities.
#[derive(Clone, Debug)]
pub struct SoftwarePlatform {
    video_codecs: Vec<VideoCodec>,
    audio_codecs: Vec<AudioCodec>,
    /// `None` accepts every preference.
    hardware: Option<Vec<HardwareAcceleration>>,
    forced_sample_rate: Option<u32>,
    forced_channels: Option<u16>,
    encode_delay: Duration,
    transfer: TransferCapabilities,
    fail_video_at: Option<u64>,
}

impl Default for SoftwarePlatform {
    fn default() -> Self {
        Self {
            video_codecs: VideoCodec::ALL.to_vec(),
            audio_codecs: AudioCodec::ALL.to_vec(),
            hardware: None,
            forced_sample_rate: None,
            forced_channels: None,
            encode_delay: Duration::ZERO,
            transfer: TransferCapabilities::default(),
            fail_video_at: None,
        }
    }
}

impl SoftwarePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SoftwarePlatformBuilder {
        SoftwarePlatformBuilder {
            platform: Self::default(),
        }
    }

    fn accepts_hardware(&self, hw: HardwareAcceleration) -> bool {
        match &self.hardware {
            Some(accepted) => accepted.contains(&hw),
            None => true,
        }
    }

    fn video_support(&self, config: &VideoEncoderConfig) -> bool {
        self.video_codecs.contains(&config.codec)
            && self.accepts_hardware(config.hardware_acceleration)
            && !config.resolution.is_empty()
    }

    fn negotiated_audio(&self, config: &AudioEncoderConfig) -> AudioEncoderConfig {
        AudioEncoderConfig {
            sample_rate: self.forced_sample_rate.unwrap_or(config.sample_rate),
            channels: self.forced_channels.unwrap_or(config.channels),
            ..config.clone()
        }
    }
}

/// Builder for [`SoftwarePlatform`].
#[derive(Clone, Debug)]
pub struct SoftwarePlatformBuilder {
    platform: SoftwarePlatform,
}

impl SoftwarePlatformBuilder {
    pub fn video_codecs(mut self, codecs: &[VideoCodec]) -> Self {
        self.platform.video_codecs = codecs.to_vec();
        self
    }

    pub fn audio_codecs(mut self, codecs: &[AudioCodec]) -> Self {
        self.platform.audio_codecs = codecs.to_vec();
        self
    }

    /// Only these hardware-acceleration preferences report support.
    pub fn hardware_preferences(mut self, accepted: &[HardwareAcceleration]) -> Self {
        self.platform.hardware = Some(accepted.to_vec());
        self
    }

    /// Report this sample rate for every audio probe.
    pub fn force_audio_sample_rate(mut self, sample_rate: u32) -> Self {
        self.platform.forced_sample_rate = Some(sample_rate);
        self
    }

    /// Report this channel count for every audio probe.
    pub fn force_audio_channels(mut self, channels: u16) -> Self {
        self.platform.forced_channels = Some(channels);
        self
    }

    /// Time each encoder thread spends per sample.
    pub fn encode_delay(mut self, delay: Duration) -> Self {
        self.platform.encode_delay = delay;
        self
    }

    pub fn transfer_capabilities(mut self, transfer: TransferCapabilities) -> Self {
        self.platform.transfer = transfer;
        self
    }

    /// Make the video encoder fail on the `index`-th frame (0-based).
    pub fn fail_video_at(mut self, index: u64) -> Self {
        self.platform.fail_video_at = Some(index);
        self
    }

    pub fn build(self) -> SoftwarePlatform {
        self.platform
    }
}

impl CodecPlatform for SoftwarePlatform {
    fn name(&self) -> &str {
        "software"
    }

    fn probe_video(&self, config: &VideoEncoderConfig) -> EncodeResult<VideoSupport> {
        Ok(VideoSupport {
            supported: self.video_support(config),
            config: config.clone(),
        })
    }

    fn probe_audio(&self, config: &AudioEncoderConfig) -> EncodeResult<AudioSupport> {
        Ok(AudioSupport {
            supported: self.audio_codecs.contains(&config.codec),
            config: self.negotiated_audio(config),
        })
    }

    fn create_video_encoder(
        &self,
        config: &VideoEncoderConfig,
    ) -> EncodeResult<Box<dyn TrackEncoder<VideoFrame>>> {
        if !self.video_support(config) {
            return Err(EncodeError::NotSupported(format!(
                "software platform cannot encode {}",
                config.codec_string
            )));
        }
        let mut state = VideoBitstream::new(config, self.fail_video_at);
        let encoder = ThreadedEncoder::spawn(
            TrackKind::Video,
            self.encode_delay,
            move |frame: VideoFrame, key_frame| state.encode(frame, key_frame),
        )?;
        Ok(Box::new(encoder))
    }

    fn create_audio_encoder(
        &self,
        config: &AudioEncoderConfig,
    ) -> EncodeResult<Box<dyn TrackEncoder<AudioData>>> {
        if !self.audio_codecs.contains(&config.codec) {
            return Err(EncodeError::NotSupported(format!(
                "software platform cannot encode {}",
                config.codec_string
            )));
        }
        let mut state = AudioBitstream::new(&self.negotiated_audio(config));
        let encoder = ThreadedEncoder::spawn(
            TrackKind::Audio,
            self.encode_delay,
            move |data: AudioData, _key_frame| state.encode(data),
        )?;
        Ok(Box::new(encoder))
    }

    fn transfer_capabilities(&self) -> TransferCapabilities {
        self.transfer
    }
}

// ---------------------------------------------------------------------------
// Threaded encoder
// ---------------------------------------------------------------------------

enum Job<S> {
    Encode { sample: S, key_frame: bool },
    Flush(Sender<()>),
}

/// A [`TrackEncoder`] whose work happens on a dedicated thread.
struct ThreadedEncoder<S> {
    track: TrackKind,
    jobs: Option<Sender<Job<S>>>,
    output: Receiver<EncodeResult<EncodedChunk>>,
    pending: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> ThreadedEncoder<S> {
    fn spawn<F>(track: TrackKind, delay: Duration, mut compress: F) -> EncodeResult<Self>
    where
        F: FnMut(S, bool) -> EncodeResult<EncodedChunk> + Send + 'static,
    {
        let (job_tx, job_rx) = channel::unbounded::<Job<S>>();
        let (out_tx, out_rx) = channel::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));
        let pending_worker = Arc::clone(&pending);

        let thread = std::thread::Builder::new()
            .name(format!("software-{track}-encoder"))
            .spawn(move || {
                for job in job_rx {
                    match job {
                        Job::Encode { sample, key_frame } => {
                            if !delay.is_zero() {
                                std::thread::sleep(delay);
                            }
                            let result = compress(sample, key_frame);
                            pending_worker.fetch_sub(1, Ordering::AcqRel);
                            if out_tx.send(result).is_err() {
                                break;
                            }
                        }
                        Job::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .map_err(|e| {
                EncodeError::InitializationFailed(format!("failed to spawn {track} encoder: {e}"))
            })?;

        Ok(Self {
            track,
            jobs: Some(job_tx),
            output: out_rx,
            pending,
            thread: Some(thread),
        })
    }

    fn closed_error(&self) -> EncodeError {
        track_error(self.track, "encoder is closed".into())
    }
}

impl<S: Send + 'static> TrackEncoder<S> for ThreadedEncoder<S> {
    fn encode(&mut self, sample: S, key_frame: bool) -> EncodeResult<()> {
        let Some(jobs) = &self.jobs else {
            return Err(self.closed_error());
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        if jobs.send(Job::Encode { sample, key_frame }).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(track_error(self.track, "encoder thread exited".into()));
        }
        Ok(())
    }

    fn take_output(&mut self) -> EncodeResult<Vec<EncodedChunk>> {
        self.output.try_iter().collect()
    }

    fn queue_depth(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn flush(&mut self) -> EncodeResult<Vec<EncodedChunk>> {
        let Some(jobs) = &self.jobs else {
            return Err(self.closed_error());
        };
        let (ack_tx, ack_rx) = channel::bounded(1);
        jobs.send(Job::Flush(ack_tx))
            .map_err(|_| track_error(self.track, "encoder thread exited".into()))?;
        ack_rx
            .recv()
            .map_err(|_| track_error(self.track, "encoder thread exited during flush".into()))?;
        self.take_output()
    }

    fn close(&mut self) {
        // Dropping the job sender ends the thread's loop.
        if self.jobs.take().is_none() {
            return;
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!(track = %self.track, "Software encoder thread panicked");
            }
        }
        tracing::debug!(track = %self.track, "Software encoder closed");
    }
}

impl<S> Drop for ThreadedEncoder<S> {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn track_error(track: TrackKind, message: String) -> EncodeError {
    match track {
        TrackKind::Video => EncodeError::VideoEncoding(message),
        TrackKind::Audio => EncodeError::AudioEncoding(message),
    }
}

// ---------------------------------------------------------------------------
// Placeholder bitstreams
// ---------------------------------------------------------------------------

struct VideoBitstream {
    codec: VideoCodec,
    codec_string: String,
    frame_duration: u64,
    index: u64,
    sent_config: bool,
    fail_at: Option<u64>,
}

impl VideoBitstream {
    fn new(config: &VideoEncoderConfig, fail_at: Option<u64>) -> Self {
        Self {
            codec: config.codec,
            codec_string: config.codec_string.clone(),
            frame_duration: frame_duration(config.frame_rate.as_f64()),
            index: 0,
            sent_config: false,
            fail_at,
        }
    }

    fn encode(&mut self, frame: VideoFrame, key_frame: bool) -> EncodeResult<EncodedChunk> {
        let index = self.index;
        self.index += 1;
        if self.fail_at == Some(index) {
            return Err(EncodeError::VideoEncoding(format!(
                "software encoder rejected frame {index}"
            )));
        }

        let timestamp = frame
            .timestamp
            .unwrap_or((index * self.frame_duration) as i64);
        let duration = frame.duration.unwrap_or(self.frame_duration);
        let digest = digest(frame.data.as_slice());
        frame.close();

        let data = match self.codec {
            VideoCodec::Avc => length_prefixed(&[if key_frame { 0x65 } else { 0x41 }], &digest),
            // IDR_W_RADL (19) or TRAIL_R (1)
            VideoCodec::Hevc => {
                let nal_type: u8 = if key_frame { 19 } else { 1 };
                length_prefixed(&[nal_type << 1, 0x01], &digest)
            }
            VideoCodec::Vp8 | VideoCodec::Vp9 | VideoCodec::Av1 => {
                let mut data = vec![u8::from(!key_frame)];
                data.extend_from_slice(&digest);
                data
            }
        };

        let decoder_config = (!self.sent_config).then(|| DecoderConfig {
            codec_string: self.codec_string.clone(),
            description: video_description(self.codec, &self.codec_string),
        });
        self.sent_config = true;

        Ok(EncodedChunk {
            track: TrackKind::Video,
            data,
            timestamp,
            duration: Some(duration),
            key_frame,
            decoder_config,
        })
    }
}

struct AudioBitstream {
    codec: AudioCodec,
    codec_string: String,
    sample_rate: u32,
    channels: u16,
    frames: u64,
    sent_config: bool,
}

impl AudioBitstream {
    fn new(config: &AudioEncoderConfig) -> Self {
        Self {
            codec: config.codec,
            codec_string: config.codec_string.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            frames: 0,
            sent_config: false,
        }
    }

    fn encode(&mut self, data: AudioData) -> EncodeResult<EncodedChunk> {
        if data.sample_rate != self.sample_rate || data.channels != self.channels {
            return Err(EncodeError::AudioEncoding(format!(
                "expected {} Hz / {} ch, got {} Hz / {} ch",
                self.sample_rate, self.channels, data.sample_rate, data.channels
            )));
        }
        let timestamp = data
            .timestamp
            .unwrap_or(audio_timestamp(self.frames, self.sample_rate) as i64);
        self.frames += data.number_of_frames() as u64;
        let duration = data.duration();
        let payload = digest(data.data.as_slice());
        data.close();

        let decoder_config = (!self.sent_config).then(|| DecoderConfig {
            codec_string: self.codec_string.clone(),
            description: Some(self.description()),
        });
        self.sent_config = true;

        Ok(EncodedChunk {
            track: TrackKind::Audio,
            data: payload,
            timestamp,
            duration: Some(duration),
            key_frame: true,
            decoder_config,
        })
    }

    fn description(&self) -> Vec<u8> {
        match self.codec {
            AudioCodec::Aac => aac_audio_specific_config(self.sample_rate, self.channels),
            AudioCodec::Opus => opus_head(self.channels, self.sample_rate),
            AudioCodec::Vorbis => vorbis_headers(self.sample_rate, self.channels),
        }
    }
}

/// Leading payload bytes, never empty.
fn digest(bytes: &[u8]) -> Vec<u8> {
    let take = bytes.len().min(PAYLOAD_DIGEST_LEN);
    let mut out = Vec::with_capacity(take + 4);
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&bytes[..take]);
    out
}

/// One NAL unit with a 4-byte length prefix.
fn length_prefixed(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let len = (header.len() + payload.len()) as u32;
    let mut out = Vec::with_capacity(4 + len as usize);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(header);
    out.extend_from_slice(payload);
    out
}

fn video_description(codec: VideoCodec, codec_string: &str) -> Option<Vec<u8>> {
    match codec {
        VideoCodec::Avc => Some(avcc(codec_string)),
        VideoCodec::Hevc => Some(hvcc(codec_string)),
        VideoCodec::Av1 => Some(av1c_from_codec_string(codec_string)),
        VideoCodec::Vp8 | VideoCodec::Vp9 => None,
    }
}

/// `avc1.PPCCLL` → (profile, constraints, level).
fn avc_profile_of(codec_string: &str) -> (u8, u8, u8) {
    let hex = codec_string.strip_prefix("avc1.").unwrap_or_default();
    let byte = |i: usize| hex.get(i..i + 2).and_then(|s| u8::from_str_radix(s, 16).ok());
    match (byte(0), byte(2), byte(4)) {
        (Some(p), Some(c), Some(l)) => (p, c, l),
        _ => (0x42, 0xE0, 0x1F),
    }
}

/// AVCDecoderConfigurationRecord with one SPS and one PPS.
fn avcc(codec_string: &str) -> Vec<u8> {
    let (profile, constraints, level) = avc_profile_of(codec_string);
    let sps = [0x67, profile, constraints, level, 0xAC, 0xD9, 0x40];
    let pps = [0x68, 0xCE, 0x3C, 0x80];

    let mut out = vec![
        1, // configurationVersion
        profile,
        constraints,
        level,
        0xFF, // lengthSizeMinusOne = 3
        0xE1, // one SPS
    ];
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(&sps);
    out.push(1);
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(&pps);
    out
}

/// HEVCDecoderConfigurationRecord without parameter-set arrays.
fn hvcc(codec_string: &str) -> Vec<u8> {
    let level = codec_string
        .split('.')
        .find_map(|part| part.strip_prefix('L'))
        .and_then(|n| n.parse::<u8>().ok())
        .unwrap_or(93);

    let mut out = Vec::with_capacity(23);
    out.push(1); // configurationVersion
    out.push(0x01); // profile_space 0, tier 0, Main
    out.extend_from_slice(&0x6000_0000u32.to_be_bytes());
    out.extend_from_slice(&[0x90, 0, 0, 0, 0, 0]); // constraint flags
    out.push(level);
    out.extend_from_slice(&0xF000u16.to_be_bytes()); // min_spatial_segmentation
    out.push(0xFC); // parallelismType
    out.push(0xFD); // chroma_format_idc = 1
    out.push(0xF8); // bit_depth_luma_minus8 = 0
    out.push(0xF8); // bit_depth_chroma_minus8 = 0
    out.extend_from_slice(&0u16.to_be_bytes()); // avgFrameRate
    out.push(0x0F); // lengthSizeMinusOne = 3
    out.push(0); // numOfArrays
    out
}

/// Identification, comment and setup headers, Xiph-laced.
fn vorbis_headers(sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut ident = vec![0x01];
    ident.extend_from_slice(b"vorbis");
    ident.extend_from_slice(&0u32.to_le_bytes());
    ident.push(channels as u8);
    ident.extend_from_slice(&sample_rate.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.extend_from_slice(&128_000i32.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.push(0xB8); // blocksize 256 / 2048
    ident.push(1); // framing

    let vendor = b"ek-encoder";
    let mut comment = vec![0x03];
    comment.extend_from_slice(b"vorbis");
    comment.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    comment.extend_from_slice(vendor);
    comment.extend_from_slice(&0u32.to_le_bytes());
    comment.push(1);

    let mut setup = vec![0x05];
    setup.extend_from_slice(b"vorbis");
    setup.extend_from_slice(&[0x00; 8]);

    let mut out = vec![2];
    for header in [&ident, &comment] {
        let mut len = header.len();
        while len >= 255 {
            out.push(255);
            len -= 255;
        }
        out.push(len as u8);
    }
    out.extend_from_slice(&ident);
    out.extend_from_slice(&comment);
    out.extend_from_slice(&setup);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ek_common::{FrameRate, LatencyMode, PixelFormat, Resolution};

    fn video_config(codec: VideoCodec, codec_string: &str) -> VideoEncoderConfig {
        VideoEncoderConfig {
            codec,
            codec_string: codec_string.into(),
            resolution: Resolution::VGA,
            bitrate: 1_000_000,
            frame_rate: FrameRate(30.0),
            hardware_acceleration: HardwareAcceleration::NoPreference,
            latency_mode: LatencyMode::Quality,
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame::new(vec![7u8; 64], PixelFormat::Rgba, Resolution::VGA)
    }

    #[test]
    fn probe_respects_codec_and_hardware_lists() {
        let platform = SoftwarePlatform::builder()
            .video_codecs(&[VideoCodec::Vp9])
            .hardware_preferences(&[HardwareAcceleration::PreferSoftware])
            .build();
        let mut config = video_config(VideoCodec::Vp9, "vp09.00.31.08");
        assert!(!platform.probe_video(&config).unwrap().supported);
        config.hardware_acceleration = HardwareAcceleration::PreferSoftware;
        assert!(platform.probe_video(&config).unwrap().supported);
        config.codec = VideoCodec::Avc;
        assert!(!platform.probe_video(&config).unwrap().supported);
    }

    #[test]
    fn forced_audio_format_is_reported() {
        let platform = SoftwarePlatform::builder().force_audio_sample_rate(44_100).build();
        let support = platform
            .probe_audio(&AudioEncoderConfig {
                codec: AudioCodec::Opus,
                codec_string: "opus".into(),
                sample_rate: 48_000,
                channels: 2,
                bitrate: 128_000,
            })
            .unwrap();
        assert!(support.supported);
        assert_eq!(support.config.sample_rate, 44_100);
    }

    #[test]
    fn video_encoder_emits_config_once() {
        let platform = SoftwarePlatform::new();
        let mut encoder = platform
            .create_video_encoder(&video_config(VideoCodec::Avc, "avc1.42E01F"))
            .unwrap();
        encoder.encode(frame().with_timestamp(0), true).unwrap();
        encoder.encode(frame().with_timestamp(33_333), false).unwrap();
        let chunks = encoder.flush().unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].key_frame);
        assert_eq!(chunks[0].data[4], 0x65);
        assert_eq!(chunks[1].data[4], 0x41);
        let avcc = chunks[0].decoder_config.as_ref().unwrap().description.as_ref().unwrap();
        assert_eq!(&avcc[..4], &[1, 0x42, 0xE0, 0x1F]);
        assert!(chunks[1].decoder_config.is_none());
        assert_eq!(encoder.queue_depth(), 0);
        encoder.close();
        encoder.close();
        assert!(encoder.encode(frame(), false).is_err());
    }

    #[test]
    fn queue_depth_reflects_pending_work() {
        let platform = SoftwarePlatform::builder()
            .encode_delay(Duration::from_millis(20))
            .build();
        let mut encoder = platform
            .create_video_encoder(&video_config(VideoCodec::Vp9, "vp09.00.31.08"))
            .unwrap();
        for i in 0..4 {
            encoder.encode(frame().with_timestamp(i * 33_333), i == 0).unwrap();
        }
        assert!(encoder.queue_depth() >= 3);
        assert_eq!(encoder.flush().unwrap().len(), 4);
        assert_eq!(encoder.queue_depth(), 0);
    }

    #[test]
    fn audio_encoder_assigns_timestamps_and_descriptions() {
        let platform = SoftwarePlatform::new();
        let mut encoder = platform
            .create_audio_encoder(&AudioEncoderConfig {
                codec: AudioCodec::Aac,
                codec_string: "mp4a.40.2".into(),
                sample_rate: 48_000,
                channels: 2,
                bitrate: 128_000,
            })
            .unwrap();
        encoder.encode(AudioData::silence(1024, 48_000, 2), true).unwrap();
        encoder.encode(AudioData::silence(1024, 48_000, 2), true).unwrap();
        let chunks = encoder.flush().unwrap();
        assert_eq!(chunks[0].timestamp, 0);
        assert_eq!(chunks[1].timestamp, 21_333);
        assert_eq!(
            chunks[0].decoder_config.as_ref().unwrap().description,
            Some(vec![0x11, 0x90])
        );
    }

    #[test]
    fn injected_failure_surfaces_as_video_error() {
        let platform = SoftwarePlatform::builder().fail_video_at(1).build();
        let mut encoder = platform
            .create_video_encoder(&video_config(VideoCodec::Avc, "avc1.42E01F"))
            .unwrap();
        encoder.encode(frame(), true).unwrap();
        encoder.encode(frame(), false).unwrap();
        let err = encoder.flush().unwrap_err();
        assert!(matches!(err, EncodeError::VideoEncoding(_)));
    }

    #[test]
    fn description_records() {
        assert_eq!(avc_profile_of("avc1.640028"), (0x64, 0x00, 0x28));
        assert_eq!(avc_profile_of("bogus"), (0x42, 0xE0, 0x1F));
        let hvcc = hvcc("hvc1.1.6.L120.B0");
        assert_eq!(hvcc.len(), 23);
        assert_eq!(hvcc[12], 120);
        let vorbis = vorbis_headers(48_000, 2);
        assert_eq!(vorbis[0], 2);
        assert_eq!(vorbis[1], 30);
        assert_eq!(vorbis[2], 26);
        assert_eq!(&vorbis[3..10], b"\x01vorbis");
    }
}
