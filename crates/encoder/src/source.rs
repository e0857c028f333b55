//! Source normalization: every supported input shape becomes one ordered
//! stream of samples with timestamps assigned.
//!
//! ```text
//!   Samples(Vec)  ─┐
//!   Lazy(iter)    ─┤                       ┌─ peek() (non-destructive)
//!   File(reader)  ─┼──▶ SampleStream ──────┤
//!   Live(video rx ─┤    (look-ahead queue) └─ next() → Sample with timestamp
//!        audio rx) ┘
//!        │
//!        └── two drain threads ──▶ merged channel
//! ```

use std::collections::VecDeque;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use ek_common::types::{audio_timestamp, frame_timestamp};
use ek_common::{AudioData, FrameRate, Resolution, Sample, TrackKind, VideoFrame};

use crate::error::SourceError;

/// Capacity of the merged live-capture channel.
const LIVE_MERGE_CAPACITY: usize = 64;

/// Known properties of a video track.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VideoTrackSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<FrameRate>,
}

impl VideoTrackSettings {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Known properties of an audio track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioTrackSettings {
    pub sample_rate: u32,
    pub channels: u16,
}

/// What the source reveals about itself before encoding starts.
///
/// `has_video` / `has_audio` are `None` when the source cannot tell whether
/// it carries the track (a lazy sequence only shows its first element).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceHints {
    pub video: Option<VideoTrackSettings>,
    pub audio: Option<AudioTrackSettings>,
    pub has_video: Option<bool>,
    pub has_audio: Option<bool>,
    /// Number of samples, when known up front.
    pub total: Option<u64>,
}

impl SourceHints {
    fn observe(&mut self, sample: &Sample) {
        match sample {
            Sample::Video(frame) if self.video.is_none() => {
                self.video = Some(video_settings_of(frame));
            }
            Sample::Audio(data) if self.audio.is_none() => {
                self.audio = Some(AudioTrackSettings {
                    sample_rate: data.sample_rate,
                    channels: data.channels,
                });
            }
            _ => {}
        }
    }
}

fn video_settings_of(frame: &VideoFrame) -> VideoTrackSettings {
    VideoTrackSettings {
        width: frame.resolution.width,
        height: frame.resolution.height,
        frame_rate: frame
            .duration
            .filter(|d| *d > 0)
            .map(|d| FrameRate(1_000_000.0 / d as f64)),
    }
}

/// A file-backed source: a demuxer/decoder the embedding application owns.
pub trait FileSource: Send {
    /// Track settings from the file's metadata.
    fn track_settings(&self) -> (Option<VideoTrackSettings>, Option<AudioTrackSettings>);

    /// Next decoded sample, `None` at end of file.
    fn next_sample(&mut self) -> Option<Result<Sample, SourceError>>;

    /// Sample count, if the file knows it.
    fn sample_count(&self) -> Option<u64> {
        None
    }
}

/// Separate live video and audio tracks, e.g. from a capture device.
#[derive(Default)]
pub struct LiveCapture {
    pub video: Option<Receiver<VideoFrame>>,
    pub audio: Option<Receiver<AudioData>>,
    pub video_settings: Option<VideoTrackSettings>,
    pub audio_settings: Option<AudioTrackSettings>,
}

type LazySamples = Box<dyn Iterator<Item = Result<Sample, SourceError>> + Send>;

/// Every input shape the encoder accepts.
pub enum MediaSource {
    /// A finite, ordered collection.
    Samples(Vec<Sample>),
    Live(LiveCapture),
    /// A lazily produced sequence; never materialized.
    Lazy(LazySamples),
    File(Box<dyn FileSource>),
}

impl MediaSource {
    /// Wrap an infallible iterator.
    pub fn lazy<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = Sample>,
        I::IntoIter: Send + 'static,
    {
        Self::Lazy(Box::new(samples.into_iter().map(Ok)))
    }

    /// Wrap an iterator whose items may fail.
    pub fn try_lazy<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = Result<Sample, SourceError>>,
        I::IntoIter: Send + 'static,
    {
        Self::Lazy(Box::new(samples.into_iter()))
    }
}

impl From<Vec<Sample>> for MediaSource {
    fn from(samples: Vec<Sample>) -> Self {
        Self::Samples(samples)
    }
}

impl From<LiveCapture> for MediaSource {
    fn from(capture: LiveCapture) -> Self {
        Self::Live(capture)
    }
}

/// Drain threads of a live capture and the channel they merge into.
struct LiveDrain {
    merged: Receiver<Result<Sample, SourceError>>,
    /// Dropping this disconnects the stop lane and ends both threads.
    _stop: Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

enum Inner {
    Samples(std::vec::IntoIter<Sample>),
    Lazy(LazySamples),
    File(Box<dyn FileSource>),
    Live(LiveDrain),
}

impl Inner {
    fn pull(&mut self) -> Option<Result<Sample, SourceError>> {
        match self {
            Self::Samples(iter) => iter.next().map(Ok),
            Self::Lazy(iter) => iter.next(),
            Self::File(file) => file.next_sample(),
            Self::Live(drain) => drain.merged.recv().ok(),
        }
    }
}

/// Ordered, timestamped sample stream over any [`MediaSource`].
pub struct SampleStream {
    inner: Inner,
    /// Look-ahead: items pulled from `inner` but not yet handed out.
    lookahead: VecDeque<Result<Sample, SourceError>>,
    hints: SourceHints,
    frame_rate: FrameRate,
    video_index: u64,
    audio_frames: u64,
}

impl SampleStream {
    pub fn open(source: MediaSource) -> Result<Self, SourceError> {
        let mut hints = SourceHints::default();
        let inner = match source {
            MediaSource::Samples(samples) => {
                for sample in &samples {
                    hints.observe(sample);
                }
                hints.has_video = Some(samples.iter().any(|s| s.track() == TrackKind::Video));
                hints.has_audio = Some(samples.iter().any(|s| s.track() == TrackKind::Audio));
                hints.total = Some(samples.len() as u64);
                Inner::Samples(samples.into_iter())
            }
            MediaSource::Lazy(iter) => Inner::Lazy(iter),
            MediaSource::File(file) => {
                let (video, audio) = file.track_settings();
                hints.has_video = Some(video.is_some());
                hints.has_audio = Some(audio.is_some());
                hints.video = video;
                hints.audio = audio;
                hints.total = file.sample_count();
                Inner::File(file)
            }
            MediaSource::Live(capture) => {
                hints.has_video = Some(capture.video.is_some());
                hints.has_audio = Some(capture.audio.is_some());
                hints.video = capture.video_settings;
                hints.audio = capture.audio_settings;
                Inner::Live(spawn_live_drain(capture)?)
            }
        };

        let mut stream = Self {
            inner,
            lookahead: VecDeque::new(),
            hints,
            frame_rate: FrameRate::default(),
            video_index: 0,
            audio_frames: 0,
        };

        // Sources that say nothing about themselves get one element peeked.
        if stream.hints.video.is_none() && stream.hints.audio.is_none() {
            let mut peeked = SourceHints::default();
            if let Some(Ok(first)) = stream.peek() {
                peeked.observe(first);
            }
            stream.hints.video = peeked.video;
            stream.hints.audio = peeked.audio;
        }
        Ok(stream)
    }

    pub fn hints(&self) -> &SourceHints {
        &self.hints
    }

    /// Frame rate used for video samples that carry no timestamp.
    pub fn set_frame_rate(&mut self, frame_rate: FrameRate) {
        self.frame_rate = frame_rate;
    }

    /// Look at the next item without consuming it.
    pub fn peek(&mut self) -> Option<&Result<Sample, SourceError>> {
        if self.lookahead.is_empty() {
            let item = self.inner.pull()?;
            self.lookahead.push_back(item);
        }
        self.lookahead.front()
    }

    fn assign_timestamp(&mut self, sample: Sample) -> Sample {
        match sample {
            Sample::Video(mut frame) => {
                if frame.timestamp.is_none() {
                    let ts = frame_timestamp(self.video_index, self.frame_rate.as_f64());
                    frame.timestamp = Some(ts as i64);
                }
                self.video_index += 1;
                Sample::Video(frame)
            }
            Sample::Audio(mut data) => {
                if data.timestamp.is_none() {
                    data.timestamp =
                        Some(audio_timestamp(self.audio_frames, data.sample_rate) as i64);
                }
                self.audio_frames += data.number_of_frames() as u64;
                Sample::Audio(data)
            }
        }
    }
}

impl Iterator for SampleStream {
    type Item = Result<Sample, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match self.lookahead.pop_front() {
            Some(item) => item,
            None => self.inner.pull()?,
        };
        Some(item.map(|sample| self.assign_timestamp(sample)))
    }
}

impl Drop for LiveDrain {
    fn drop(&mut self) {
        // `_stop` drops right after this, which ends both drain threads.
        tracing::debug!(threads = self.threads.len(), "Stopping live capture drain");
    }
}

fn spawn_live_drain(capture: LiveCapture) -> Result<LiveDrain, SourceError> {
    let (merged_tx, merged) = channel::bounded(LIVE_MERGE_CAPACITY);
    let (stop, stop_rx) = channel::bounded::<()>(0);
    let mut threads = Vec::new();

    if let Some(video) = capture.video {
        threads.push(spawn_drain(
            "live-video-drain",
            TrackKind::Video,
            video,
            merged_tx.clone(),
            stop_rx.clone(),
        )?);
    }
    if let Some(audio) = capture.audio {
        threads.push(spawn_drain(
            "live-audio-drain",
            TrackKind::Audio,
            audio,
            merged_tx.clone(),
            stop_rx.clone(),
        )?);
    }

    tracing::info!(tracks = threads.len(), "Live capture drain started");
    Ok(LiveDrain {
        merged,
        _stop: stop,
        threads,
    })
}

/// Forward one live track into the merged channel until the track ends,
/// the consumer goes away, or the stop lane disconnects.
fn spawn_drain<T>(
    name: &str,
    track: TrackKind,
    input: Receiver<T>,
    merged: Sender<Result<Sample, SourceError>>,
    stop: Receiver<()>,
) -> Result<JoinHandle<()>, SourceError>
where
    T: Into<Sample> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut forwarded = 0u64;
            loop {
                crossbeam::select! {
                    recv(input) -> msg => match msg {
                        Ok(item) => {
                            if merged.send(Ok(item.into())).is_err() {
                                break;
                            }
                            forwarded += 1;
                        }
                        Err(_) => break,
                    },
                    recv(stop) -> _ => break,
                }
            }
            tracing::debug!(%track, forwarded, "Live track drained");
        })
        .map_err(|e| SourceError::Read {
            track,
            reason: format!("failed to spawn drain thread: {e}"),
        })
}
