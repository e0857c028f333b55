//! Controller side of an encode operation.
//!
//! `EncodeOperation` owns the worker handle and the caller-visible state
//! machine:
//!
//! ```text
//!   Idle ──start──▶ Initializing ──initialized──▶ Ready ──add_*──▶ Encoding
//!                                                                    │
//!                         finalize ◀─────────────────────────────────┘
//!                            │
//!                            ▼
//!                       Finalizing ──finalized──▶ Done
//!
//!   any non-terminal state ──cancel──▶ Cancelled
//!   any non-terminal state ──error───▶ Failed
//! ```
//!
//! Worker events are pumped on the caller's thread: non-blocking after each
//! submitted sample, blocking while waiting for `initialized` or the final
//! reply. After a cancel no progress or data-chunk event reaches the
//! observer, and a pending finalize resolves to [`EncodeError::Cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Sender, TryRecvError};
use ek_common::types::{audio_timestamp, frame_timestamp};
use ek_common::{
    AudioCodec, AudioData, CodecPlatform, EncodeError, EncodeResult, EncoderConfig, FrameRate,
    Sample, TransferCapabilities, VideoCodec, VideoFrame,
};
use ek_mux::DataChunk;
use tracing::{debug, info};

use crate::protocol::{Command, Event};
use crate::transfer::{transfer_audio, transfer_video, Transfer};
use crate::worker::{send_cancel, WorkerHandle};

/// Lifecycle of one operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Initializing,
    Ready,
    Encoding,
    Finalizing,
    Done,
    Cancelled,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

/// Caller callbacks. Every method has a no-op default.
pub trait EncodeObserver: Send {
    fn on_progress(&mut self, _processed: u64, _total: Option<u64>) {}

    fn on_queue_size(&mut self, _video: usize, _audio: usize) {}

    fn on_data_chunk(&mut self, _chunk: DataChunk) {}

    /// Called exactly once per failed operation.
    fn on_error(&mut self, _error: &EncodeError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NullObserver;

impl EncodeObserver for NullObserver {}

/// Codecs the worker actually adopted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InitializedCodecs {
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

/// Cancels an operation from any thread.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    control: Sender<Command>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            send_cancel(&self.control);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub struct EncodeOperation {
    worker: WorkerHandle,
    transfer: TransferCapabilities,
    observer: Box<dyn EncodeObserver>,
    cancel: CancelHandle,
    state: OperationState,
    /// The error that ended the operation, replayed to later calls.
    failure: Option<EncodeError>,
    frame_rate: FrameRate,
    video_index: u64,
    audio_frames: u64,
    copies: u64,
}

impl EncodeOperation {
    /// Spawn the worker for `platform`. Nothing is sent until [`start`](Self::start).
    pub fn new(platform: Arc<dyn CodecPlatform>) -> EncodeResult<Self> {
        let transfer = platform.transfer_capabilities();
        let worker = WorkerHandle::spawn(platform)?;
        let cancel = CancelHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            control: worker.control(),
        };
        Ok(Self {
            worker,
            transfer,
            observer: Box::new(NullObserver),
            cancel,
            state: OperationState::Idle,
            failure: None,
            frame_rate: FrameRate::default(),
            video_index: 0,
            audio_frames: 0,
            copies: 0,
        })
    }

    pub fn with_observer(mut self, observer: impl EncodeObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Send `initialize` and wait for the negotiated codecs.
    pub fn start(
        &mut self,
        config: EncoderConfig,
        total_samples: Option<u64>,
    ) -> EncodeResult<InitializedCodecs> {
        self.check_open()?;
        if self.state != OperationState::Idle {
            return Err(EncodeError::Internal(format!(
                "start called in state {:?}",
                self.state
            )));
        }
        self.state = OperationState::Initializing;
        self.frame_rate = config.frame_rate;
        info!(
            container = %config.container,
            width = config.width,
            height = config.height,
            total = ?total_samples,
            "Starting encode operation"
        );
        self.send(Command::Initialize {
            config: Box::new(config),
            total_samples,
        })?;

        loop {
            match self.next_event()? {
                Event::Initialized {
                    actual_video_codec,
                    actual_audio_codec,
                } => {
                    self.state = OperationState::Ready;
                    return Ok(InitializedCodecs {
                        video: actual_video_codec,
                        audio: actual_audio_codec,
                    });
                }
                other => self.dispatch(other)?,
            }
        }
    }

    /// Submit one video frame. A missing timestamp is assigned from the
    /// frame index and the configured frame rate.
    pub fn add_video_frame(&mut self, frame: VideoFrame) -> EncodeResult<()> {
        if let Err(e) = self.check_accepting() {
            frame.close();
            return Err(e);
        }
        let timestamp = frame
            .timestamp
            .unwrap_or_else(|| frame_timestamp(self.video_index, self.frame_rate.as_f64()) as i64);
        self.video_index += 1;
        let (frame, how) = transfer_video(frame, self.transfer);
        self.count_transfer(how);
        self.send(Command::AddVideoFrame { frame, timestamp })?;
        self.state = OperationState::Encoding;
        self.pump()
    }

    /// Submit one audio buffer. A missing timestamp follows the running
    /// sample-frame count.
    pub fn add_audio_data(&mut self, data: AudioData) -> EncodeResult<()> {
        if let Err(e) = self.check_accepting() {
            data.close();
            return Err(e);
        }
        let timestamp = data
            .timestamp
            .unwrap_or_else(|| audio_timestamp(self.audio_frames, data.sample_rate) as i64);
        self.audio_frames += data.number_of_frames() as u64;
        let (data, how) = transfer_audio(data, self.transfer);
        self.count_transfer(how);
        let (sample_rate, channels) = (data.sample_rate, data.channels);
        self.send(Command::AddAudioData {
            data,
            timestamp,
            sample_rate,
            channels,
        })?;
        self.state = OperationState::Encoding;
        self.pump()
    }

    pub fn add_sample(&mut self, sample: Sample) -> EncodeResult<()> {
        match sample {
            Sample::Video(frame) => self.add_video_frame(frame),
            Sample::Audio(data) => self.add_audio_data(data),
        }
    }

    /// Flush and finalize. Buffered output returns the file; streaming
    /// output returns `None` (the bytes went out as data chunks).
    pub fn finalize(&mut self) -> EncodeResult<Option<Vec<u8>>> {
        self.check_accepting()?;
        self.state = OperationState::Finalizing;
        self.send(Command::Finalize)?;
        loop {
            match self.next_event()? {
                Event::Finalized { output } => {
                    if self.cancel.is_cancelled() {
                        self.state = OperationState::Cancelled;
                        return Err(EncodeError::Cancelled);
                    }
                    self.state = OperationState::Done;
                    info!(
                        bytes = output.as_ref().map_or(0, Vec::len),
                        copies = self.copies,
                        "Encode operation finished"
                    );
                    return Ok(output);
                }
                other => self.dispatch(other)?,
            }
        }
    }

    /// Cancel from the owning thread.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.cancel.cancel();
        self.state = OperationState::Cancelled;
    }

    /// Report `error` once, cancel the worker and hand the error back.
    pub fn abort(&mut self, error: EncodeError) -> EncodeError {
        if self.failure.is_none() && !self.state.is_terminal() {
            self.observer.on_error(&error);
            self.failure = Some(error.clone());
            self.cancel.cancel();
            self.state = OperationState::Failed;
        }
        error
    }

    // -- internals ----------------------------------------------------------

    fn count_transfer(&mut self, how: Transfer) {
        if how == Transfer::Copied {
            self.copies += 1;
            if self.copies == 1 {
                debug!("Sample transfer fell back to copy");
            }
        }
    }

    fn check_open(&mut self) -> EncodeResult<()> {
        if self.cancel.is_cancelled() {
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            self.state = OperationState::Cancelled;
            return Err(EncodeError::Cancelled);
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(())
    }

    fn check_accepting(&mut self) -> EncodeResult<()> {
        self.check_open()?;
        match self.state {
            OperationState::Ready | OperationState::Encoding => Ok(()),
            state => Err(EncodeError::Internal(format!(
                "operation is not accepting samples in state {state:?}"
            ))),
        }
    }

    fn send(&mut self, command: Command) -> EncodeResult<()> {
        if let Err(e) = self.worker.send(command) {
            return Err(self.record_failure(e));
        }
        Ok(())
    }

    /// Blocking receive of the next event.
    fn next_event(&mut self) -> EncodeResult<Event> {
        if self.cancel.is_cancelled() && self.failure.is_none() {
            // Whatever is still in flight is discarded.
            self.state = OperationState::Cancelled;
            return Err(EncodeError::Cancelled);
        }
        match self.worker.events().recv() {
            Ok(event) => Ok(event),
            Err(_) => Err(self.record_failure(EncodeError::Worker(
                "encode worker disconnected".into(),
            ))),
        }
    }

    /// Dispatch every event already waiting, without blocking.
    fn pump(&mut self) -> EncodeResult<()> {
        loop {
            match self.worker.events().try_recv() {
                Ok(event) => self.dispatch(event)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(self.record_failure(EncodeError::Worker(
                        "encode worker disconnected".into(),
                    )))
                }
            }
        }
    }

    fn dispatch(&mut self, event: Event) -> EncodeResult<()> {
        let cancelled = self.cancel.is_cancelled();
        match event {
            Event::Progress { processed, total } if !cancelled => {
                self.observer.on_progress(processed, total);
            }
            Event::QueueSize {
                video_queue_size,
                audio_queue_size,
            } if !cancelled => {
                self.observer.on_queue_size(video_queue_size, audio_queue_size);
            }
            Event::DataChunk(chunk) if !cancelled => self.observer.on_data_chunk(chunk),
            Event::Progress { .. } | Event::QueueSize { .. } | Event::DataChunk(_) => {}
            Event::Error {
                message,
                kind,
                stack,
            } => {
                debug!(%kind, stack = stack.as_deref().unwrap_or("-"), "Worker reported error");
                return Err(self.record_failure(EncodeError::from_kind(kind, message)));
            }
            Event::Cancelled => {
                self.state = OperationState::Cancelled;
                return Err(EncodeError::Cancelled);
            }
            Event::Initialized { .. } | Event::Finalized { .. } => {
                debug!(tag = event.tag(), state = ?self.state, "Out-of-order event ignored");
            }
        }
        Ok(())
    }

    /// Move to `Failed` and notify the observer once.
    fn record_failure(&mut self, error: EncodeError) -> EncodeError {
        if error.is_cancelled() {
            self.state = OperationState::Cancelled;
            return error;
        }
        if self.failure.is_none() {
            self.observer.on_error(&error);
            self.failure = Some(error.clone());
        }
        self.state = OperationState::Failed;
        self.failure.clone().unwrap_or(error)
    }
}

impl Drop for EncodeOperation {
    fn drop(&mut self) {
        if !self.state.is_terminal() && self.state != OperationState::Idle {
            debug!(state = ?self.state, "Encode operation dropped before completion, cancelling");
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwarePlatform;
    use ek_common::{ErrorKind, LatencyMode, PixelFormat, Resolution};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorded {
        progress: Vec<u64>,
        chunks: Vec<DataChunk>,
        errors: Vec<ErrorKind>,
    }

    struct Recorder(Arc<Mutex<Recorded>>);

    impl EncodeObserver for Recorder {
        fn on_progress(&mut self, processed: u64, _total: Option<u64>) {
            self.0.lock().progress.push(processed);
        }

        fn on_data_chunk(&mut self, chunk: DataChunk) {
            self.0.lock().chunks.push(chunk);
        }

        fn on_error(&mut self, error: &EncodeError) {
            self.0.lock().errors.push(error.kind());
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame::new(vec![3u8; 32], PixelFormat::Rgba, Resolution::VGA)
    }

    fn video_only() -> EncoderConfig {
        let mut config = EncoderConfig::default();
        config.disable_audio();
        config
    }

    #[test]
    fn full_lifecycle() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let mut op = EncodeOperation::new(Arc::new(SoftwarePlatform::new()))
            .unwrap()
            .with_observer(Recorder(Arc::clone(&recorded)));
        assert_eq!(op.state(), OperationState::Idle);
        let codecs = op.start(video_only(), Some(3)).unwrap();
        assert_eq!(codecs.video, Some(VideoCodec::Avc));
        assert_eq!(codecs.audio, None);
        assert_eq!(op.state(), OperationState::Ready);

        for _ in 0..3 {
            op.add_video_frame(frame()).unwrap();
        }
        assert_eq!(op.state(), OperationState::Encoding);
        let output = op.finalize().unwrap().unwrap();
        assert!(!output.is_empty());
        assert_eq!(op.state(), OperationState::Done);
        assert_eq!(recorded.lock().progress, vec![1, 2, 3]);
        assert!(recorded.lock().chunks.is_empty());
    }

    #[test]
    fn streaming_finalize_returns_none() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let mut op = EncodeOperation::new(Arc::new(SoftwarePlatform::new()))
            .unwrap()
            .with_observer(Recorder(Arc::clone(&recorded)));
        let mut config = video_only();
        config.latency_mode = LatencyMode::Realtime;
        op.start(config, None).unwrap();
        for _ in 0..4 {
            op.add_video_frame(frame()).unwrap();
        }
        assert_eq!(op.finalize().unwrap(), None);
        let recorded = recorded.lock();
        assert!(!recorded.chunks.is_empty());
        assert!(recorded.chunks[0].is_header);
    }

    #[test]
    fn cancel_rejects_finalize() {
        let mut op = EncodeOperation::new(Arc::new(SoftwarePlatform::new())).unwrap();
        op.start(video_only(), None).unwrap();
        op.add_video_frame(frame()).unwrap();
        let handle = op.cancel_handle();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(op.finalize().unwrap_err(), EncodeError::Cancelled);
        assert_eq!(op.add_video_frame(frame()).unwrap_err(), EncodeError::Cancelled);
    }

    #[test]
    fn initialization_error_reported_once() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let platform = SoftwarePlatform::builder().force_audio_sample_rate(44_100).build();
        let mut op = EncodeOperation::new(Arc::new(platform))
            .unwrap()
            .with_observer(Recorder(Arc::clone(&recorded)));
        let err = op.start(EncoderConfig::default(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert_eq!(op.state(), OperationState::Failed);
        assert!(op.add_video_frame(frame()).is_err());
        assert!(op.finalize().is_err());
        assert_eq!(recorded.lock().errors, vec![ErrorKind::ConfigurationError]);
    }

    #[test]
    fn encoder_failure_surfaces_as_video_error() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let platform = SoftwarePlatform::builder().fail_video_at(0).build();
        let mut op = EncodeOperation::new(Arc::new(platform))
            .unwrap()
            .with_observer(Recorder(Arc::clone(&recorded)));
        op.start(video_only(), None).unwrap();
        let _ = op.add_video_frame(frame());
        let err = op.finalize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VideoEncodingError);
        assert_eq!(recorded.lock().errors.len(), 1);
    }
}
