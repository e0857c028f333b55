//! The execution context: one thread running the encode state machine.
//!
//! ```text
//!   controller                         encode-worker thread
//!   ──────────                         ────────────────────
//!   commands (bounded) ─────────────▶  ┌ control checked first ┐
//!   control  (bounded 1, cancel) ───▶  │ select! both lanes    │──▶ EncodeSession
//!   events   (unbounded) ◀───────────  └ backoff waits on control ┘
//! ```
//!
//! Once a cancel or a fatal error has been handled the worker is halted:
//! later commands are ignored and any samples they carry are released.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use ek_common::{CodecPlatform, EncodeError, EncodeResult, EncoderConfig};
use tracing::{debug, error, info, warn};

use crate::protocol::{Command, Event};
use crate::session::{EncodeSession, Submission};

/// Commands that may be queued ahead of the worker.
pub const COMMAND_CAPACITY: usize = 8;

const ENCODE_WORKER_THREAD: &str = "encode-worker";

/// Controller-side endpoints of one worker.
pub struct WorkerHandle {
    commands: Option<Sender<Command>>,
    control: Sender<Command>,
    events: Receiver<Event>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the worker thread for `platform`.
    pub fn spawn(platform: Arc<dyn CodecPlatform>) -> EncodeResult<Self> {
        let (command_tx, command_rx) = channel::bounded(COMMAND_CAPACITY);
        let (control_tx, control_rx) = channel::bounded(1);
        let (event_tx, event_rx) = channel::unbounded();

        let thread = std::thread::Builder::new()
            .name(ENCODE_WORKER_THREAD.into())
            .spawn(move || {
                let mut worker = Worker {
                    platform,
                    session: None,
                    events: event_tx,
                    control: control_rx,
                    halted: false,
                    current: "idle",
                };
                worker.run(command_rx);
            })
            .map_err(|e| EncodeError::Worker(format!("failed to spawn encode worker: {e}")))?;

        Ok(Self {
            commands: Some(command_tx),
            control: control_tx,
            events: event_rx,
            thread: Some(thread),
        })
    }

    /// Send a command, blocking while the command lane is full.
    pub fn send(&self, command: Command) -> EncodeResult<()> {
        let Some(commands) = &self.commands else {
            command.release();
            return Err(EncodeError::Worker("worker already shut down".into()));
        };
        commands.send(command).map_err(|err| {
            err.into_inner().release();
            EncodeError::Worker("encode worker exited".into())
        })
    }

    /// Sender for the priority lane. Cancels sent here overtake queued
    /// commands.
    pub fn control(&self) -> Sender<Command> {
        self.control.clone()
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }
}

/// Request a cancel on the priority lane. A full lane already holds one.
pub fn send_cancel(control: &Sender<Command>) {
    match control.try_send(Command::Cancel) {
        Ok(()) | Err(TrySendError::Full(_)) => {}
        Err(TrySendError::Disconnected(_)) => debug!("Cancel after worker exit"),
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Closing the command lane ends the worker loop.
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Encode worker thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

struct Worker {
    platform: Arc<dyn CodecPlatform>,
    session: Option<EncodeSession>,
    events: Sender<Event>,
    control: Receiver<Command>,
    halted: bool,
    /// Tag of the command being handled.
    current: &'static str,
}

impl Worker {
    fn run(&mut self, commands: Receiver<Command>) {
        debug!("Encode worker started");
        let mut control = self.control.clone();
        loop {
            if let Ok(command) = control.try_recv() {
                self.handle(command);
                continue;
            }
            crossbeam::select! {
                recv(control) -> msg => match msg {
                    Ok(command) => self.handle(command),
                    // Controller dropped the control lane; keep serving commands.
                    Err(_) => control = channel::never(),
                },
                recv(commands) -> msg => match msg {
                    Ok(command) => self.handle(command),
                    Err(_) => break,
                },
            }
        }
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
        debug!("Encode worker stopped");
    }

    fn emit(&self, event: Event) {
        let tag = event.tag();
        if self.events.send(event).is_err() {
            debug!(tag, "Event dropped, controller gone");
        }
    }

    fn handle(&mut self, command: Command) {
        if self.halted {
            debug!(tag = command.tag(), "Ignoring command after halt");
            command.release();
            return;
        }
        self.current = command.tag();
        match command {
            Command::Initialize {
                config,
                total_samples,
            } => self.initialize(&config, total_samples),
            Command::AddVideoFrame {
                mut frame,
                timestamp,
            } => {
                frame.timestamp = Some(timestamp);
                self.submit(|session, wait| session.submit_video(frame, wait));
            }
            Command::AddAudioData {
                mut data,
                timestamp,
                sample_rate,
                channels,
            } => {
                if data.sample_rate != sample_rate || data.channels != channels {
                    data.close();
                    self.fail(EncodeError::AudioEncoding(format!(
                        "audio envelope says {sample_rate} Hz / {channels} ch, data is not"
                    )));
                    return;
                }
                data.timestamp = Some(timestamp);
                self.submit(|session, wait| session.submit_audio(data, wait));
            }
            Command::Finalize => self.finalize(),
            Command::Cancel => self.cancel(),
        }
    }

    fn initialize(&mut self, config: &EncoderConfig, total: Option<u64>) {
        if let Some(mut previous) = self.session.take() {
            info!("Re-initialize: tearing down previous session");
            previous.teardown();
        }
        match EncodeSession::initialize(self.platform.as_ref(), config, total) {
            Ok(session) => {
                self.emit(Event::Initialized {
                    actual_video_codec: session.actual_video_codec(),
                    actual_audio_codec: session.actual_audio_codec(),
                });
                self.session = Some(session);
            }
            Err(e) => self.fail(e),
        }
    }

    fn submit<F>(&mut self, submit: F)
    where
        F: FnOnce(&mut EncodeSession, &mut dyn FnMut(Duration) -> bool) -> EncodeResult<Submission>,
    {
        let Some(session) = self.session.as_mut() else {
            self.fail(EncodeError::Internal("sample received before initialize".into()));
            return;
        };

        // Backoff sleeps listen on the control lane so a cancel cuts them short.
        let control = &self.control;
        let mut wait = |delay: Duration| match control.recv_timeout(delay) {
            Ok(Command::Cancel) => true,
            Ok(other) => {
                warn!(tag = other.tag(), "Unexpected command on control lane");
                other.release();
                false
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(delay);
                false
            }
        };

        let result = submit(session, &mut wait);
        match result {
            Ok(Submission::Accepted) => {
                let progress = Event::Progress {
                    processed: session.processed(),
                    total: session.total(),
                };
                let (video, audio) = session.queue_sizes();
                let chunks = session.take_data_chunks();
                self.emit(progress);
                self.emit(Event::QueueSize {
                    video_queue_size: video,
                    audio_queue_size: audio,
                });
                for chunk in chunks {
                    self.emit(Event::DataChunk(chunk));
                }
            }
            Ok(Submission::Dropped) => {
                let (video, audio) = session.queue_sizes();
                self.emit(Event::QueueSize {
                    video_queue_size: video,
                    audio_queue_size: audio,
                });
            }
            Ok(Submission::TrackDisabled) => {}
            Ok(Submission::Interrupted) => self.cancel(),
            Err(e) => self.fail(e),
        }
    }

    fn finalize(&mut self) {
        let Some(mut session) = self.session.take() else {
            self.fail(EncodeError::Internal("finalize received before initialize".into()));
            return;
        };
        match session.finalize() {
            Ok(finished) => {
                for chunk in finished.trailing {
                    self.emit(Event::DataChunk(chunk));
                }
                self.emit(Event::Finalized {
                    output: finished.output,
                });
                self.halted = true;
            }
            Err(e) => {
                session.teardown();
                self.fail(e);
            }
        }
    }

    fn cancel(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
        self.halted = true;
        info!("Encode cancelled");
        self.emit(Event::Cancelled);
    }

    fn fail(&mut self, err: EncodeError) {
        error!(kind = %err.kind(), error = %err, "Encode failed");
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
        self.halted = true;
        let stack = format!("{} in {}", self.current, ENCODE_WORKER_THREAD);
        self.emit(Event::error(&err, Some(stack)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwarePlatform;
    use ek_common::{AudioData, ErrorKind, PixelFormat, Resolution, VideoCodec, VideoFrame};

    fn recv(handle: &WorkerHandle) -> Event {
        handle
            .events()
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
    }

    fn initialize(handle: &WorkerHandle, config: EncoderConfig) {
        handle
            .send(Command::Initialize {
                config: Box::new(config),
                total_samples: Some(2),
            })
            .unwrap();
    }

    fn video(ts: i64) -> Command {
        Command::AddVideoFrame {
            frame: VideoFrame::new(vec![0u8; 16], PixelFormat::Rgba, Resolution::VGA),
            timestamp: ts,
        }
    }

    #[test]
    fn initialize_reports_actual_codecs() {
        let handle = WorkerHandle::spawn(Arc::new(SoftwarePlatform::new())).unwrap();
        initialize(&handle, EncoderConfig::default());
        match recv(&handle) {
            Event::Initialized {
                actual_video_codec,
                actual_audio_codec,
            } => {
                assert_eq!(actual_video_codec, Some(VideoCodec::Avc));
                assert!(actual_audio_codec.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn accepted_sample_reports_progress_then_queue_size() {
        let handle = WorkerHandle::spawn(Arc::new(SoftwarePlatform::new())).unwrap();
        let mut config = EncoderConfig::default();
        config.disable_audio();
        initialize(&handle, config);
        assert_eq!(recv(&handle).tag(), "initialized");
        handle.send(video(0)).unwrap();
        match recv(&handle) {
            Event::Progress { processed, total } => {
                assert_eq!(processed, 1);
                assert_eq!(total, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(recv(&handle).tag(), "queueSize");
        handle.send(Command::Finalize).unwrap();
        loop {
            match recv(&handle) {
                Event::Finalized { output } => {
                    assert!(output.is_some());
                    break;
                }
                Event::DataChunk(_) => panic!("buffered mode emitted a data chunk"),
                _ => {}
            }
        }
    }

    #[test]
    fn sample_before_initialize_is_internal_error() {
        let handle = WorkerHandle::spawn(Arc::new(SoftwarePlatform::new())).unwrap();
        handle.send(video(0)).unwrap();
        match recv(&handle) {
            Event::Error { kind, stack, .. } => {
                assert_eq!(kind, ErrorKind::InternalError);
                assert_eq!(stack.as_deref(), Some("addVideoFrame in encode-worker"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancel_halts_the_worker() {
        let handle = WorkerHandle::spawn(Arc::new(SoftwarePlatform::new())).unwrap();
        initialize(&handle, EncoderConfig::default());
        assert_eq!(recv(&handle).tag(), "initialized");
        send_cancel(&handle.control());
        assert_eq!(recv(&handle).tag(), "cancelled");

        handle.send(video(0)).unwrap();
        handle
            .send(Command::AddAudioData {
                data: AudioData::silence(1024, 48_000, 2),
                timestamp: 0,
                sample_rate: 48_000,
                channels: 2,
            })
            .unwrap();
        handle.send(Command::Finalize).unwrap();
        assert!(handle
            .events()
            .recv_timeout(Duration::from_millis(200))
            .is_err());
    }

    #[test]
    fn unsupported_configuration_reports_error() {
        let platform = SoftwarePlatform::builder()
            .video_codecs(&[])
            .audio_codecs(&[])
            .build();
        let handle = WorkerHandle::spawn(Arc::new(platform)).unwrap();
        initialize(&handle, EncoderConfig::default());
        match recv(&handle) {
            Event::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotSupported),
            other => panic!("unexpected {other:?}"),
        }
    }
}
