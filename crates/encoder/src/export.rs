//! Top-level entry points: source in, container bytes out.
//!
//! ```text
//!   encode / encode_with
//!     SampleStream::open(source)
//!       └─ resolve_config(hints, options)
//!            └─ EncodeOperation::start ── add_sample* ── finalize
//!                                                        │
//!                 buffered: file bytes ◀─────────────────┤
//!                 streaming: data chunks, reassembled ◀──┘
//!
//!   encode_stream
//!     "encode-stream" thread runs the same loop and feeds a bounded
//!     channel; the returned ChunkStream blocks only when it is empty.
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use ek_common::{CodecPlatform, ContainerFormat, EncodeError, EncodeResult};
use ek_mux::{assemble, DataChunk};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::orchestrator::{CancelHandle, EncodeObserver, EncodeOperation, NullObserver};
use crate::resolve::{resolve_config, EncodeOptions};
use crate::source::{MediaSource, SampleStream};

/// Chunks buffered between the encode thread and a [`ChunkStream`] reader.
pub const STREAM_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Shared driver
// ---------------------------------------------------------------------------

/// Open, resolve, start, feed every sample, finalize.
fn drive(
    op: &mut EncodeOperation,
    source: MediaSource,
    options: &EncodeOptions,
    on_resolved: impl FnOnce(ContainerFormat),
) -> EncodeResult<Option<Vec<u8>>> {
    let mut stream = match SampleStream::open(source) {
        Ok(stream) => stream,
        Err(e) => return Err(op.abort(e.into())),
    };
    let config = resolve_config(stream.hints(), options);
    stream.set_frame_rate(config.frame_rate);
    let total = options.total_samples.or(stream.hints().total);
    on_resolved(config.container);

    let codecs = op.start(config, total)?;
    debug!(video = ?codecs.video, audio = ?codecs.audio, "Encode started");

    for item in stream {
        match item {
            Ok(sample) => op.add_sample(sample)?,
            Err(e) => {
                warn!(error = %e, "Source failed");
                return Err(op.abort(e.into()));
            }
        }
    }
    op.finalize()
}

/// Observer that keeps streaming chunks for reassembly and forwards to an
/// inner observer.
struct Collector<O> {
    inner: O,
    chunks: Arc<Mutex<Vec<DataChunk>>>,
}

impl<O: EncodeObserver> EncodeObserver for Collector<O> {
    fn on_progress(&mut self, processed: u64, total: Option<u64>) {
        self.inner.on_progress(processed, total);
    }

    fn on_queue_size(&mut self, video: usize, audio: usize) {
        self.inner.on_queue_size(video, audio);
    }

    fn on_data_chunk(&mut self, chunk: DataChunk) {
        self.chunks.lock().push(chunk.clone());
        self.inner.on_data_chunk(chunk);
    }

    fn on_error(&mut self, error: &EncodeError) {
        self.inner.on_error(error);
    }
}

// ---------------------------------------------------------------------------
// encode / encode_with
// ---------------------------------------------------------------------------

/// Encode `source` and return the complete container bytes.
pub fn encode(
    platform: Arc<dyn CodecPlatform>,
    source: impl Into<MediaSource>,
    options: &EncodeOptions,
) -> EncodeResult<Vec<u8>> {
    encode_with(platform, source, options, NullObserver)
}

/// Like [`encode`], reporting progress, queue sizes, data chunks and the
/// error (once) to `observer`.
pub fn encode_with<O>(
    platform: Arc<dyn CodecPlatform>,
    source: impl Into<MediaSource>,
    options: &EncodeOptions,
    observer: O,
) -> EncodeResult<Vec<u8>>
where
    O: EncodeObserver + 'static,
{
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let mut op = EncodeOperation::new(platform)?.with_observer(Collector {
        inner: observer,
        chunks: Arc::clone(&chunks),
    });
    let output = drive(&mut op, source.into(), options, |_| {})?;
    let bytes = match output {
        Some(file) => file,
        None => assemble(&chunks.lock()),
    };
    info!(bytes = bytes.len(), "Encode complete");
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// encode_stream
// ---------------------------------------------------------------------------

/// Forwards data chunks into the stream channel. Blocks while it is full.
struct ChannelObserver {
    tx: Sender<EncodeResult<DataChunk>>,
}

impl EncodeObserver for ChannelObserver {
    fn on_data_chunk(&mut self, chunk: DataChunk) {
        // A closed channel means the reader is gone and has cancelled.
        let _ = self.tx.send(Ok(chunk));
    }
}

/// Blocking iterator over encoded output. Dropping it cancels the encode.
pub struct ChunkStream {
    rx: Receiver<EncodeResult<DataChunk>>,
    cancel: CancelHandle,
    thread: Option<JoinHandle<()>>,
    finished: bool,
}

impl ChunkStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Iterator for ChunkStream {
    type Item = EncodeResult<DataChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(item) => {
                if item.is_err() {
                    self.finished = true;
                }
                Some(item)
            }
            Err(_) => {
                self.finished = true;
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        return Some(Err(EncodeError::Internal(
                            "encode-stream thread panicked".into(),
                        )));
                    }
                }
                None
            }
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Chunk stream dropped early, cancelling encode");
            self.cancel.cancel();
        }
        // The producer thread exits on its own once it sees the cancel or
        // the closed channel; it is not joined here.
    }
}

/// Encode on a background thread and hand the output out as it is produced.
///
/// Streaming mode yields the header range first, then media ranges.
/// Buffered mode yields one chunk holding the whole file.
pub fn encode_stream(
    platform: Arc<dyn CodecPlatform>,
    source: impl Into<MediaSource>,
    options: &EncodeOptions,
) -> EncodeResult<ChunkStream> {
    let (tx, rx) = channel::bounded(STREAM_CAPACITY);
    let mut op = EncodeOperation::new(platform)?.with_observer(ChannelObserver { tx: tx.clone() });
    let cancel = op.cancel_handle();
    let source = source.into();
    let options = options.clone();

    let thread = std::thread::Builder::new()
        .name("encode-stream".into())
        .spawn(move || {
            let mut container = ContainerFormat::default();
            let result = drive(&mut op, source, &options, |c| container = c);
            match result {
                Ok(Some(file)) => {
                    let _ = tx.send(Ok(DataChunk {
                        bytes: file,
                        is_header: false,
                        byte_offset: 0,
                        container,
                    }));
                }
                Ok(None) => {}
                Err(e) if e.is_cancelled() => debug!("Encode stream cancelled"),
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            }
        })
        .map_err(|e| EncodeError::Worker(format!("failed to spawn encode-stream thread: {e}")))?;

    Ok(ChunkStream {
        rx,
        cancel,
        thread: Some(thread),
        finished: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwarePlatform;
    use ek_common::{PixelFormat, Resolution, Sample, VideoFrame};

    fn frames(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|_| VideoFrame::new(vec![5u8; 32], PixelFormat::Rgba, Resolution::VGA).into())
            .collect()
    }

    fn platform() -> Arc<dyn CodecPlatform> {
        Arc::new(SoftwarePlatform::new())
    }

    #[test]
    fn encode_returns_file() {
        let bytes = encode(platform(), frames(5), &EncodeOptions::default()).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
    }

    #[test]
    fn streaming_encode_reassembles() {
        let options = EncodeOptions::from_json(r#"{ "latencyMode": "realtime" }"#).unwrap();
        let bytes = encode(platform(), frames(5), &options).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        assert!(bytes.windows(4).any(|w| w == b"moof"));
    }

    #[test]
    fn encode_stream_buffered_yields_one_chunk() {
        let chunks: Vec<DataChunk> = encode_stream(platform(), frames(3), &EncodeOptions::default())
            .unwrap()
            .collect::<EncodeResult<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].byte_offset, 0);
        assert_eq!(chunks[0].container, ContainerFormat::Mp4);
    }

    #[test]
    fn encode_stream_realtime_offsets_are_contiguous() {
        let options =
            EncodeOptions::from_json(r#"{ "latencyMode": "realtime", "container": "webm" }"#)
                .unwrap();
        let chunks: Vec<DataChunk> = encode_stream(platform(), frames(6), &options)
            .unwrap()
            .collect::<EncodeResult<_>>()
            .unwrap();
        assert!(chunks[0].is_header);
        let mut offset = 0;
        for chunk in &chunks {
            assert_eq!(chunk.byte_offset, offset);
            offset += chunk.bytes.len() as u64;
        }
    }

    #[test]
    fn source_error_is_reported() {
        use crate::error::SourceError;
        use ek_common::{ErrorKind, TrackKind};

        let items = vec![
            Ok(VideoFrame::new(vec![0u8; 8], PixelFormat::Rgba, Resolution::VGA).into()),
            Err(SourceError::Read {
                track: TrackKind::Video,
                reason: "truncated".into(),
            }),
        ];
        let err = encode(platform(), MediaSource::try_lazy(items), &EncodeOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VideoEncodingError);
        assert!(err.message().contains("truncated"));
    }
}
