//! Raw input samples: video frames and interleaved audio.
//!
//! A sample is owned by exactly one stage at a time. Handing it to an encoder
//! moves it; `close` consumes it, so a sample can never be released twice.

use std::sync::Arc;

use crate::types::{Resolution, TrackKind};

/// Pixel layout of a raw video frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    #[default]
    Rgba,
    Bgra,
    /// Planar YUV 4:2:0.
    I420,
    /// Semi-planar YUV 4:2:0.
    Nv12,
}

impl PixelFormat {
    /// Bytes needed for one frame of `resolution`.
    pub fn frame_size(self, resolution: Resolution) -> usize {
        let pixels = resolution.pixel_count() as usize;
        match self {
            Self::Rgba | Self::Bgra => pixels * 4,
            Self::I420 | Self::Nv12 => {
                let chroma_w = (resolution.width as usize).div_ceil(2);
                let chroma_h = (resolution.height as usize).div_ceil(2);
                pixels + 2 * chroma_w * chroma_h
            }
        }
    }
}

/// Sample payload. A `Shared` buffer may still be referenced by the caller.
#[derive(Clone, Debug)]
pub enum SampleData {
    Owned(Vec<u8>),
    Shared(Arc<Vec<u8>>),
}

impl SampleData {
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Owned(v) => v,
            Self::Shared(v) => v.as_slice(),
        }
    }

    /// Whether handing this buffer over moves it instead of copying.
    pub fn is_transferable(&self) -> bool {
        match self {
            Self::Owned(_) => true,
            Self::Shared(arc) => Arc::strong_count(arc) == 1,
        }
    }

    /// Take the bytes by move when possible, by copy otherwise.
    /// The flag is `true` when a copy was made.
    pub fn into_vec(self) -> (Vec<u8>, bool) {
        match self {
            Self::Owned(v) => (v, false),
            Self::Shared(arc) => match Arc::try_unwrap(arc) {
                Ok(v) => (v, false),
                Err(arc) => (arc.as_ref().clone(), true),
            },
        }
    }
}

impl From<Vec<u8>> for SampleData {
    fn from(v: Vec<u8>) -> Self {
        Self::Owned(v)
    }
}

impl From<Arc<Vec<u8>>> for SampleData {
    fn from(v: Arc<Vec<u8>>) -> Self {
        Self::Shared(v)
    }
}

/// One raw video frame.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub data: SampleData,
    pub format: PixelFormat,
    pub resolution: Resolution,
    /// Presentation time in microseconds, if the producer knows it.
    pub timestamp: Option<i64>,
    /// Duration in microseconds.
    pub duration: Option<u64>,
}

impl VideoFrame {
    pub fn new(data: impl Into<SampleData>, format: PixelFormat, resolution: Resolution) -> Self {
        Self {
            data: data.into(),
            format,
            resolution,
            timestamp: None,
            duration: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Release the frame's buffer.
    pub fn close(self) {}
}

/// Interleaved 32-bit float PCM, stored little-endian.
#[derive(Clone, Debug)]
pub struct AudioData {
    pub data: SampleData,
    pub sample_rate: u32,
    pub channels: u16,
    /// Presentation time in microseconds, if known.
    pub timestamp: Option<i64>,
}

impl AudioData {
    pub fn from_f32(samples: &[f32], sample_rate: u32, channels: u16) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            data: SampleData::Owned(bytes),
            sample_rate,
            channels,
            timestamp: None,
        }
    }

    /// `frames` frames of silence.
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            data: SampleData::Owned(vec![0; frames * channels as usize * 4]),
            sample_rate,
            channels,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sample frames (one value per channel) in this buffer.
    pub fn number_of_frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / 4 / self.channels as usize
    }

    /// Duration in microseconds.
    pub fn duration(&self) -> u64 {
        crate::types::audio_timestamp(self.number_of_frames() as u64, self.sample_rate)
    }

    pub fn close(self) {}
}

/// A sample of either kind.
#[derive(Clone, Debug)]
pub enum Sample {
    Video(VideoFrame),
    Audio(AudioData),
}

impl Sample {
    pub fn track(&self) -> TrackKind {
        match self {
            Self::Video(_) => TrackKind::Video,
            Self::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Video(f) => f.timestamp,
            Self::Audio(a) => a.timestamp,
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Self::Video(f) => f.data.len(),
            Self::Audio(a) => a.data.len(),
        }
    }

    pub fn close(self) {
        match self {
            Self::Video(f) => f.close(),
            Self::Audio(a) => a.close(),
        }
    }
}

impl From<VideoFrame> for Sample {
    fn from(f: VideoFrame) -> Self {
        Self::Video(f)
    }
}

impl From<AudioData> for Sample {
    fn from(a: AudioData) -> Self {
        Self::Audio(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_data_moves_without_copy() {
        let data = SampleData::Owned(vec![1, 2, 3]);
        assert!(data.is_transferable());
        let (bytes, copied) = data.into_vec();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert!(!copied);
    }

    #[test]
    fn shared_data_falls_back_to_clone() {
        let arc = Arc::new(vec![9u8; 16]);
        let data = SampleData::Shared(arc.clone());
        assert!(!data.is_transferable());
        let (bytes, copied) = data.into_vec();
        assert!(copied);
        assert_eq!(bytes.len(), 16);
        assert_eq!(arc.len(), 16);
    }

    #[test]
    fn last_shared_reference_is_moved() {
        let data = SampleData::Shared(Arc::new(vec![0u8; 4]));
        let (_, copied) = data.into_vec();
        assert!(!copied);
    }

    #[test]
    fn audio_frame_count() {
        let audio = AudioData::from_f32(&[0.0; 2048], 48_000, 2);
        assert_eq!(audio.number_of_frames(), 1024);
        assert_eq!(audio.duration(), 21_333);
    }

    #[test]
    fn yuv_frame_size() {
        assert_eq!(PixelFormat::I420.frame_size(Resolution::new(4, 4)), 24);
        assert_eq!(PixelFormat::Rgba.frame_size(Resolution::new(4, 4)), 64);
    }
}
