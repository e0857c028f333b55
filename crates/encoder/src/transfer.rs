//! Moving sample buffers into the worker.
//!
//! A buffer crosses by move when the platform accepts transfer for its
//! sample kind and the pipeline holds the only reference. Otherwise the
//! bytes are copied; the copy costs memory, never correctness.

use ek_common::{AudioData, SampleData, TransferCapabilities, VideoFrame};

/// How a buffer crossed the boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    Moved,
    Copied,
}

fn cross(data: SampleData, allowed: bool) -> (SampleData, Transfer) {
    if allowed {
        let (bytes, copied) = data.into_vec();
        let how = if copied { Transfer::Copied } else { Transfer::Moved };
        return (SampleData::Owned(bytes), how);
    }
    (SampleData::Owned(data.as_slice().to_vec()), Transfer::Copied)
}

pub fn transfer_video(mut frame: VideoFrame, caps: TransferCapabilities) -> (VideoFrame, Transfer) {
    let (data, how) = cross(frame.data, caps.video_frames);
    frame.data = data;
    (frame, how)
}

pub fn transfer_audio(mut audio: AudioData, caps: TransferCapabilities) -> (AudioData, Transfer) {
    let (data, how) = cross(audio.data, caps.audio_data);
    audio.data = data;
    (audio, how)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ek_common::{PixelFormat, Resolution};
    use std::sync::Arc;

    fn frame(data: SampleData) -> VideoFrame {
        VideoFrame::new(data, PixelFormat::Rgba, Resolution::new(2, 2))
    }

    #[test]
    fn owned_buffer_moves() {
        let caps = TransferCapabilities::default();
        let (frame, how) = transfer_video(frame(vec![1; 16].into()), caps);
        assert_eq!(how, Transfer::Moved);
        assert_eq!(frame.data.len(), 16);
    }

    #[test]
    fn shared_buffer_still_referenced_is_copied() {
        let shared = Arc::new(vec![2u8; 16]);
        let (frame, how) = transfer_video(
            frame(Arc::clone(&shared).into()),
            TransferCapabilities::default(),
        );
        assert_eq!(how, Transfer::Copied);
        assert!(matches!(frame.data, SampleData::Owned(_)));
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn rejected_transfer_falls_back_to_copy() {
        let caps = TransferCapabilities {
            video_frames: true,
            audio_data: false,
        };
        let (audio, how) = transfer_audio(AudioData::silence(8, 48_000, 2), caps);
        assert_eq!(how, Transfer::Copied);
        assert_eq!(audio.number_of_frames(), 8);
    }
}
