use mediaflow_core::{audio::AudioBuffer, buffer::FrameLease};

/// Compressed output of an encoder, and input of a decoder.
///
/// # Example
/// ```rust
/// use mediaflow::prelude::*;
///
/// let chunk = EncodedChunk::key(vec![0, 0, 0, 1], 0).with_duration(33_333);
/// assert!(chunk.keyframe);
/// assert_eq!(chunk.end_us(), 33_333);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub keyframe: bool,
    pub timestamp_us: i64,
    pub duration_us: i64,
    /// Codec header bytes (avcC, OpusHead, ...) attached to keyframes when the codec has them.
    pub extradata: Option<Vec<u8>>,
}

impl EncodedChunk {
    pub fn key(data: Vec<u8>, timestamp_us: i64) -> Self {
        Self {
            data,
            keyframe: true,
            timestamp_us,
            duration_us: 0,
            extradata: None,
        }
    }

    pub fn delta(data: Vec<u8>, timestamp_us: i64) -> Self {
        Self {
            keyframe: false,
            ..Self::key(data, timestamp_us)
        }
    }

    pub fn with_duration(mut self, duration_us: i64) -> Self {
        self.duration_us = duration_us;
        self
    }

    pub fn end_us(&self) -> i64 {
        self.timestamp_us + self.duration_us
    }
}

/// A decoded picture. The frame is an owned copy; the codec's buffers are not shared.
#[derive(Debug)]
pub struct DecodedFrame {
    pub frame: FrameLease,
    pub timestamp_us: i64,
    pub duration_us: i64,
}

/// Decoded PCM, interleaved `f32`.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub buffer: AudioBuffer,
    pub timestamp_us: i64,
    pub duration_us: i64,
}

/// Per-frame encode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub keyframe: bool,
}

impl EncodeOptions {
    pub fn keyframe() -> Self {
        Self { keyframe: true }
    }
}
