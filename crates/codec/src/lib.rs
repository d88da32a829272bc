#![doc = include_str!("../README.md")]

/// Errors raised at the codec toolkit boundary.
///
/// # Example
/// ```rust
/// use mediaflow_codec::CodecError;
///
/// let err = CodecError::NotFound("h264_nvenc".into());
/// assert_eq!(err.to_string(), "codec implementation not found: h264_nvenc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// No implementation registered under the requested name.
    #[error("codec implementation not found: {0}")]
    NotFound(String),
    /// Opening a codec instance failed.
    #[error("codec open failed: {0}")]
    Open(String),
    /// Push/pull or flush failure reported by the codec.
    #[error("codec error: {0}")]
    Codec(String),
    /// Frame, packet or context allocation failed.
    #[error("allocation failed: {0}")]
    Allocation(String),
    /// The request is valid but this toolkit cannot serve it.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Hardware device or frame-pool setup failed.
    #[error("hardware setup failed: {0}")]
    Hardware(String),
}

impl From<mediaflow_core::format::FormatError> for CodecError {
    fn from(err: mediaflow_core::format::FormatError) -> Self {
        CodecError::Codec(err.to_string())
    }
}

pub mod convert;
#[cfg(feature = "codec-ffmpeg")]
pub mod ffmpeg;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod params;
pub mod selector;
pub mod toolkit;

pub mod prelude {
    #[cfg(feature = "codec-ffmpeg")]
    pub use crate::ffmpeg::FfmpegToolkit;
    #[cfg(feature = "loopback")]
    pub use crate::loopback::{Failure, LoopbackToolkit};
    pub use crate::{
        CodecError,
        convert::{AudioConverter, VideoConverter},
        params::{
            AudioDecoderParams, AudioEncoderParams, CodecOptions, HwFramesParams, RateControl,
            VideoDecoderParams, VideoEncoderParams,
        },
        selector::{
            CodecFamily, DecoderChoice, EncoderChoice, HwAccel, HwDeviceType, HwPreference,
            select_decoder, select_encoder,
        },
        toolkit::{
            AudioDecoderBackend, AudioEncoderBackend, AudioResampler, AudioSpec, CodecLookup,
            DecoderInput, EncodedPacket, EncoderInput, FrameSpec, Pull, Toolkit,
            VideoDecoderBackend, VideoEncoderBackend, VideoScaler,
        },
    };
    pub use mediaflow_core::prelude::*;
}
