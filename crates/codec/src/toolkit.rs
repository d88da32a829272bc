//! The codec toolkit boundary.
//!
//! A [`Toolkit`] opens codec instances and conversion contexts. Every handle it returns is an
//! owned RAII value: dropping it releases the native resource. Encoders and decoders follow the
//! push/pull model: push one input (or `None` to signal end of stream), then pull until the codec
//! answers [`Pull::NeedInput`] or [`Pull::EndOfStream`].

use mediaflow_core::{
    audio::{AudioBuffer, SampleFormat},
    buffer::FrameLease,
    format::{PixelFormat, VideoColorSpace},
};

use crate::{
    CodecError,
    params::{
        AudioDecoderParams, AudioEncoderParams, HwFramesParams, VideoDecoderParams,
        VideoEncoderParams,
    },
    selector::HwDeviceType,
};

/// Registry probe: is an implementation with this name compiled into the toolkit?
///
/// Implementations must not open anything; some hardware codecs misbehave when opened just to
/// probe availability.
pub trait CodecLookup {
    fn has_encoder(&self, name: &str) -> bool;
    fn has_decoder(&self, name: &str) -> bool;
}

/// Result of a pull primitive. `NeedInput` and `EndOfStream` are not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    Ready(T),
    /// The codec wants more input before it can produce output.
    NeedInput,
    /// The codec has been drained after an end-of-stream push.
    EndOfStream,
}

impl<T> Pull<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Pull::Ready(v) => Some(v),
            _ => None,
        }
    }
}

/// Raw frame pushed into a video encoder.
#[derive(Debug, Clone, Copy)]
pub struct EncoderInput<'a> {
    pub frame: &'a FrameLease,
    /// Presentation timestamp in the encoder time base (microseconds).
    pub pts: i64,
    pub duration: i64,
    pub force_keyframe: bool,
}

/// Compressed packet pulled from an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub keyframe: bool,
    pub pts: i64,
    pub duration: i64,
}

/// Compressed packet pushed into a decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecoderInput<'a> {
    pub data: &'a [u8],
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
}

/// Geometry and layout of a raw video frame, used to key conversion contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSpec {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub color: VideoColorSpace,
}

impl FrameSpec {
    pub fn of(frame: &FrameLease) -> Self {
        Self {
            format: frame.pixel_format(),
            width: frame.width(),
            height: frame.height(),
            color: frame.meta().format.color,
        }
    }

    /// Same format and geometry; colour metadata is not compared.
    pub fn same_layout(&self, other: &FrameSpec) -> bool {
        self.format == other.format && self.width == other.width && self.height == other.height
    }
}

/// PCM layout, used to key resampler contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    pub fn of(buffer: &AudioBuffer) -> Self {
        Self {
            format: buffer.format(),
            sample_rate: buffer.sample_rate(),
            channels: buffer.channels(),
        }
    }
}

pub trait VideoEncoderBackend: Send {
    fn send_frame(&mut self, input: Option<EncoderInput<'_>>) -> Result<(), CodecError>;
    fn receive_packet(&mut self) -> Result<Pull<EncodedPacket>, CodecError>;
    /// Discard buffered state so the codec accepts a fresh stream.
    fn flush_buffers(&mut self) -> Result<(), CodecError>;
    /// Out-of-band codec configuration (e.g. avcC / hvcC), if any.
    fn extradata(&self) -> Option<Vec<u8>>;
    /// CPU-side pixel format frames must be converted to before `send_frame`.
    fn pixel_format(&self) -> PixelFormat;
}

pub trait VideoDecoderBackend: Send {
    fn send_packet(&mut self, input: Option<DecoderInput<'_>>) -> Result<(), CodecError>;
    /// Pull a decoded frame. Returned frames are owned copies of the codec's buffers.
    fn receive_frame(&mut self) -> Result<Pull<FrameLease>, CodecError>;
    fn flush_buffers(&mut self) -> Result<(), CodecError>;
}

pub trait AudioEncoderBackend: Send {
    fn send_frame(&mut self, input: Option<&AudioBuffer>) -> Result<(), CodecError>;
    fn receive_packet(&mut self) -> Result<Pull<EncodedPacket>, CodecError>;
    fn flush_buffers(&mut self) -> Result<(), CodecError>;
    /// Samples per channel the codec wants per frame; `None` for variable-size codecs.
    fn frame_size(&self) -> Option<usize>;
    fn sample_format(&self) -> SampleFormat;
    fn extradata(&self) -> Option<Vec<u8>>;
}

pub trait AudioDecoderBackend: Send {
    fn send_packet(&mut self, input: Option<DecoderInput<'_>>) -> Result<(), CodecError>;
    fn receive_frame(&mut self) -> Result<Pull<AudioBuffer>, CodecError>;
    fn flush_buffers(&mut self) -> Result<(), CodecError>;
}

/// Reusable pixel-format and size conversion context.
pub trait VideoScaler: Send {
    fn scale(&mut self, src: &FrameLease, dst: &mut FrameLease) -> Result<(), CodecError>;
}

/// Reusable sample-rate, channel and sample-format conversion context.
pub trait AudioResampler: Send {
    fn resample(&mut self, src: &AudioBuffer) -> Result<AudioBuffer, CodecError>;
}

/// An external media toolkit.
///
/// Sessions hold the returned handles in struct fields declared codec first, then frame pool,
/// then device, so that drop order releases them in that sequence.
pub trait Toolkit: CodecLookup + Send + Sync + 'static {
    type HwDevice: Send;
    type HwFrames: Send;
    type VideoEncoder: VideoEncoderBackend;
    type VideoDecoder: VideoDecoderBackend;
    type AudioEncoder: AudioEncoderBackend;
    type AudioDecoder: AudioDecoderBackend;
    type Scaler: VideoScaler;
    type Resampler: AudioResampler;

    /// Human-readable toolkit name for logs.
    fn name(&self) -> &'static str;

    fn create_hw_device(&self, kind: HwDeviceType) -> Result<Self::HwDevice, CodecError>;

    fn create_hw_frames(
        &self,
        device: &Self::HwDevice,
        params: &HwFramesParams,
    ) -> Result<Self::HwFrames, CodecError>;

    fn open_video_encoder(
        &self,
        params: &VideoEncoderParams,
        device: Option<&Self::HwDevice>,
        frames: Option<&Self::HwFrames>,
    ) -> Result<Self::VideoEncoder, CodecError>;

    fn open_video_decoder(
        &self,
        params: &VideoDecoderParams,
        device: Option<&Self::HwDevice>,
    ) -> Result<Self::VideoDecoder, CodecError>;

    fn open_audio_encoder(&self, params: &AudioEncoderParams)
    -> Result<Self::AudioEncoder, CodecError>;

    fn open_audio_decoder(&self, params: &AudioDecoderParams)
    -> Result<Self::AudioDecoder, CodecError>;

    fn create_scaler(&self, src: &FrameSpec, dst: &FrameSpec) -> Result<Self::Scaler, CodecError>;

    fn create_resampler(
        &self,
        src: &AudioSpec,
        dst: &AudioSpec,
    ) -> Result<Self::Resampler, CodecError>;
}

impl<T: CodecLookup + ?Sized> CodecLookup for std::sync::Arc<T> {
    fn has_encoder(&self, name: &str) -> bool {
        (**self).has_encoder(name)
    }

    fn has_decoder(&self, name: &str) -> bool {
        (**self).has_decoder(name)
    }
}
