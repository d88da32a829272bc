//! libav* toolkit built on `ffmpeg-next`.

mod audio;
mod decoder;
mod encoder;
mod hw;
mod scale;
pub(crate) mod util;

pub use audio::{FfmpegAudioDecoder, FfmpegAudioEncoder};
pub use decoder::FfmpegVideoDecoder;
pub use encoder::FfmpegVideoEncoder;
pub use hw::{FfmpegHwDevice, FfmpegHwFrames};
pub use scale::{FfmpegResampler, FfmpegScaler};

use ffmpeg_next::{decoder as ff_decoder, encoder as ff_encoder};

use crate::{
    CodecError,
    params::{
        AudioDecoderParams, AudioEncoderParams, HwFramesParams, VideoDecoderParams,
        VideoEncoderParams,
    },
    selector::HwDeviceType,
    toolkit::{AudioSpec, CodecLookup, FrameSpec, Toolkit},
};

/// Toolkit backed by the libavcodec/libswscale/libswresample installed on the host.
///
/// # Example
/// ```rust,no_run
/// use mediaflow_codec::prelude::*;
///
/// let toolkit = FfmpegToolkit::new().expect("ffmpeg init");
/// let choice = select_encoder(&toolkit, "avc1.42001f", HwPreference::NoPreference);
/// println!("{:?}", choice.map(|c| c.name));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FfmpegToolkit {
    _private: (),
}

impl FfmpegToolkit {
    pub fn new() -> Result<Self, CodecError> {
        util::init_ffmpeg()?;
        Ok(Self { _private: () })
    }
}

impl CodecLookup for FfmpegToolkit {
    fn has_encoder(&self, name: &str) -> bool {
        ff_encoder::find_by_name(name).is_some()
    }

    fn has_decoder(&self, name: &str) -> bool {
        ff_decoder::find_by_name(name).is_some()
    }
}

impl Toolkit for FfmpegToolkit {
    type HwDevice = FfmpegHwDevice;
    type HwFrames = FfmpegHwFrames;
    type VideoEncoder = FfmpegVideoEncoder;
    type VideoDecoder = FfmpegVideoDecoder;
    type AudioEncoder = FfmpegAudioEncoder;
    type AudioDecoder = FfmpegAudioDecoder;
    type Scaler = FfmpegScaler;
    type Resampler = FfmpegResampler;

    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn create_hw_device(&self, kind: HwDeviceType) -> Result<FfmpegHwDevice, CodecError> {
        FfmpegHwDevice::create(kind)
    }

    fn create_hw_frames(
        &self,
        device: &FfmpegHwDevice,
        params: &HwFramesParams,
    ) -> Result<FfmpegHwFrames, CodecError> {
        FfmpegHwFrames::create(device, params)
    }

    fn open_video_encoder(
        &self,
        params: &VideoEncoderParams,
        device: Option<&FfmpegHwDevice>,
        frames: Option<&FfmpegHwFrames>,
    ) -> Result<FfmpegVideoEncoder, CodecError> {
        FfmpegVideoEncoder::open(params, device, frames)
    }

    fn open_video_decoder(
        &self,
        params: &VideoDecoderParams,
        device: Option<&FfmpegHwDevice>,
    ) -> Result<FfmpegVideoDecoder, CodecError> {
        FfmpegVideoDecoder::open(params, device)
    }

    fn open_audio_encoder(
        &self,
        params: &AudioEncoderParams,
    ) -> Result<FfmpegAudioEncoder, CodecError> {
        FfmpegAudioEncoder::open(params)
    }

    fn open_audio_decoder(
        &self,
        params: &AudioDecoderParams,
    ) -> Result<FfmpegAudioDecoder, CodecError> {
        FfmpegAudioDecoder::open(params)
    }

    fn create_scaler(&self, src: &FrameSpec, dst: &FrameSpec) -> Result<FfmpegScaler, CodecError> {
        FfmpegScaler::new(src, dst)
    }

    fn create_resampler(
        &self,
        src: &AudioSpec,
        dst: &AudioSpec,
    ) -> Result<FfmpegResampler, CodecError> {
        FfmpegResampler::new(src, dst)
    }
}
