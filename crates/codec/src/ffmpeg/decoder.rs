use std::collections::VecDeque;

use ffmpeg_next::{
    codec, decoder,
    error::Error as FfmpegError,
    ffi::{AV_INPUT_BUFFER_PADDING_SIZE, av_hwframe_transfer_data, av_mallocz},
    frame::Video as FfFrame,
    packet::{self, Packet},
    software::scaling::{context::Context as ScalingContext, flag::Flags},
    util::format::pixel::Pixel,
};
use mediaflow_core::{
    buffer::{BufferPool, FrameLease, FrameMeta},
    format::{MediaFormat, PixelFormat, Resolution, VideoColorSpace},
};

use super::{
    hw::{BufferRef, FfmpegHwDevice},
    util::{SendSync, alloc_video_frame, ff_err, from_av_pixel, is_again, read_frame},
};
use crate::{
    CodecError,
    params::VideoDecoderParams,
    toolkit::{DecoderInput, Pull, VideoDecoderBackend},
};

/// Converts decoded layouts the frame model cannot hold (10-bit, YUYV, ...) into I420.
struct Fallback {
    src: (Pixel, u32, u32),
    scaler: SendSync<ScalingContext>,
    scratch: SendSync<FfFrame>,
}

/// libavcodec video decoder. Hardware surfaces are downloaded before copying out.
pub struct FfmpegVideoDecoder {
    decoder: SendSync<decoder::Video>,
    implementation: String,
    pool: BufferPool,
    fallback: Option<Fallback>,
    ready: VecDeque<FrameLease>,
    _device: Option<BufferRef>,
}

/// Copy `extradata` into an FFmpeg-owned, padded allocation attached to the context.
pub(crate) unsafe fn set_extradata(
    ctx: *mut ffmpeg_next::ffi::AVCodecContext,
    data: &[u8],
) -> Result<(), CodecError> {
    let padded = data.len() + AV_INPUT_BUFFER_PADDING_SIZE as usize;
    unsafe {
        let buf = av_mallocz(padded) as *mut u8;
        if buf.is_null() {
            return Err(CodecError::Allocation("extradata allocation failed".into()));
        }
        std::ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len());
        (*ctx).extradata = buf;
        (*ctx).extradata_size = data.len() as i32;
    }
    Ok(())
}

impl FfmpegVideoDecoder {
    pub(crate) fn open(
        params: &VideoDecoderParams,
        device: Option<&FfmpegHwDevice>,
    ) -> Result<Self, CodecError> {
        let codec = decoder::find_by_name(&params.implementation)
            .ok_or_else(|| CodecError::NotFound(params.implementation.clone()))?;
        let device = device.map(|d| d.buf.try_clone()).transpose()?;
        let mut ctx = codec::Context::new_with_codec(codec);
        if params.threads > 0 {
            ctx.set_threading(codec::threading::Config {
                kind: codec::threading::Type::Frame,
                count: params.threads as usize,
            });
        }
        unsafe {
            let raw = ctx.as_mut_ptr();
            if let Some((w, h)) = params.size {
                (*raw).width = w as i32;
                (*raw).height = h as i32;
            }
            if let Some(extradata) = params.extradata.as_deref()
                && !extradata.is_empty()
            {
                set_extradata(raw, extradata)?;
            }
            if let Some(device) = &device {
                (*raw).hw_device_ctx = device.new_ref()?;
            }
        }
        let decoder = ctx
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(|e| CodecError::Open(format!("{}: {e}", params.implementation)))?;
        Ok(Self {
            decoder: SendSync(decoder),
            implementation: params.implementation.clone(),
            pool: BufferPool::with_limits(0, 0, 8),
            fallback: None,
            ready: VecDeque::new(),
            _device: device,
        })
    }

    fn pull(&mut self) -> Result<Pull<FrameLease>, CodecError> {
        let mut frame = FfFrame::empty();
        match self.decoder.0.receive_frame(&mut frame) {
            Ok(()) => self.copy_out(frame).map(Pull::Ready),
            Err(err) if is_again(&err) => Ok(Pull::NeedInput),
            Err(FfmpegError::Eof) => Ok(Pull::EndOfStream),
            Err(err) => Err(ff_err("receive_frame")(err)),
        }
    }

    fn copy_out(&mut self, frame: FfFrame) -> Result<FrameLease, CodecError> {
        let pool = self.pool.clone();
        let pts = frame.pts().unwrap_or(0);
        let duration = unsafe { (*frame.as_ptr()).duration };
        let mut frame = frame;
        if unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() } {
            let mut sw = FfFrame::empty();
            let ret = unsafe { av_hwframe_transfer_data(sw.as_mut_ptr(), frame.as_ptr(), 0) };
            if ret < 0 {
                return Err(CodecError::Hardware(format!(
                    "av_hwframe_transfer_data failed: {}",
                    FfmpegError::from(ret)
                )));
            }
            frame = sw;
        }
        let (w, h) = (frame.width(), frame.height());
        let (format, source) = match from_av_pixel(frame.format()) {
            Some(fmt) => (fmt, &frame),
            None => (PixelFormat::I420, self.to_i420(&frame)?),
        };
        let resolution = Resolution::new(w, h)
            .ok_or_else(|| CodecError::Codec("decoder produced an empty frame".into()))?;
        let meta = FrameMeta::new(
            MediaFormat::new(format, resolution, VideoColorSpace::default()),
            pts,
        )
        .with_duration(duration);
        read_frame(source, &pool, meta)
    }

    fn to_i420(&mut self, frame: &FfFrame) -> Result<&FfFrame, CodecError> {
        let key = (frame.format(), frame.width(), frame.height());
        if self.fallback.as_ref().is_none_or(|f| f.src != key) {
            let scaler = ScalingContext::get(
                key.0,
                key.1,
                key.2,
                Pixel::YUV420P,
                key.1,
                key.2,
                Flags::BILINEAR,
            )
            .map_err(ff_err("scaler init"))?;
            self.fallback = Some(Fallback {
                src: key,
                scaler: SendSync(scaler),
                scratch: SendSync(alloc_video_frame(Pixel::YUV420P, key.1, key.2)),
            });
        }
        let Some(fallback) = self.fallback.as_mut() else {
            return Err(CodecError::Codec("conversion context missing".into()));
        };
        fallback
            .scaler
            .0
            .run(frame, &mut fallback.scratch.0)
            .map_err(ff_err("scale"))?;
        Ok(&fallback.scratch.0)
    }
}

impl VideoDecoderBackend for FfmpegVideoDecoder {
    fn send_packet(&mut self, input: Option<DecoderInput<'_>>) -> Result<(), CodecError> {
        let Some(input) = input else {
            return self.decoder.0.send_eof().map_err(ff_err("send_eof"));
        };
        let mut packet = Packet::copy(input.data);
        packet.set_pts(Some(input.pts));
        packet.set_dts(Some(input.pts));
        packet.set_duration(input.duration);
        if input.keyframe {
            packet.set_flags(packet::Flags::KEY);
        }
        match self.decoder.0.send_packet(&packet) {
            Ok(()) => Ok(()),
            Err(err) if is_again(&err) => {
                while let Pull::Ready(frame) = self.pull()? {
                    self.ready.push_back(frame);
                }
                self.decoder
                    .0
                    .send_packet(&packet)
                    .map_err(ff_err("send_packet"))
            }
            Err(err) => Err(CodecError::Codec(format!(
                "{} send_packet failed: {err}",
                self.implementation
            ))),
        }
    }

    fn receive_frame(&mut self) -> Result<Pull<FrameLease>, CodecError> {
        match self.ready.pop_front() {
            Some(frame) => Ok(Pull::Ready(frame)),
            None => self.pull(),
        }
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.ready.clear();
        self.decoder.0.flush();
        Ok(())
    }
}
