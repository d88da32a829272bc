use std::collections::{BTreeMap, VecDeque};

use ffmpeg_next::{
    Dictionary,
    codec::{self, Flags as CodecFlags},
    encoder,
    error::Error as FfmpegError,
    ffi::{
        AV_CODEC_CAP_ENCODER_FLUSH, av_hwframe_get_buffer, av_hwframe_transfer_data,
        avcodec_flush_buffers,
    },
    frame::Video as FfFrame,
    packet::Packet,
    picture,
};
use mediaflow_core::format::PixelFormat;
use tracing::debug;

use super::{
    hw::{BufferRef, FfmpegHwDevice, FfmpegHwFrames},
    util::{SendSync, alloc_video_frame, apply_color, ff_err, is_again, to_av_pixel, write_frame},
};
use crate::{
    CodecError,
    params::VideoEncoderParams,
    toolkit::{EncodedPacket, EncoderInput, Pull, VideoEncoderBackend},
};

/// libavcodec video encoder opened from [`VideoEncoderParams`].
pub struct FfmpegVideoEncoder {
    encoder: SendSync<encoder::video::Encoder>,
    codec: SendSync<ffmpeg_next::Codec>,
    params: VideoEncoderParams,
    device: Option<BufferRef>,
    frames: Option<BufferRef>,
    /// CPU-side format frames arrive in; the frame pool's upload format for hardware surfaces.
    input_format: PixelFormat,
    staging: SendSync<FfFrame>,
    durations: BTreeMap<i64, i64>,
    ready: VecDeque<EncodedPacket>,
    drained: bool,
}

impl FfmpegVideoEncoder {
    pub(crate) fn open(
        params: &VideoEncoderParams,
        device: Option<&FfmpegHwDevice>,
        frames: Option<&FfmpegHwFrames>,
    ) -> Result<Self, CodecError> {
        let codec = encoder::find_by_name(&params.implementation)
            .ok_or_else(|| CodecError::NotFound(params.implementation.clone()))?;
        let device = device.map(|d| d.buf.try_clone()).transpose()?;
        let frames_ref = frames.map(|f| f.buf.try_clone()).transpose()?;
        let input_format = match frames {
            Some(f) => f.params.sw_format,
            None if params.pixel_format.is_hardware() => {
                return Err(CodecError::Open(format!(
                    "{} needs a hardware frame pool",
                    params.implementation
                )));
            }
            None => params.pixel_format,
        };
        let encoder = open_context(codec, params, device.as_ref(), frames_ref.as_ref())?;
        Ok(Self {
            encoder: SendSync(encoder),
            codec: SendSync(codec),
            params: params.clone(),
            device,
            frames: frames_ref,
            input_format,
            staging: SendSync(alloc_video_frame(
                to_av_pixel(input_format),
                params.width,
                params.height,
            )),
            durations: BTreeMap::new(),
            ready: VecDeque::new(),
            drained: false,
        })
    }

    /// Send the uploaded surface, or the staging frame when there is none.
    fn send_raw(&mut self, hw: Option<&FfFrame>) -> Result<(), FfmpegError> {
        match hw {
            Some(frame) => self.encoder.0.send_frame(frame),
            None => self.encoder.0.send_frame(&self.staging.0),
        }
    }

    fn push(&mut self, hw: Option<&FfFrame>) -> Result<(), CodecError> {
        match self.send_raw(hw) {
            Ok(()) => Ok(()),
            Err(err) if is_again(&err) => {
                self.drain_ready()?;
                self.send_raw(hw).map_err(ff_err("send_frame"))
            }
            Err(err) => Err(ff_err("send_frame")(err)),
        }
    }

    fn drain_ready(&mut self) -> Result<(), CodecError> {
        while let Pull::Ready(packet) = self.pull()? {
            self.ready.push_back(packet);
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<Pull<EncodedPacket>, CodecError> {
        let mut packet = Packet::empty();
        match self.encoder.0.receive_packet(&mut packet) {
            Ok(()) => {
                let pts = packet.pts().unwrap_or(0);
                let tracked = self.durations.remove(&pts);
                // Entries older than the emitted pts belong to frames the codec dropped.
                self.durations = self.durations.split_off(&pts);
                let duration = match packet.duration() {
                    0 => tracked.unwrap_or(0),
                    d => d,
                };
                Ok(Pull::Ready(EncodedPacket {
                    data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    keyframe: packet.is_key(),
                    pts,
                    duration,
                }))
            }
            Err(err) if is_again(&err) => Ok(Pull::NeedInput),
            Err(FfmpegError::Eof) => Ok(Pull::EndOfStream),
            Err(err) => Err(ff_err("receive_packet")(err)),
        }
    }

    fn upload(&mut self) -> Result<FfFrame, CodecError> {
        let Some(frames) = &self.frames else {
            return Err(CodecError::Hardware("no frame pool to upload into".into()));
        };
        let mut hw = FfFrame::empty();
        let ret = unsafe { av_hwframe_get_buffer(frames.as_ptr(), hw.as_mut_ptr(), 0) };
        if ret < 0 {
            return Err(CodecError::Allocation(format!(
                "av_hwframe_get_buffer failed: {}",
                FfmpegError::from(ret)
            )));
        }
        let ret = unsafe { av_hwframe_transfer_data(hw.as_mut_ptr(), self.staging.0.as_ptr(), 0) };
        if ret < 0 {
            return Err(CodecError::Hardware(format!(
                "av_hwframe_transfer_data failed: {}",
                FfmpegError::from(ret)
            )));
        }
        hw.set_pts(self.staging.0.pts());
        hw.set_kind(self.staging.0.kind());
        Ok(hw)
    }
}

fn open_context(
    codec: ffmpeg_next::Codec,
    params: &VideoEncoderParams,
    device: Option<&BufferRef>,
    frames: Option<&BufferRef>,
) -> Result<encoder::video::Encoder, CodecError> {
    let ctx = codec::Context::new_with_codec(codec);
    let mut enc = ctx
        .encoder()
        .video()
        .map_err(|e| CodecError::Open(e.to_string()))?;
    enc.set_width(params.width);
    enc.set_height(params.height);
    enc.set_format(to_av_pixel(params.pixel_format));
    enc.set_time_base(params.time_base);
    enc.set_frame_rate(Some(params.framerate));
    enc.set_gop(params.gop);
    enc.set_max_b_frames(params.max_b_frames as usize);
    enc.set_bit_rate(params.rate.bit_rate as usize);
    enc.set_max_bit_rate(params.rate.max_rate as usize);
    if params.threads > 0 {
        enc.set_threading(codec::threading::Config {
            kind: codec::threading::Type::Frame,
            count: params.threads as usize,
        });
    }
    if params.global_header {
        enc.set_flags(CodecFlags::GLOBAL_HEADER);
    }
    unsafe {
        let raw = enc.as_mut_ptr();
        (*raw).rc_min_rate = params.rate.min_rate as i64;
        (*raw).rc_buffer_size = params.rate.buffer_size as i32;
        if let Some(q) = params.rate.qmin {
            (*raw).qmin = q;
        }
        if let Some(q) = params.rate.qmax {
            (*raw).qmax = q;
        }
        if let Some(delay) = params.delay {
            (*raw).delay = delay as i32;
        }
        if let Some(refs) = params.refs {
            (*raw).refs = refs as i32;
        }
        apply_color(raw, &params.color);
        if let Some(device) = device {
            (*raw).hw_device_ctx = device.new_ref()?;
        }
        if let Some(frames) = frames {
            (*raw).hw_frames_ctx = frames.new_ref()?;
        }
    }
    let mut options = Dictionary::new();
    for (key, value) in params.options.iter() {
        options.set(key, value);
    }
    enc.open_as_with(codec, options)
        .map_err(|e| CodecError::Open(format!("{}: {e}", params.implementation)))
}

impl VideoEncoderBackend for FfmpegVideoEncoder {
    fn send_frame(&mut self, input: Option<EncoderInput<'_>>) -> Result<(), CodecError> {
        let Some(input) = input else {
            self.drained = true;
            return self.encoder.0.send_eof().map_err(ff_err("send_eof"));
        };
        if input.frame.pixel_format() != self.input_format {
            return Err(CodecError::Codec(format!(
                "encoder expects {}, got {}",
                self.input_format,
                input.frame.pixel_format()
            )));
        }
        write_frame(input.frame, &mut self.staging.0)?;
        self.staging.0.set_pts(Some(input.pts));
        self.staging.0.set_kind(if input.force_keyframe {
            picture::Type::I
        } else {
            picture::Type::None
        });
        self.durations.insert(input.pts, input.duration);
        if self.frames.is_some() {
            let hw = self.upload()?;
            self.push(Some(&hw))
        } else {
            self.push(None)
        }
    }

    fn receive_packet(&mut self) -> Result<Pull<EncodedPacket>, CodecError> {
        match self.ready.pop_front() {
            Some(packet) => Ok(Pull::Ready(packet)),
            None => self.pull(),
        }
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.ready.clear();
        self.durations.clear();
        let caps = unsafe { (*self.codec.0.as_ptr()).capabilities } as u32;
        let flushable = caps & AV_CODEC_CAP_ENCODER_FLUSH != 0;
        if self.drained || !flushable {
            // A drained context cannot accept frames again; reopen with the same parameters.
            debug!(implementation = %self.params.implementation, "reopening encoder context");
            self.encoder = SendSync(open_context(
                self.codec.0,
                &self.params,
                self.device.as_ref(),
                self.frames.as_ref(),
            )?);
            self.drained = false;
        } else {
            unsafe { avcodec_flush_buffers(self.encoder.0.as_mut_ptr()) };
        }
        Ok(())
    }

    fn extradata(&self) -> Option<Vec<u8>> {
        unsafe {
            let raw = self.encoder.0.as_ptr();
            let size = (*raw).extradata_size;
            if (*raw).extradata.is_null() || size <= 0 {
                return None;
            }
            Some(std::slice::from_raw_parts((*raw).extradata, size as usize).to_vec())
        }
    }

    fn pixel_format(&self) -> PixelFormat {
        self.input_format
    }
}
