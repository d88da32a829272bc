use std::ptr;

use ffmpeg_next::{
    error::Error as FfmpegError,
    ffi::{
        AVChannelLayout, AVSampleFormat, SwrContext, av_channel_layout_default,
        av_channel_layout_uninit, av_frame_get_buffer, swr_alloc_set_opts2, swr_convert_frame,
        swr_free, swr_init,
    },
    frame::{Audio as AudioFrame, Video as FfFrame},
    software::scaling::{context::Context as ScalingContext, flag::Flags},
};
use mediaflow_core::{audio::AudioBuffer, buffer::FrameLease};

use super::{
    audio::{from_av_frame, to_av_frame},
    util::{SendSync, alloc_video_frame, ff_err, to_av_pixel, to_av_sample, write_frame},
};
use crate::{
    CodecError,
    toolkit::{AudioResampler, AudioSpec, FrameSpec, VideoScaler},
};

/// libswscale context plus the staging frames it reads and writes.
pub struct FfmpegScaler {
    ctx: SendSync<ScalingContext>,
    src: SendSync<FfFrame>,
    dst: SendSync<FfFrame>,
}

impl FfmpegScaler {
    pub(crate) fn new(src: &FrameSpec, dst: &FrameSpec) -> Result<Self, CodecError> {
        let (sf, df) = (to_av_pixel(src.format), to_av_pixel(dst.format));
        let ctx = ScalingContext::get(
            sf,
            src.width,
            src.height,
            df,
            dst.width,
            dst.height,
            Flags::BILINEAR,
        )
        .map_err(ff_err("scaler init"))?;
        Ok(Self {
            ctx: SendSync(ctx),
            src: SendSync(alloc_video_frame(sf, src.width, src.height)),
            dst: SendSync(alloc_video_frame(df, dst.width, dst.height)),
        })
    }
}

impl VideoScaler for FfmpegScaler {
    fn scale(&mut self, src: &FrameLease, dst: &mut FrameLease) -> Result<(), CodecError> {
        write_frame(src, &mut self.src.0)?;
        self.ctx
            .0
            .run(&self.src.0, &mut self.dst.0)
            .map_err(ff_err("scale"))?;
        let geometry = dst.pixel_format().plane_geometry(dst.width(), dst.height());
        let mut planes = dst.planes_mut();
        for (idx, (plane, geo)) in planes.iter_mut().zip(geometry.iter()).enumerate() {
            let src_stride = self.dst.0.stride(idx);
            let data = self.dst.0.data(idx);
            let dst_stride = plane.stride();
            let out = plane.data();
            for row in 0..geo.rows {
                let (s, d) = (row * src_stride, row * dst_stride);
                let (Some(src_row), Some(dst_row)) = (
                    data.get(s..s + geo.row_bytes),
                    out.get_mut(d..d + geo.row_bytes),
                ) else {
                    return Err(CodecError::Codec(format!("scaled plane {idx} too short")));
                };
                dst_row.copy_from_slice(src_row);
            }
        }
        Ok(())
    }
}

/// Owned libswresample context.
pub struct FfmpegResampler {
    ctx: *mut SwrContext,
    dst: AudioSpec,
}

unsafe impl Send for FfmpegResampler {}

struct Layout(AVChannelLayout);

impl Layout {
    fn default_for(channels: u16) -> Self {
        let mut layout: AVChannelLayout = unsafe { std::mem::zeroed() };
        unsafe { av_channel_layout_default(&mut layout, channels as i32) };
        Self(layout)
    }
}

impl Drop for Layout {
    fn drop(&mut self) {
        unsafe { av_channel_layout_uninit(&mut self.0) };
    }
}

impl FfmpegResampler {
    pub(crate) fn new(src: &AudioSpec, dst: &AudioSpec) -> Result<Self, CodecError> {
        let in_layout = Layout::default_for(src.channels);
        let out_layout = Layout::default_for(dst.channels);
        let mut ctx: *mut SwrContext = ptr::null_mut();
        let ret = unsafe {
            swr_alloc_set_opts2(
                &mut ctx,
                &out_layout.0,
                AVSampleFormat::from(to_av_sample(dst.format)),
                dst.sample_rate as i32,
                &in_layout.0,
                AVSampleFormat::from(to_av_sample(src.format)),
                src.sample_rate as i32,
                0,
                ptr::null_mut(),
            )
        };
        if ret < 0 || ctx.is_null() {
            return Err(CodecError::Allocation(format!(
                "swr_alloc_set_opts2 failed: {}",
                FfmpegError::from(ret)
            )));
        }
        let this = Self { ctx, dst: *dst };
        let ret = unsafe { swr_init(this.ctx) };
        if ret < 0 {
            return Err(CodecError::Codec(format!(
                "swr_init failed: {}",
                FfmpegError::from(ret)
            )));
        }
        Ok(this)
    }
}

impl AudioResampler for FfmpegResampler {
    fn resample(&mut self, src: &AudioBuffer) -> Result<AudioBuffer, CodecError> {
        let input = to_av_frame(src)?;
        let mut output = AudioFrame::empty();
        let out_samples = (src.frames() as u64 * self.dst.sample_rate as u64)
            .div_ceil(src.sample_rate.max(1) as u64)
            + 32;
        unsafe {
            let raw = output.as_mut_ptr();
            (*raw).format = AVSampleFormat::from(to_av_sample(self.dst.format)) as i32;
            (*raw).sample_rate = self.dst.sample_rate as i32;
            (*raw).nb_samples = out_samples as i32;
            av_channel_layout_default(&mut (*raw).ch_layout, self.dst.channels as i32);
            let ret = av_frame_get_buffer(raw, 0);
            if ret < 0 {
                return Err(CodecError::Allocation(format!(
                    "av_frame_get_buffer failed: {}",
                    FfmpegError::from(ret)
                )));
            }
            let ret = swr_convert_frame(self.ctx, raw, input.as_ptr());
            if ret < 0 {
                return Err(CodecError::Codec(format!(
                    "swr_convert_frame failed: {}",
                    FfmpegError::from(ret)
                )));
            }
        }
        from_av_frame(&output, src.timestamp())
    }
}

impl Drop for FfmpegResampler {
    fn drop(&mut self) {
        unsafe { swr_free(&mut self.ctx) };
    }
}
