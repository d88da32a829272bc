use ffmpeg_next::{
    error::Error as FfmpegError,
    frame::Video as FfFrame,
    util::{
        color,
        error::EAGAIN,
        format::{
            pixel::Pixel,
            sample::{Sample, Type as SampleType},
        },
    },
};
use mediaflow_core::{
    audio::SampleFormat,
    buffer::{BufferPool, FrameLease, FrameMeta},
    format::{
        ColorPrimaries, MatrixCoefficients, PixelFormat, TransferCharacteristics, VideoColorSpace,
    },
};

use crate::CodecError;

pub(crate) fn init_ffmpeg() -> Result<(), CodecError> {
    ffmpeg_next::init().map_err(|e| CodecError::Codec(e.to_string()))
}

/// Wrapper marking libswscale/libswresample contexts Send (they are raw pointers owned by one
/// worker at a time).
pub(crate) struct SendSync<T>(pub T);
unsafe impl<T> Send for SendSync<T> {}
unsafe impl<T> Sync for SendSync<T> {}

pub(crate) fn is_again(err: &FfmpegError) -> bool {
    matches!(err, FfmpegError::Other { errno } if *errno == EAGAIN)
}

pub(crate) fn ff_err(op: &str) -> impl Fn(FfmpegError) -> CodecError + '_ {
    move |e| CodecError::Codec(format!("ffmpeg {op} failed: {e}"))
}

pub(crate) fn to_av_pixel(fmt: PixelFormat) -> Pixel {
    match fmt {
        PixelFormat::I420 => Pixel::YUV420P,
        PixelFormat::I420A => Pixel::YUVA420P,
        PixelFormat::I422 => Pixel::YUV422P,
        PixelFormat::I444 => Pixel::YUV444P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Rgbx => Pixel::RGBZ,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Bgrx => Pixel::BGRZ,
        PixelFormat::Vaapi => Pixel::VAAPI,
    }
}

pub(crate) fn from_av_pixel(fmt: Pixel) -> Option<PixelFormat> {
    Some(match fmt {
        Pixel::YUV420P | Pixel::YUVJ420P => PixelFormat::I420,
        Pixel::YUVA420P => PixelFormat::I420A,
        Pixel::YUV422P | Pixel::YUVJ422P => PixelFormat::I422,
        Pixel::YUV444P | Pixel::YUVJ444P => PixelFormat::I444,
        Pixel::NV12 => PixelFormat::Nv12,
        Pixel::RGBA => PixelFormat::Rgba,
        Pixel::RGBZ => PixelFormat::Rgbx,
        Pixel::BGRA => PixelFormat::Bgra,
        Pixel::BGRZ => PixelFormat::Bgrx,
        _ => return None,
    })
}

pub(crate) fn to_av_sample(fmt: SampleFormat) -> Sample {
    let kind = if fmt.is_planar() {
        SampleType::Planar
    } else {
        SampleType::Packed
    };
    match fmt.packed() {
        SampleFormat::U8 => Sample::U8(kind),
        SampleFormat::S16 => Sample::I16(kind),
        SampleFormat::S32 => Sample::I32(kind),
        _ => Sample::F32(kind),
    }
}

pub(crate) fn from_av_sample(fmt: Sample) -> Option<SampleFormat> {
    let (packed, planar) = match fmt {
        Sample::U8(t) => (SampleFormat::U8, t),
        Sample::I16(t) => (SampleFormat::S16, t),
        Sample::I32(t) => (SampleFormat::S32, t),
        Sample::F32(t) => (SampleFormat::F32, t),
        _ => return None,
    };
    Some(match planar {
        SampleType::Planar => packed.planar(),
        SampleType::Packed => packed,
    })
}

pub(crate) fn av_primaries(p: ColorPrimaries) -> color::Primaries {
    match p {
        ColorPrimaries::Bt709 => color::Primaries::BT709,
        ColorPrimaries::Bt470bg => color::Primaries::BT470BG,
        ColorPrimaries::Smpte170m => color::Primaries::SMPTE170M,
        ColorPrimaries::Bt2020 => color::Primaries::BT2020,
        ColorPrimaries::Smpte432 => color::Primaries::SMPTE432,
    }
}

pub(crate) fn av_transfer(t: TransferCharacteristics) -> color::TransferCharacteristic {
    match t {
        TransferCharacteristics::Bt709 => color::TransferCharacteristic::BT709,
        TransferCharacteristics::Smpte170m => color::TransferCharacteristic::SMPTE170M,
        TransferCharacteristics::Iec61966_2_1 => color::TransferCharacteristic::IEC61966_2_1,
        TransferCharacteristics::Linear => color::TransferCharacteristic::Linear,
        TransferCharacteristics::Pq => color::TransferCharacteristic::SMPTE2084,
        TransferCharacteristics::Hlg => color::TransferCharacteristic::ARIB_STD_B67,
    }
}

pub(crate) fn av_matrix(m: MatrixCoefficients) -> color::Space {
    match m {
        MatrixCoefficients::Rgb => color::Space::RGB,
        MatrixCoefficients::Bt709 => color::Space::BT709,
        MatrixCoefficients::Bt470bg => color::Space::BT470BG,
        MatrixCoefficients::Smpte170m => color::Space::SMPTE170M,
        MatrixCoefficients::Bt2020Ncl => color::Space::BT2020NCL,
    }
}

pub(crate) fn av_range(full: bool) -> color::Range {
    if full { color::Range::JPEG } else { color::Range::MPEG }
}

/// Allocate a CPU-side frame with FFmpeg-owned plane buffers.
pub(crate) fn alloc_video_frame(fmt: Pixel, width: u32, height: u32) -> FfFrame {
    let mut frame = FfFrame::empty();
    frame.set_format(fmt);
    frame.set_width(width);
    frame.set_height(height);
    unsafe {
        frame.alloc(fmt, width, height);
    }
    frame
}

/// Copy a lease into an allocated FFmpeg frame of the same layout, row by row.
pub(crate) fn write_frame(src: &FrameLease, dst: &mut FfFrame) -> Result<(), CodecError> {
    if dst.width() != src.width() || dst.height() != src.height() {
        return Err(CodecError::Codec("ffmpeg frame geometry mismatch".into()));
    }
    let geometry = src.pixel_format().plane_geometry(src.width(), src.height());
    let planes = src.planes();
    if planes.len() < geometry.len() {
        return Err(CodecError::Codec(format!(
            "{} frame has {} planes, expected {}",
            src.pixel_format(),
            planes.len(),
            geometry.len()
        )));
    }
    for (idx, (plane, geo)) in planes.iter().zip(geometry.iter()).enumerate() {
        let dst_stride = dst.stride(idx);
        let out = dst.data_mut(idx);
        let data = plane.data();
        for row in 0..geo.rows {
            let s = row * plane.stride();
            let d = row * dst_stride;
            let (Some(src_row), Some(dst_row)) = (
                data.get(s..s + geo.row_bytes),
                out.get_mut(d..d + geo.row_bytes),
            ) else {
                return Err(CodecError::Codec(format!("plane {idx} too short")));
            };
            dst_row.copy_from_slice(src_row);
        }
    }
    Ok(())
}

/// Copy an FFmpeg frame into a pooled lease. The codec reuses its buffers on the next call.
pub(crate) fn read_frame(
    src: &FfFrame,
    pool: &BufferPool,
    meta: FrameMeta,
) -> Result<FrameLease, CodecError> {
    let mut out =
        FrameLease::alloc(pool, meta).map_err(|e| CodecError::Allocation(e.to_string()))?;
    let geometry = out.pixel_format().plane_geometry(out.width(), out.height());
    let mut planes = out.planes_mut();
    for (idx, (plane, geo)) in planes.iter_mut().zip(geometry.iter()).enumerate() {
        let src_stride = src.stride(idx);
        let data = src.data(idx);
        let dst_stride = plane.stride();
        let dst = plane.data();
        for row in 0..geo.rows {
            let s = row * src_stride;
            let d = row * dst_stride;
            let (Some(src_row), Some(dst_row)) = (
                data.get(s..s + geo.row_bytes),
                dst.get_mut(d..d + geo.row_bytes),
            ) else {
                return Err(CodecError::Codec(format!("decoded plane {idx} too short")));
            };
            dst_row.copy_from_slice(src_row);
        }
    }
    drop(planes);
    Ok(out)
}

/// Apply a colour description to a codec context.
pub(crate) unsafe fn apply_color(ctx: *mut ffmpeg_next::ffi::AVCodecContext, cs: &VideoColorSpace) {
    unsafe {
        if let Some(p) = cs.primaries {
            (*ctx).color_primaries = av_primaries(p).into();
        }
        if let Some(t) = cs.transfer {
            (*ctx).color_trc = av_transfer(t).into();
        }
        if let Some(m) = cs.matrix {
            (*ctx).colorspace = av_matrix(m).into();
        }
        if let Some(full) = cs.full_range {
            (*ctx).color_range = av_range(full).into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_mapping_round_trips_cpu_formats() {
        for fmt in [
            PixelFormat::I420,
            PixelFormat::I420A,
            PixelFormat::I422,
            PixelFormat::I444,
            PixelFormat::Nv12,
            PixelFormat::Rgba,
            PixelFormat::Bgrx,
        ] {
            assert_eq!(from_av_pixel(to_av_pixel(fmt)), Some(fmt));
        }
        assert_eq!(from_av_pixel(Pixel::VAAPI), None);
    }

    #[test]
    fn sample_mapping_keeps_planarity() {
        assert_eq!(
            from_av_sample(to_av_sample(SampleFormat::F32Planar)),
            Some(SampleFormat::F32Planar)
        );
        assert_eq!(to_av_sample(SampleFormat::S16), Sample::I16(SampleType::Packed));
    }
}
