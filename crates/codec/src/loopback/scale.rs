use mediaflow_core::{audio::AudioBuffer, buffer::FrameLease, format::PixelFormat};

use crate::{
    CodecError,
    toolkit::{AudioResampler, AudioSpec, FrameSpec, VideoScaler},
};

/// Horizontal and vertical chroma subsampling of a YUV layout.
fn subsampling(fmt: PixelFormat) -> Option<(usize, usize)> {
    match fmt {
        PixelFormat::I420 | PixelFormat::I420A | PixelFormat::Nv12 => Some((2, 2)),
        PixelFormat::I422 => Some((2, 1)),
        PixelFormat::I444 => Some((1, 1)),
        _ => None,
    }
}

/// BT.601 limited-range RGB to YUV.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

/// Nearest-neighbour scaler converting packed RGB or planar/semi-planar YUV into any YUV layout.
pub struct LoopbackScaler {
    src: FrameSpec,
    dst: FrameSpec,
}

impl LoopbackScaler {
    pub(super) fn new(src: FrameSpec, dst: FrameSpec) -> Result<Self, CodecError> {
        let readable = src.format.is_packed_rgb() || subsampling(src.format).is_some();
        if !readable || subsampling(dst.format).is_none() {
            return Err(CodecError::Unsupported(format!(
                "loopback cannot convert {} to {}",
                src.format, dst.format
            )));
        }
        Ok(Self { src, dst })
    }
}

/// Full-resolution YUVA sample reader over a source frame.
struct Reader<'a> {
    format: PixelFormat,
    planes: Vec<(&'a [u8], usize)>,
}

impl Reader<'_> {
    fn yuva(&self, x: usize, y: usize) -> [u8; 4] {
        let at = |plane: usize, px: usize, py: usize| -> u8 {
            let (data, stride) = self.planes[plane];
            data.get(py * stride + px).copied().unwrap_or(0)
        };
        match self.format {
            PixelFormat::Rgba | PixelFormat::Rgbx | PixelFormat::Bgra | PixelFormat::Bgrx => {
                let base = x * 4;
                let (p0, p1, p2, p3) = (
                    at(0, base, y),
                    at(0, base + 1, y),
                    at(0, base + 2, y),
                    at(0, base + 3, y),
                );
                let (r, g, b) = match self.format {
                    PixelFormat::Rgba | PixelFormat::Rgbx => (p0, p1, p2),
                    _ => (p2, p1, p0),
                };
                let alpha = if self.format.has_alpha() { p3 } else { 255 };
                let (yy, u, v) = rgb_to_yuv(r, g, b);
                [yy, u, v, alpha]
            }
            PixelFormat::Nv12 => {
                let (cx, cy) = (x / 2, y / 2);
                [at(0, x, y), at(1, cx * 2, cy), at(1, cx * 2 + 1, cy), 255]
            }
            fmt => {
                let (sx, sy) = subsampling(fmt).unwrap_or((1, 1));
                let alpha = if fmt == PixelFormat::I420A {
                    at(3, x, y)
                } else {
                    255
                };
                [at(0, x, y), at(1, x / sx, y / sy), at(2, x / sx, y / sy), alpha]
            }
        }
    }
}

impl VideoScaler for LoopbackScaler {
    fn scale(&mut self, src: &FrameLease, dst: &mut FrameLease) -> Result<(), CodecError> {
        if !FrameSpec::of(src).same_layout(&self.src)
            || !FrameSpec::of(dst).same_layout(&self.dst)
        {
            return Err(CodecError::Codec(
                "frame does not match the scaler configuration".into(),
            ));
        }
        src.validate()
            .map_err(|e| CodecError::Codec(e.to_string()))?;
        let src_planes = src.planes();
        let reader = Reader {
            format: self.src.format,
            planes: src_planes.iter().map(|p| (p.data(), p.stride())).collect(),
        };
        let (sw, sh) = (self.src.width as usize, self.src.height as usize);
        let (dw, dh) = (self.dst.width as usize, self.dst.height as usize);
        let map = |x: usize, y: usize| ((x * sw / dw).min(sw - 1), (y * sh / dh).min(sh - 1));
        let (subx, suby) = subsampling(self.dst.format).unwrap_or((1, 1));
        let (cw, ch) = (dw.div_ceil(subx), dh.div_ceil(suby));
        let format = self.dst.format;

        let mut planes = dst.planes_mut();
        for (idx, plane) in planes.iter_mut().enumerate() {
            let stride = plane.stride();
            let data = plane.data();
            let chroma = matches!(idx, 1 | 2);
            let (w, h) = if chroma { (cw, ch) } else { (dw, dh) };
            for y in 0..h {
                for x in 0..w {
                    let (lx, ly) = if chroma {
                        ((x * subx).min(dw - 1), (y * suby).min(dh - 1))
                    } else {
                        (x, y)
                    };
                    let (px, py) = map(lx, ly);
                    let yuva = reader.yuva(px, py);
                    if format == PixelFormat::Nv12 && idx == 1 {
                        // Interleaved UV: `x` indexes chroma samples, two bytes each.
                        let off = y * stride + x * 2;
                        if let Some(slot) = data.get_mut(off..off + 2) {
                            slot.copy_from_slice(&[yuva[1], yuva[2]]);
                        }
                        continue;
                    }
                    let value = match idx {
                        0 => yuva[0],
                        1 => yuva[1],
                        2 => yuva[2],
                        _ => yuva[3],
                    };
                    if let Some(slot) = data.get_mut(y * stride + x) {
                        *slot = value;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Linear-interpolation resampler with simple channel up/down mixing.
pub struct LoopbackResampler {
    src: AudioSpec,
    dst: AudioSpec,
}

impl LoopbackResampler {
    pub(super) fn new(src: AudioSpec, dst: AudioSpec) -> Result<Self, CodecError> {
        if src.channels == 0 || dst.channels == 0 || src.sample_rate == 0 || dst.sample_rate == 0 {
            return Err(CodecError::Unsupported(
                "resampling needs non-empty layouts".into(),
            ));
        }
        Ok(Self { src, dst })
    }

    fn remix(&self, samples: &[f32], frames: usize) -> Vec<f32> {
        let (sc, dc) = (self.src.channels as usize, self.dst.channels as usize);
        if sc == dc {
            return samples.to_vec();
        }
        let mut out = Vec::with_capacity(frames * dc);
        for frame in samples.chunks(sc) {
            if dc == 1 {
                out.push(frame.iter().sum::<f32>() / sc as f32);
            } else if sc == 1 {
                out.extend(std::iter::repeat_n(frame[0], dc));
            } else {
                out.extend((0..dc).map(|c| frame.get(c).copied().unwrap_or(0.0)));
            }
        }
        out
    }
}

impl AudioResampler for LoopbackResampler {
    fn resample(&mut self, src: &AudioBuffer) -> Result<AudioBuffer, CodecError> {
        if AudioSpec::of(src) != self.src {
            return Err(CodecError::Codec(
                "buffer does not match the resampler configuration".into(),
            ));
        }
        let frames = src.frames();
        let mixed = self.remix(&src.to_f32_interleaved(), frames);
        let channels = self.dst.channels as usize;
        let out_frames =
            (frames as u64 * self.dst.sample_rate as u64 / self.src.sample_rate as u64) as usize;
        let resampled = if self.src.sample_rate == self.dst.sample_rate {
            mixed
        } else {
            let step = self.src.sample_rate as f64 / self.dst.sample_rate as f64;
            let mut out = Vec::with_capacity(out_frames * channels);
            for i in 0..out_frames {
                let pos = i as f64 * step;
                let i0 = (pos as usize).min(frames.saturating_sub(1));
                let i1 = (i0 + 1).min(frames.saturating_sub(1));
                let t = (pos - i0 as f64) as f32;
                for c in 0..channels {
                    let a = mixed[i0 * channels + c];
                    let b = mixed[i1 * channels + c];
                    out.push(a + (b - a) * t);
                }
            }
            out
        };
        let buffer = AudioBuffer::from_f32_interleaved(
            self.dst.sample_rate,
            self.dst.channels,
            src.timestamp(),
            &resampled,
        )
        .map_err(|e| CodecError::Codec(e.to_string()))?;
        Ok(buffer.convert_format(self.dst.format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::{
        audio::SampleFormat,
        buffer::{BufferPool, FrameMeta},
        format::{MediaFormat, Resolution, VideoColorSpace},
    };

    fn frame(pool: &BufferPool, format: PixelFormat, w: u32, h: u32, data: &[u8]) -> FrameLease {
        let res = Resolution::new(w, h).unwrap();
        let meta = FrameMeta::new(MediaFormat::new(format, res, VideoColorSpace::default()), 0);
        FrameLease::from_packed(pool, meta, data).unwrap()
    }

    fn blank(pool: &BufferPool, format: PixelFormat, w: u32, h: u32) -> FrameLease {
        let res = Resolution::new(w, h).unwrap();
        let meta = FrameMeta::new(MediaFormat::new(format, res, VideoColorSpace::default()), 0);
        FrameLease::alloc(pool, meta).unwrap()
    }

    fn spec(format: PixelFormat, w: u32, h: u32) -> FrameSpec {
        FrameSpec {
            format,
            width: w,
            height: h,
            color: VideoColorSpace::default(),
        }
    }

    #[test]
    fn rgba_white_becomes_limited_range_white() {
        let pool = BufferPool::default();
        let src = frame(&pool, PixelFormat::Rgba, 2, 2, &[255u8; 16]);
        let mut dst = blank(&pool, PixelFormat::I420, 2, 2);
        let mut scaler = LoopbackScaler::new(spec(PixelFormat::Rgba, 2, 2), spec(PixelFormat::I420, 2, 2)).unwrap();
        scaler.scale(&src, &mut dst).unwrap();
        assert_eq!(dst.to_packed(), vec![235, 235, 235, 235, 128, 128]);
    }

    #[test]
    fn bgra_alpha_is_kept_for_i420a() {
        let pool = BufferPool::default();
        let src = frame(&pool, PixelFormat::Bgra, 1, 1, &[0, 0, 255, 9]);
        let mut dst = blank(&pool, PixelFormat::I420A, 1, 1);
        let mut scaler = LoopbackScaler::new(spec(PixelFormat::Bgra, 1, 1), spec(PixelFormat::I420A, 1, 1)).unwrap();
        scaler.scale(&src, &mut dst).unwrap();
        let packed = dst.to_packed();
        // Pure red: Y 82, U 90, V 240.
        assert_eq!(packed, vec![82, 90, 240, 9]);
    }

    #[test]
    fn i420_to_nv12_interleaves_chroma() {
        let pool = BufferPool::default();
        // 2x2 I420: Y = 1,2,3,4  U = 50  V = 60
        let src = frame(&pool, PixelFormat::I420, 2, 2, &[1, 2, 3, 4, 50, 60]);
        let mut dst = blank(&pool, PixelFormat::Nv12, 2, 2);
        let mut scaler = LoopbackScaler::new(spec(PixelFormat::I420, 2, 2), spec(PixelFormat::Nv12, 2, 2)).unwrap();
        scaler.scale(&src, &mut dst).unwrap();
        assert_eq!(dst.to_packed(), vec![1, 2, 3, 4, 50, 60]);
    }

    #[test]
    fn downscale_picks_nearest() {
        let pool = BufferPool::default();
        let luma: Vec<u8> = (0..16).collect();
        let mut data = luma.clone();
        data.extend_from_slice(&[128; 8]);
        let src = frame(&pool, PixelFormat::I420, 4, 4, &data);
        let mut dst = blank(&pool, PixelFormat::I420, 2, 2);
        let mut scaler = LoopbackScaler::new(spec(PixelFormat::I420, 4, 4), spec(PixelFormat::I420, 2, 2)).unwrap();
        scaler.scale(&src, &mut dst).unwrap();
        assert_eq!(&dst.to_packed()[..4], &[0, 2, 8, 10]);
    }

    #[test]
    fn rgb_targets_are_unsupported() {
        let scaler = LoopbackScaler::new(spec(PixelFormat::I420, 2, 2), spec(PixelFormat::Rgba, 2, 2));
        assert!(scaler.is_err());
    }

    #[test]
    fn mono_upmix_and_rate_halving() {
        let src_spec = AudioSpec {
            format: SampleFormat::F32,
            sample_rate: 16_000,
            channels: 1,
        };
        let dst_spec = AudioSpec {
            sample_rate: 8_000,
            channels: 2,
            ..src_spec
        };
        let mut resampler = LoopbackResampler::new(src_spec, dst_spec).unwrap();
        let buf = AudioBuffer::from_f32_interleaved(16_000, 1, 7, &[0.0, 0.5, 1.0, 0.5]).unwrap();
        let out = resampler.resample(&buf).unwrap();
        assert_eq!(out.frames(), 2);
        assert_eq!(out.timestamp(), 7);
        assert_eq!(out.to_f32_interleaved(), vec![0.0, 0.0, 1.0, 1.0]);
    }
}
