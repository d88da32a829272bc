//! Conversion stage between caller buffers and codec-native layouts.
//!
//! Conversion contexts come from the toolkit and are cached per session, keyed by the
//! (source, destination) pair; a different pair replaces the cached context.

use mediaflow_core::{
    audio::AudioBuffer,
    buffer::{BufferPool, FrameLease, FrameMeta},
    format::{MediaFormat, Resolution},
};

use crate::{
    CodecError,
    toolkit::{AudioResampler, AudioSpec, FrameSpec, Toolkit, VideoScaler},
};

struct CachedScaler<S> {
    src: FrameSpec,
    dst: FrameSpec,
    scaler: S,
}

/// Adapts caller frames to the format and size a video codec consumes.
///
/// Frames already matching the target are copied structurally without touching a scaler.
///
/// # Example
/// ```rust
/// # #[cfg(feature = "loopback")] {
/// use mediaflow_codec::prelude::*;
///
/// let toolkit = LoopbackToolkit::new();
/// let pool = BufferPool::default();
/// let res = Resolution::new(4, 4).unwrap();
/// let meta = FrameMeta::new(MediaFormat::new(PixelFormat::Rgba, res, VideoColorSpace::default()), 0);
/// let frame = FrameLease::alloc(&pool, meta).unwrap();
///
/// let mut converter = VideoConverter::new(BufferPool::default());
/// let target = FrameSpec { format: PixelFormat::I420, width: 4, height: 4, color: VideoColorSpace::default() };
/// let out = converter.convert(&toolkit, &frame, &target).unwrap();
/// assert_eq!(out.pixel_format(), PixelFormat::I420);
/// assert_eq!(converter.contexts_created(), 1);
/// # }
/// ```
pub struct VideoConverter<T: Toolkit> {
    pool: BufferPool,
    cached: Option<CachedScaler<T::Scaler>>,
    contexts_created: u64,
    passthrough_copies: u64,
}

impl<T: Toolkit> VideoConverter<T> {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            pool,
            cached: None,
            contexts_created: 0,
            passthrough_copies: 0,
        }
    }

    /// Produce a frame in `target` layout. Timestamp, duration and colour metadata follow the
    /// source frame.
    pub fn convert(
        &mut self,
        toolkit: &T,
        frame: &FrameLease,
        target: &FrameSpec,
    ) -> Result<FrameLease, CodecError> {
        let src = FrameSpec::of(frame);
        if src.same_layout(target) {
            self.passthrough_copies += 1;
            return frame
                .try_clone(&self.pool)
                .map_err(|e| CodecError::Allocation(e.to_string()));
        }

        let stale = self
            .cached
            .as_ref()
            .is_none_or(|c| !c.src.same_layout(&src) || !c.dst.same_layout(target));
        if stale {
            // Drop the old context before creating its replacement.
            self.cached = None;
            let scaler = toolkit.create_scaler(&src, target)?;
            self.contexts_created += 1;
            self.cached = Some(CachedScaler {
                src,
                dst: *target,
                scaler,
            });
        }

        let resolution = Resolution::new(target.width, target.height).ok_or_else(|| {
            CodecError::Unsupported(format!(
                "target size {}x{} is empty",
                target.width, target.height
            ))
        })?;
        let meta = FrameMeta::new(
            MediaFormat::new(target.format, resolution, frame.meta().format.color),
            frame.meta().timestamp,
        )
        .with_duration(frame.meta().duration);
        let mut out = FrameLease::alloc(&self.pool, meta)
            .map_err(|e| CodecError::Allocation(e.to_string()))?;
        let Some(cached) = self.cached.as_mut() else {
            return Err(CodecError::Codec("conversion context missing".into()));
        };
        cached.scaler.scale(frame, &mut out)?;
        Ok(out)
    }

    /// Number of scaler contexts created so far.
    pub fn contexts_created(&self) -> u64 {
        self.contexts_created
    }

    /// Number of frames that matched the target and were copied without scaling.
    pub fn passthrough_copies(&self) -> u64 {
        self.passthrough_copies
    }
}

/// Adapts PCM buffers to a codec's sample format, rate and channel count.
///
/// The resampler is created on first use.
pub struct AudioConverter<T: Toolkit> {
    cached: Option<(AudioSpec, AudioSpec, T::Resampler)>,
    contexts_created: u64,
}

impl<T: Toolkit> Default for AudioConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Toolkit> AudioConverter<T> {
    pub fn new() -> Self {
        Self {
            cached: None,
            contexts_created: 0,
        }
    }

    pub fn convert(
        &mut self,
        toolkit: &T,
        buffer: &AudioBuffer,
        target: &AudioSpec,
    ) -> Result<AudioBuffer, CodecError> {
        let src = AudioSpec::of(buffer);
        if src == *target {
            return Ok(buffer.clone());
        }
        if src.sample_rate == target.sample_rate && src.channels == target.channels {
            return Ok(buffer.convert_format(target.format));
        }
        let stale = self
            .cached
            .as_ref()
            .is_none_or(|(s, d, _)| *s != src || d != target);
        if stale {
            self.cached = None;
            let resampler = toolkit.create_resampler(&src, target)?;
            self.contexts_created += 1;
            self.cached = Some((src, *target, resampler));
        }
        match self.cached.as_mut() {
            Some((_, _, resampler)) => resampler.resample(buffer),
            None => Err(CodecError::Codec("resampler missing".into())),
        }
    }

    pub fn contexts_created(&self) -> u64 {
        self.contexts_created
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use super::*;
    use crate::loopback::LoopbackToolkit;
    use mediaflow_core::{
        audio::SampleFormat,
        format::{PixelFormat, VideoColorSpace},
    };

    fn rgba_frame(pool: &BufferPool, w: u32, h: u32, ts: i64) -> FrameLease {
        let res = Resolution::new(w, h).unwrap();
        let meta = FrameMeta::new(
            MediaFormat::new(PixelFormat::Rgba, res, VideoColorSpace::default()),
            ts,
        );
        FrameLease::from_packed(pool, meta, &vec![200u8; (w * h * 4) as usize]).unwrap()
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
    fn matching_layout_skips_the_scaler() {
        let toolkit = LoopbackToolkit::new();
        let pool = BufferPool::default();
        let mut conv = VideoConverter::new(pool.clone());
        let frame = rgba_frame(&pool, 8, 8, 42);
        let out = conv
            .convert(&toolkit, &frame, &spec(PixelFormat::Rgba, 8, 8))
            .unwrap();
        assert_eq!(conv.contexts_created(), 0);
        assert_eq!(conv.passthrough_copies(), 1);
        assert_eq!(out.meta().timestamp, 42);
        assert_eq!(out.to_packed(), frame.to_packed());
    }

    #[test]
    fn context_is_reused_until_the_pair_changes() {
        let toolkit = LoopbackToolkit::new();
        let pool = BufferPool::default();
        let mut conv = VideoConverter::new(pool.clone());
        let target = spec(PixelFormat::I420, 8, 8);
        for ts in 0..3 {
            let out = conv
                .convert(&toolkit, &rgba_frame(&pool, 8, 8, ts), &target)
                .unwrap();
            assert_eq!(out.meta().timestamp, ts);
        }
        assert_eq!(conv.contexts_created(), 1);
        conv.convert(&toolkit, &rgba_frame(&pool, 16, 8, 3), &target)
            .unwrap();
        assert_eq!(conv.contexts_created(), 2);
    }

    #[test]
    fn audio_resampler_is_lazy() {
        let toolkit = LoopbackToolkit::new();
        let mut conv = AudioConverter::new();
        let buf = AudioBuffer::silence(SampleFormat::F32, 48_000, 2, 480);
        let same = AudioSpec::of(&buf);
        conv.convert(&toolkit, &buf, &same).unwrap();
        assert_eq!(conv.contexts_created(), 0);

        let target = AudioSpec {
            format: SampleFormat::S16,
            sample_rate: 24_000,
            channels: 1,
        };
        let out = conv.convert(&toolkit, &buf, &target).unwrap();
        assert_eq!(conv.contexts_created(), 1);
        assert_eq!(out.frames(), 240);
        assert_eq!(out.channels(), 1);
        assert_eq!(out.format(), SampleFormat::S16);
    }
}
