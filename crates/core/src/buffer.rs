use std::{fmt, sync::Arc};

use crossbeam_queue::ArrayQueue;
use smallvec::{SmallVec, smallvec};

use crate::{
    format::{FormatError, MediaFormat, PixelFormat},
    metrics::PoolMetrics,
};

/// Metadata associated with a frame.
///
/// Timestamps and durations are in microseconds.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::*;
///
/// let res = Resolution::new(640, 480).unwrap();
/// let fmt = MediaFormat::new(PixelFormat::I420, res, VideoColorSpace::default());
/// let meta = FrameMeta::new(fmt, 33_333).with_duration(33_333);
/// assert_eq!(meta.timestamp, 33_333);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMeta {
    pub format: MediaFormat,
    pub timestamp: i64,
    pub duration: i64,
}

impl FrameMeta {
    pub fn new(format: MediaFormat, timestamp: i64) -> Self {
        Self {
            format,
            timestamp,
            duration: 0,
        }
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }
}

/// Handle to a pooled buffer.
///
/// When dropped, the buffer is returned to the originating pool so later frames
/// can reuse memory without reallocations.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::BufferPool;
///
/// let pool = BufferPool::with_capacity(2, 1024);
/// let mut lease = pool.lease();
/// lease.resize(16);
/// assert_eq!(lease.len(), 16);
/// ```
pub struct BufferLease {
    pool: Arc<PoolInner>,
    buf: Option<Vec<u8>>,
}

impl BufferLease {
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensure the buffer fits `len` bytes and set its length (new bytes are zeroed).
    pub fn resize(&mut self, len: usize) {
        if let Some(buf) = self.buf.as_mut() {
            buf.resize(len, 0);
        }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.recycle(buf);
        }
    }
}

impl fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLease").field("len", &self.len()).finish()
    }
}

/// Pool of reusable byte buffers.
///
/// The free list is a bounded lock-free queue; buffers returned while the list is full are
/// dropped.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::BufferPool;
///
/// let pool = BufferPool::with_limits(4, 1 << 20, 8);
/// let _lease = pool.lease();
/// assert_eq!(pool.metrics().hits(), 1);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: ArrayQueue<Vec<u8>>,
    chunk_size: usize,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn recycle(&self, mut buf: Vec<u8>) {
        buf.clear();
        let _ = self.free.push(buf);
    }
}

impl BufferPool {
    /// Create a pool with `capacity` preallocated buffers of `chunk_size` bytes.
    pub fn with_capacity(capacity: usize, chunk_size: usize) -> Self {
        Self::with_limits(capacity, chunk_size, capacity)
    }

    /// Create a pool with `capacity` preallocated buffers and at most `max_free` retained.
    pub fn with_limits(capacity: usize, chunk_size: usize, max_free: usize) -> Self {
        let free = ArrayQueue::new(max_free.max(capacity).max(1));
        for _ in 0..capacity {
            let _ = free.push(Vec::with_capacity(chunk_size));
        }
        Self {
            inner: Arc::new(PoolInner {
                free,
                chunk_size,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// Acquire an empty buffer, allocating if the pool is drained.
    pub fn lease(&self) -> BufferLease {
        let metrics = &self.inner.metrics;
        let buf = match self.inner.free.pop() {
            Some(buf) => {
                metrics.hits.incr();
                buf
            }
            None => {
                metrics.misses.incr();
                metrics.allocations.incr();
                Vec::with_capacity(self.inner.chunk_size)
            }
        };
        BufferLease {
            pool: self.inner.clone(),
            buf: Some(buf),
        }
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::with_limits(4, 1 << 20, 16)
    }
}

/// Plane view over a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    data: &'a [u8],
    stride: usize,
}

/// Mutable plane view.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    data: &'a mut [u8],
    stride: usize,
}

impl<'a> Plane<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl PlaneMut<'_> {
    pub fn data(&mut self) -> &mut [u8] {
        self.data
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// Plane layout information stored with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset into the owning buffer.
    pub offset: usize,
    /// Length of the plane in bytes.
    pub len: usize,
    /// Stride in bytes.
    pub stride: usize,
}

/// Raw video frame: one pooled buffer per plane plus metadata.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::*;
///
/// let pool = BufferPool::default();
/// let res = Resolution::new(4, 2).unwrap();
/// let meta = FrameMeta::new(MediaFormat::new(PixelFormat::Rgba, res, VideoColorSpace::default()), 0);
/// let frame = FrameLease::from_packed(&pool, meta, &[7u8; 32])?;
/// assert_eq!(frame.planes().len(), 1);
/// assert_eq!(frame.to_packed(), vec![7u8; 32]);
/// # Ok::<(), FormatError>(())
/// ```
pub struct FrameLease {
    meta: FrameMeta,
    buffers: SmallVec<[BufferLease; 4]>,
    layouts: SmallVec<[PlaneLayout; 4]>,
}

impl FrameLease {
    /// Construct a single-plane frame using the provided buffer.
    pub fn single_plane(meta: FrameMeta, mut buffer: BufferLease, len: usize, stride: usize) -> Self {
        buffer.resize(len);
        Self {
            meta,
            layouts: smallvec![PlaneLayout {
                offset: 0,
                len,
                stride,
            }],
            buffers: smallvec![buffer],
        }
    }

    /// Construct a multi-plane frame from a list of buffers and layouts.
    pub fn multi_plane(
        meta: FrameMeta,
        buffers: SmallVec<[BufferLease; 4]>,
        layouts: SmallVec<[PlaneLayout; 4]>,
    ) -> Self {
        debug_assert_eq!(buffers.len(), layouts.len());
        Self {
            meta,
            buffers,
            layouts,
        }
    }

    /// Allocate a zeroed, tightly packed frame for `meta.format`.
    pub fn alloc(pool: &BufferPool, meta: FrameMeta) -> Result<Self, FormatError> {
        let fmt = meta.format;
        if fmt.pixel.is_hardware() {
            return Err(FormatError::Geometry(format!(
                "{} frames have no CPU planes",
                fmt.pixel
            )));
        }
        let geometry = fmt
            .pixel
            .plane_geometry(fmt.resolution.width(), fmt.resolution.height());
        let mut buffers = SmallVec::new();
        let mut layouts = SmallVec::new();
        for plane in geometry {
            let len = plane.row_bytes * plane.rows;
            let mut buf = pool.lease();
            buf.resize(len);
            buffers.push(buf);
            layouts.push(PlaneLayout {
                offset: 0,
                len,
                stride: plane.row_bytes,
            });
        }
        Ok(Self::multi_plane(meta, buffers, layouts))
    }

    /// Copy a tightly packed buffer (planes back to back) into a new frame.
    pub fn from_packed(pool: &BufferPool, meta: FrameMeta, data: &[u8]) -> Result<Self, FormatError> {
        let fmt = meta.format;
        let expected = fmt
            .pixel
            .frame_size(fmt.resolution.width(), fmt.resolution.height());
        if data.len() < expected {
            return Err(FormatError::Geometry(format!(
                "{} {}x{} needs {expected} bytes, got {}",
                fmt.pixel,
                fmt.resolution.width(),
                fmt.resolution.height(),
                data.len()
            )));
        }
        let mut frame = Self::alloc(pool, meta)?;
        let mut cursor = 0;
        for mut plane in frame.planes_mut() {
            let dst = plane.data();
            let len = dst.len();
            dst.copy_from_slice(&data[cursor..cursor + len]);
            cursor += len;
        }
        Ok(frame)
    }

    /// Tightly packed copy of every plane, dropping stride padding.
    pub fn to_packed(&self) -> Vec<u8> {
        let fmt = self.meta.format;
        let geometry = fmt
            .pixel
            .plane_geometry(fmt.resolution.width(), fmt.resolution.height());
        let mut out = Vec::with_capacity(geometry.iter().map(|g| g.row_bytes * g.rows).sum());
        for (plane, geom) in self.planes().iter().zip(geometry.iter()) {
            for row in 0..geom.rows {
                let start = row * plane.stride();
                let end = (start + geom.row_bytes).min(plane.data().len());
                if start < end {
                    out.extend_from_slice(&plane.data()[start..end]);
                }
            }
        }
        out
    }

    /// Row-wise structural copy into a frame of the same format and size.
    pub fn copy_into(&self, dst: &mut FrameLease) -> Result<(), FormatError> {
        let src_fmt = self.meta.format;
        let dst_fmt = dst.meta.format;
        if src_fmt.pixel != dst_fmt.pixel || src_fmt.resolution != dst_fmt.resolution {
            return Err(FormatError::Geometry(format!(
                "cannot copy {} {}x{} into {} {}x{}",
                src_fmt.pixel,
                src_fmt.resolution.width(),
                src_fmt.resolution.height(),
                dst_fmt.pixel,
                dst_fmt.resolution.width(),
                dst_fmt.resolution.height()
            )));
        }
        let geometry = src_fmt
            .pixel
            .plane_geometry(src_fmt.resolution.width(), src_fmt.resolution.height());
        let src_planes = self.planes();
        if src_planes.len() < geometry.len() {
            return Err(FormatError::Geometry(format!(
                "{} requires {} planes, frame has {}",
                src_fmt.pixel,
                geometry.len(),
                src_planes.len()
            )));
        }
        for ((src, mut out), geom) in src_planes
            .iter()
            .zip(dst.planes_mut())
            .zip(geometry.iter())
        {
            let src_stride = src.stride();
            let dst_stride = out.stride();
            let dst_data = out.data();
            for row in 0..geom.rows {
                let s = row * src_stride;
                let d = row * dst_stride;
                let (Some(src_row), Some(dst_row)) = (
                    src.data().get(s..s + geom.row_bytes),
                    dst_data.get_mut(d..d + geom.row_bytes),
                ) else {
                    return Err(FormatError::Geometry(format!(
                        "{} plane too short at row {row}",
                        src_fmt.pixel
                    )));
                };
                dst_row.copy_from_slice(src_row);
            }
        }
        dst.meta.timestamp = self.meta.timestamp;
        dst.meta.duration = self.meta.duration;
        dst.meta.format.color = self.meta.format.color;
        Ok(())
    }

    /// Deep copy into buffers leased from `pool`.
    pub fn try_clone(&self, pool: &BufferPool) -> Result<Self, FormatError> {
        let mut out = Self::alloc(pool, self.meta.clone())?;
        self.copy_into(&mut out)?;
        Ok(out)
    }

    /// Check that every plane holds at least `stride * rows` bytes.
    pub fn validate(&self) -> Result<(), FormatError> {
        let fmt = self.meta.format;
        let geometry = fmt
            .pixel
            .plane_geometry(fmt.resolution.width(), fmt.resolution.height());
        let planes = self.planes();
        if planes.len() < geometry.len() {
            return Err(FormatError::Geometry(format!(
                "{} requires {} planes, frame has {}",
                fmt.pixel,
                geometry.len(),
                planes.len()
            )));
        }
        for (idx, (plane, geom)) in planes.iter().zip(geometry.iter()).enumerate() {
            let needed = plane.stride() * geom.rows.saturating_sub(1) + geom.row_bytes;
            if plane.stride() < geom.row_bytes || plane.data().len() < needed {
                return Err(FormatError::Geometry(format!(
                    "{} plane {idx} holds {} bytes, needs {needed}",
                    fmt.pixel,
                    plane.data().len()
                )));
            }
        }
        Ok(())
    }

    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut FrameMeta {
        &mut self.meta
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.meta.format.pixel
    }

    pub fn width(&self) -> u32 {
        self.meta.format.resolution.width()
    }

    pub fn height(&self) -> u32 {
        self.meta.format.resolution.height()
    }

    /// Borrow planes as slices (zero-copy).
    pub fn planes(&self) -> SmallVec<[Plane<'_>; 4]> {
        self.layouts
            .iter()
            .zip(self.buffers.iter())
            .map(|(layout, buf)| Plane {
                data: buf
                    .as_slice()
                    .get(layout.offset..layout.offset + layout.len)
                    .unwrap_or(&[]),
                stride: layout.stride,
            })
            .collect()
    }

    /// Borrow planes mutably for in-place writes.
    pub fn planes_mut(&mut self) -> SmallVec<[PlaneMut<'_>; 4]> {
        self.layouts
            .iter()
            .zip(self.buffers.iter_mut())
            .map(|(layout, buf)| {
                let end = layout.offset + layout.len;
                if buf.len() < end {
                    buf.resize(end);
                }
                PlaneMut {
                    data: buf
                        .as_mut_slice()
                        .get_mut(layout.offset..end)
                        .unwrap_or(&mut []),
                    stride: layout.stride,
                }
            })
            .collect()
    }

    pub fn layouts(&self) -> SmallVec<[PlaneLayout; 4]> {
        self.layouts.clone()
    }
}

impl fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLease")
            .field("meta", &self.meta)
            .field("layouts", &self.layouts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Resolution, VideoColorSpace};

    fn meta(pixel: PixelFormat, w: u32, h: u32) -> FrameMeta {
        FrameMeta::new(
            MediaFormat::new(pixel, Resolution::new(w, h).unwrap(), VideoColorSpace::default()),
            0,
        )
    }

    #[test]
    fn leases_recycle_into_pool() {
        let pool = BufferPool::with_limits(1, 64, 2);
        {
            let mut lease = pool.lease();
            lease.resize(8);
        }
        let lease = pool.lease();
        assert!(lease.is_empty());
        assert_eq!(pool.metrics().hits(), 2);
        assert_eq!(pool.metrics().misses(), 0);
    }

    #[test]
    fn copy_into_honours_padded_strides() {
        let pool = BufferPool::default();
        let m = meta(PixelFormat::Rgba, 2, 2);
        // 2px rows padded to 12 bytes.
        let mut padded = pool.lease();
        padded.resize(24);
        for (i, b) in padded.as_mut_slice().iter_mut().enumerate() {
            *b = i as u8;
        }
        let src = FrameLease::single_plane(m.clone(), padded, 24, 12);
        let mut dst = FrameLease::alloc(&pool, m).unwrap();
        src.copy_into(&mut dst).unwrap();
        let packed = dst.to_packed();
        assert_eq!(&packed[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&packed[8..], &[12, 13, 14, 15, 16, 17, 18, 19]);
    }

    #[test]
    fn from_packed_rejects_short_input() {
        let pool = BufferPool::default();
        let err = FrameLease::from_packed(&pool, meta(PixelFormat::I420, 4, 4), &[0u8; 10]);
        assert!(matches!(err, Err(FormatError::Geometry(_))));
    }

    #[test]
    fn copy_into_rejects_format_mismatch() {
        let pool = BufferPool::default();
        let src = FrameLease::alloc(&pool, meta(PixelFormat::I420, 4, 4)).unwrap();
        let mut dst = FrameLease::alloc(&pool, meta(PixelFormat::Nv12, 4, 4)).unwrap();
        assert!(src.copy_into(&mut dst).is_err());
    }

    #[test]
    fn validate_flags_truncated_planes() {
        let pool = BufferPool::default();
        let m = meta(PixelFormat::Rgba, 4, 4);
        let short = FrameLease::single_plane(m, pool.lease(), 20, 16);
        assert!(short.validate().is_err());
    }
}
