#![doc = include_str!("../README.md")]

pub mod audio;
pub mod buffer;
pub mod format;
pub mod metrics;
pub mod queue;

pub mod prelude {
    pub use crate::{
        audio::{AudioBuffer, SampleFormat},
        buffer::{BufferLease, BufferPool, FrameLease, FrameMeta, Plane, PlaneLayout, PlaneMut},
        format::{
            ColorPrimaries, FormatError, MatrixCoefficients, MediaFormat, PixelFormat,
            PlaneGeometry, Resolution, TransferCharacteristics, VideoColorSpace,
        },
        metrics::{Counter, MetricsSnapshot, PoolMetrics, SessionMetrics},
        queue::{JobQueue, RecvOutcome, SendOutcome},
    };
}
