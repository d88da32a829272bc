use std::sync::Arc;

use mediaflow_codec::{
    convert::VideoConverter,
    params::{HwFramesParams, VideoEncoderParams},
    selector::{EncoderChoice, HwPreference, select_encoder},
    toolkit::{EncoderInput, FrameSpec, Pull, Toolkit, VideoEncoderBackend},
};
use mediaflow_core::buffer::{BufferPool, FrameLease};
use tracing::warn;

use crate::{
    config::VideoEncoderConfig,
    delivery::{Callbacks, FlushTicket, Sink},
    error::{SessionError, SessionState},
    output::{EncodeOptions, EncodedChunk},
    session::{Implementation, SessionCore, session_surface},
    tuning,
    worker::Processor,
};

pub(crate) struct EncodeJob {
    frame: FrameLease,
    keyframe: bool,
}

/// Codec plus hardware contexts, in drop order.
struct Opened<T: Toolkit> {
    encoder: T::VideoEncoder,
    frames: Option<T::HwFrames>,
    device: Option<T::HwDevice>,
}

/// Open `choice`, creating a device and frame pool first when it wants them.
///
/// A missing device or pool is not fatal here; the open call decides. On failure the pool is
/// released before the device.
fn open<T: Toolkit>(
    toolkit: &T,
    choice: &EncoderChoice,
    params: &VideoEncoderParams,
) -> Result<Opened<T>, SessionError> {
    let device = match choice.accel.device_type() {
        Some(kind) => match toolkit.create_hw_device(kind) {
            Ok(device) => Some(device),
            Err(err) => {
                warn!(implementation = %choice.name, error = %err, "hardware device unavailable");
                None
            }
        },
        None => None,
    };
    let frames = match (&device, choice.requires_hw_frames) {
        (Some(device), true) => {
            let pool = HwFramesParams::new(choice.input_format, params.width, params.height);
            match toolkit.create_hw_frames(device, &pool) {
                Ok(frames) => Some(frames),
                Err(err) => {
                    warn!(implementation = %choice.name, error = %err, "hardware frame pool unavailable");
                    None
                }
            }
        }
        _ => None,
    };
    let encoder = toolkit
        .open_video_encoder(params, device.as_ref(), frames.as_ref())
        .map_err(|e| SessionError::CodecOpen(e.to_string()))?;
    Ok(Opened {
        encoder,
        frames,
        device,
    })
}

struct EncodeProcessor<T: Toolkit> {
    // Field order is release order: codec, frame pool, device.
    encoder: T::VideoEncoder,
    _frames: Option<T::HwFrames>,
    _device: Option<T::HwDevice>,
    converter: VideoConverter<T>,
    toolkit: Arc<T>,
    width: u32,
    height: u32,
}

impl<T: Toolkit> EncodeProcessor<T> {
    fn drain(&mut self, sink: &mut Sink<'_, EncodedChunk>, flushing: bool) -> Result<(), SessionError> {
        loop {
            match self.encoder.receive_packet()? {
                Pull::Ready(packet) => {
                    let extradata = if packet.keyframe && !flushing {
                        self.encoder.extradata()
                    } else {
                        None
                    };
                    sink.emit(EncodedChunk {
                        data: packet.data,
                        keyframe: packet.keyframe,
                        timestamp_us: packet.pts,
                        duration_us: packet.duration,
                        extradata,
                    });
                }
                Pull::NeedInput | Pull::EndOfStream => return Ok(()),
            }
        }
    }
}

impl<T: Toolkit> Processor for EncodeProcessor<T> {
    type Job = EncodeJob;
    type Output = EncodedChunk;

    fn process(&mut self, job: EncodeJob, sink: &mut Sink<'_, EncodedChunk>) -> Result<(), SessionError> {
        let target = FrameSpec {
            format: self.encoder.pixel_format(),
            width: self.width,
            height: self.height,
            color: job.frame.meta().format.color,
        };
        let input = self.converter.convert(&self.toolkit, &job.frame, &target)?;
        let meta = job.frame.meta();
        self.encoder.send_frame(Some(EncoderInput {
            frame: &input,
            pts: meta.timestamp,
            duration: meta.duration,
            force_keyframe: job.keyframe,
        }))?;
        self.drain(sink, false)
    }

    fn flush(&mut self, sink: &mut Sink<'_, EncodedChunk>) -> Result<(), SessionError> {
        self.encoder.send_frame(None)?;
        self.drain(sink, true)?;
        self.encoder.flush_buffers()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SessionError> {
        self.encoder.flush_buffers()?;
        Ok(())
    }
}

/// Asynchronous video encode session.
///
/// `submit` converts frames to the codec's layout on the worker thread; chunks arrive through
/// `on_output` in submission order when the caller pumps.
///
/// # Example
/// ```rust
/// use std::{sync::{Arc, Mutex}, time::Duration};
/// use mediaflow::prelude::*;
///
/// let chunks = Arc::new(Mutex::new(Vec::new()));
/// let sink = chunks.clone();
/// let mut encoder = VideoEncoder::new(
///     LoopbackToolkit::new(),
///     Callbacks::new(move |c: EncodedChunk| sink.lock().unwrap().push(c), |e| panic!("{e}")),
/// );
/// encoder.configure(VideoEncoderConfig::new("vp8", 64, 48)).unwrap();
/// assert_eq!(encoder.implementation().unwrap().name, "libvpx");
///
/// let pool = BufferPool::default();
/// let res = Resolution::new(64, 48).unwrap();
/// for i in 0..3 {
///     let meta = FrameMeta::new(
///         MediaFormat::new(PixelFormat::I420, res, VideoColorSpace::default()),
///         i * 33_333,
///     );
///     encoder.submit(FrameLease::alloc(&pool, meta).unwrap(), EncodeOptions::default()).unwrap();
/// }
/// let ticket = encoder.flush(|_| {});
/// assert_eq!(encoder.pump_until(&ticket, Duration::from_secs(5)), Some(Ok(())));
/// assert_eq!(chunks.lock().unwrap().len(), 3);
/// encoder.close();
/// ```
pub struct VideoEncoder<T: Toolkit> {
    core: SessionCore<EncodeJob, EncodedChunk>,
    toolkit: Arc<T>,
    pool: BufferPool,
}

impl<T: Toolkit> VideoEncoder<T> {
    pub fn new(toolkit: impl Into<Arc<T>>, callbacks: Callbacks<EncodedChunk>) -> Self {
        Self::with_pool(toolkit, callbacks, BufferPool::default())
    }

    /// Use `pool` for converted frames.
    pub fn with_pool(
        toolkit: impl Into<Arc<T>>,
        callbacks: Callbacks<EncodedChunk>,
        pool: BufferPool,
    ) -> Self {
        Self {
            core: SessionCore::new("video-encoder", callbacks),
            toolkit: toolkit.into(),
            pool,
        }
    }

    /// Select, tune and open an encoder, then start the worker.
    ///
    /// A hardware implementation that fails to open is retried once in software unless the
    /// configuration insists on hardware.
    pub fn configure(&mut self, config: VideoEncoderConfig) -> Result<(), SessionError> {
        self.core.ensure_unconfigured()?;
        config.validate()?;
        let toolkit = &*self.toolkit;
        let choice = select_encoder(toolkit, &config.codec, config.hardware_acceleration)
            .ok_or_else(|| {
                SessionError::Configuration(format!("no encoder available for '{}'", config.codec))
            })?;
        let params = tuning::encoder_params(&config, &choice)?;

        let (opened, implementation) = match open(toolkit, &choice, &params) {
            Ok(opened) => (opened, Implementation {
                name: choice.name.clone(),
                accel: choice.accel,
                fallback: false,
            }),
            Err(err)
                if choice.accel.is_hardware()
                    && config.hardware_acceleration != HwPreference::PreferHardware =>
            {
                warn!(
                    implementation = %choice.name,
                    error = %err,
                    "hardware encoder failed to open, retrying in software"
                );
                let software = select_encoder(toolkit, &config.codec, HwPreference::PreferSoftware)
                    .ok_or(err)?;
                let params = tuning::fallback_params(&config, &software.name);
                let opened = open(toolkit, &software, &params)?;
                (opened, Implementation {
                    name: software.name,
                    accel: software.accel,
                    fallback: true,
                })
            }
            Err(err) => return Err(err),
        };

        let processor = EncodeProcessor {
            encoder: opened.encoder,
            _frames: opened.frames,
            _device: opened.device,
            converter: VideoConverter::new(self.pool.clone()),
            toolkit: self.toolkit.clone(),
            width: config.width,
            height: config.height,
        };
        self.core.start(processor, implementation)
    }

    /// Queue one frame. Timestamp and duration come from the frame metadata (microseconds).
    pub fn submit(&mut self, frame: FrameLease, options: EncodeOptions) -> Result<(), SessionError> {
        self.core.ensure_configured()?;
        frame
            .validate()
            .map_err(|e| SessionError::InvalidInput(e.to_string()))?;
        if frame.pixel_format().is_hardware() {
            return Err(SessionError::InvalidInput(format!(
                "{} frames cannot be submitted from the host",
                frame.pixel_format()
            )));
        }
        self.core.submit(EncodeJob {
            frame,
            keyframe: options.keyframe,
        })
    }

    session_surface!();
}

impl<T: Toolkit> Drop for VideoEncoder<T> {
    fn drop(&mut self) {
        self.core.close();
    }
}
