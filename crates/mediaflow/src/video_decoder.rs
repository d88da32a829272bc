use std::sync::Arc;

use mediaflow_codec::{
    convert::VideoConverter,
    params::VideoDecoderParams,
    selector::{DecoderChoice, HwPreference, select_decoder},
    toolkit::{DecoderInput, FrameSpec, Pull, Toolkit, VideoDecoderBackend},
};
use mediaflow_core::{
    buffer::{BufferPool, FrameLease},
    format::PixelFormat,
};
use tracing::warn;

use crate::{
    config::VideoDecoderConfig,
    delivery::{Callbacks, FlushTicket, Sink},
    error::{SessionError, SessionState},
    output::{DecodedFrame, EncodedChunk},
    session::{Implementation, SessionCore, session_surface},
    worker::Processor,
};

struct Opened<T: Toolkit> {
    decoder: T::VideoDecoder,
    device: Option<T::HwDevice>,
}

fn open<T: Toolkit>(
    toolkit: &T,
    choice: &DecoderChoice,
    config: &VideoDecoderConfig,
) -> Result<Opened<T>, SessionError> {
    let device = match choice.accel.device_type() {
        Some(kind) if choice.uses_hw_frames => toolkit
            .create_hw_device(kind)
            .inspect_err(|err| {
                warn!(implementation = %choice.name, error = %err, "hardware device unavailable");
            })
            .ok(),
        _ => None,
    };
    let mut params = VideoDecoderParams::new(&choice.name);
    params.size = config.coded_width.zip(config.coded_height);
    params.extradata = config.description.clone();
    let decoder = toolkit
        .open_video_decoder(&params, device.as_ref())
        .map_err(|e| SessionError::CodecOpen(e.to_string()))?;
    Ok(Opened { decoder, device })
}

struct DecodeProcessor<T: Toolkit> {
    decoder: T::VideoDecoder,
    _device: Option<T::HwDevice>,
    converter: VideoConverter<T>,
    toolkit: Arc<T>,
    output_format: Option<PixelFormat>,
}

impl<T: Toolkit> DecodeProcessor<T> {
    fn deliver(&mut self, frame: FrameLease, timestamp_us: i64, duration_us: i64) -> Result<DecodedFrame, SessionError> {
        let frame = match self.output_format {
            Some(format) if format != frame.pixel_format() => {
                let target = FrameSpec {
                    format,
                    ..FrameSpec::of(&frame)
                };
                self.converter.convert(&self.toolkit, &frame, &target)?
            }
            _ => frame,
        };
        Ok(DecodedFrame {
            frame,
            timestamp_us,
            duration_us,
        })
    }
}

impl<T: Toolkit> Processor for DecodeProcessor<T> {
    type Job = EncodedChunk;
    type Output = DecodedFrame;

    fn process(&mut self, chunk: EncodedChunk, sink: &mut Sink<'_, DecodedFrame>) -> Result<(), SessionError> {
        self.decoder.send_packet(Some(DecoderInput {
            data: &chunk.data,
            pts: chunk.timestamp_us,
            duration: chunk.duration_us,
            keyframe: chunk.keyframe,
        }))?;
        // Frames surfacing now are attributed to the packet that released them.
        while let Pull::Ready(frame) = self.decoder.receive_frame()? {
            let out = self.deliver(frame, chunk.timestamp_us, chunk.duration_us)?;
            sink.emit(out);
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut Sink<'_, DecodedFrame>) -> Result<(), SessionError> {
        self.decoder.send_packet(None)?;
        while let Pull::Ready(frame) = self.decoder.receive_frame()? {
            let (ts, duration) = (frame.meta().timestamp, frame.meta().duration);
            let out = self.deliver(frame, ts, duration)?;
            sink.emit(out);
        }
        self.decoder.flush_buffers()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SessionError> {
        self.decoder.flush_buffers()?;
        Ok(())
    }
}

/// Asynchronous video decode session.
///
/// Accepts [`EncodedChunk`]s and delivers owned [`DecodedFrame`]s, optionally converted to a
/// fixed CPU format.
pub struct VideoDecoder<T: Toolkit> {
    core: SessionCore<EncodedChunk, DecodedFrame>,
    toolkit: Arc<T>,
    pool: BufferPool,
}

impl<T: Toolkit> VideoDecoder<T> {
    pub fn new(toolkit: impl Into<Arc<T>>, callbacks: Callbacks<DecodedFrame>) -> Self {
        Self::with_pool(toolkit, callbacks, BufferPool::default())
    }

    pub fn with_pool(
        toolkit: impl Into<Arc<T>>,
        callbacks: Callbacks<DecodedFrame>,
        pool: BufferPool,
    ) -> Self {
        Self {
            core: SessionCore::new("video-decoder", callbacks),
            toolkit: toolkit.into(),
            pool,
        }
    }

    pub fn configure(&mut self, config: VideoDecoderConfig) -> Result<(), SessionError> {
        self.core.ensure_unconfigured()?;
        config.validate()?;
        let toolkit = &*self.toolkit;
        let choice = select_decoder(toolkit, &config.codec, config.hardware_acceleration)
            .ok_or_else(|| {
                SessionError::Configuration(format!("no decoder available for '{}'", config.codec))
            })?;

        let (opened, implementation) = match open(toolkit, &choice, &config) {
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
                    "hardware decoder failed to open, retrying in software"
                );
                let software = select_decoder(toolkit, &config.codec, HwPreference::PreferSoftware)
                    .ok_or(err)?;
                let opened = open(toolkit, &software, &config)?;
                (opened, Implementation {
                    name: software.name,
                    accel: software.accel,
                    fallback: true,
                })
            }
            Err(err) => return Err(err),
        };

        let processor = DecodeProcessor {
            decoder: opened.decoder,
            _device: opened.device,
            converter: VideoConverter::new(self.pool.clone()),
            toolkit: self.toolkit.clone(),
            output_format: config.output_format,
        };
        self.core.start(processor, implementation)
    }

    pub fn submit(&mut self, chunk: EncodedChunk) -> Result<(), SessionError> {
        self.core.ensure_configured()?;
        if chunk.data.is_empty() {
            return Err(SessionError::InvalidInput("empty chunk".into()));
        }
        self.core.submit(chunk)
    }

    session_surface!();
}

impl<T: Toolkit> Drop for VideoDecoder<T> {
    fn drop(&mut self) {
        self.core.close();
    }
}
