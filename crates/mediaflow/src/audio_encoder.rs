use std::sync::Arc;

use mediaflow_codec::{
    convert::AudioConverter,
    params::{AudioEncoderParams, CodecOptions},
    selector::HwAccel,
    toolkit::{AudioEncoderBackend, AudioSpec, CodecLookup, Pull, Toolkit},
};
use mediaflow_core::audio::{AudioBuffer, SampleFormat};

use crate::{
    config::AudioEncoderConfig,
    delivery::{Callbacks, FlushTicket, Sink},
    error::{SessionError, SessionState},
    output::EncodedChunk,
    session::{Implementation, SessionCore, session_surface},
    worker::Processor,
};

/// Samples per channel per frame when the codec does not fix one.
pub const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;

/// Toolkit implementation name for a host codec string.
fn implementation_name(codec: &str) -> &str {
    match codec {
        "opus" => "libopus",
        "mp3" => "libmp3lame",
        other => other,
    }
}

fn sample_format_for(implementation: &str) -> SampleFormat {
    match implementation {
        "libopus" => SampleFormat::F32,
        "flac" => SampleFormat::S16,
        _ => SampleFormat::F32Planar,
    }
}

struct AudioEncodeProcessor<T: Toolkit> {
    encoder: T::AudioEncoder,
    converter: AudioConverter<T>,
    toolkit: Arc<T>,
    target: AudioSpec,
    frame_size: usize,
    /// Converted samples not yet handed to the codec.
    fifo: Option<AudioBuffer>,
    header_sent: bool,
}

impl<T: Toolkit> AudioEncodeProcessor<T> {
    fn send(&mut self, frame: &AudioBuffer, sink: &mut Sink<'_, EncodedChunk>) -> Result<(), SessionError> {
        self.encoder.send_frame(Some(frame))?;
        self.drain(sink)
    }

    fn drain(&mut self, sink: &mut Sink<'_, EncodedChunk>) -> Result<(), SessionError> {
        loop {
            match self.encoder.receive_packet()? {
                Pull::Ready(packet) => {
                    let extradata = if self.header_sent {
                        None
                    } else {
                        self.header_sent = true;
                        self.encoder.extradata()
                    };
                    sink.emit(EncodedChunk {
                        data: packet.data,
                        keyframe: true,
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

impl<T: Toolkit> Processor for AudioEncodeProcessor<T> {
    type Job = AudioBuffer;
    type Output = EncodedChunk;

    fn process(&mut self, buffer: AudioBuffer, sink: &mut Sink<'_, EncodedChunk>) -> Result<(), SessionError> {
        let converted = self.converter.convert(&self.toolkit, &buffer, &self.target)?;
        let mut fifo = match self.fifo.take() {
            Some(mut fifo) => {
                fifo.append(&converted)
                    .map_err(|e| SessionError::Processing(e.to_string()))?;
                fifo
            }
            None => converted,
        };
        while fifo.frames() >= self.frame_size {
            let frame = fifo.slice(0, self.frame_size);
            fifo.consume(self.frame_size);
            if let Err(err) = self.send(&frame, sink) {
                self.fifo = (!fifo.is_empty()).then_some(fifo);
                return Err(err);
            }
        }
        self.fifo = (!fifo.is_empty()).then_some(fifo);
        Ok(())
    }

    fn flush(&mut self, sink: &mut Sink<'_, EncodedChunk>) -> Result<(), SessionError> {
        if let Some(rest) = self.fifo.take() {
            self.send(&rest, sink)?;
        }
        self.encoder.send_frame(None)?;
        self.drain(sink)?;
        self.encoder.flush_buffers()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SessionError> {
        self.fifo = None;
        self.encoder.flush_buffers()?;
        Ok(())
    }
}

/// Asynchronous audio encode session.
///
/// Input buffers of any layout are converted to the codec's sample format, rate and channel
/// count, then regrouped into codec-sized frames. A partial frame is held until more samples
/// arrive or the session is flushed.
///
/// # Example
/// ```rust
/// use std::{sync::{Arc, Mutex}, time::Duration};
/// use mediaflow::prelude::*;
///
/// let chunks = Arc::new(Mutex::new(Vec::new()));
/// let sink = chunks.clone();
/// let mut encoder = AudioEncoder::new(
///     LoopbackToolkit::new(),
///     Callbacks::new(move |c: EncodedChunk| sink.lock().unwrap().push(c), |e| panic!("{e}")),
/// );
/// encoder.configure(AudioEncoderConfig::new("opus", 48_000, 2)).unwrap();
/// // 1500 frames: one 960-sample opus frame now, the rest at flush.
/// encoder.submit(AudioBuffer::silence(SampleFormat::S16, 48_000, 2, 1500)).unwrap();
/// let ticket = encoder.flush(|_| {});
/// encoder.pump_until(&ticket, Duration::from_secs(5));
/// let chunks = chunks.lock().unwrap();
/// assert_eq!(chunks.len(), 2);
/// assert!(chunks[0].extradata.is_some());
/// ```
pub struct AudioEncoder<T: Toolkit> {
    core: SessionCore<AudioBuffer, EncodedChunk>,
    toolkit: Arc<T>,
}

impl<T: Toolkit> AudioEncoder<T> {
    pub fn new(toolkit: impl Into<Arc<T>>, callbacks: Callbacks<EncodedChunk>) -> Self {
        Self {
            core: SessionCore::new("audio-encoder", callbacks),
            toolkit: toolkit.into(),
        }
    }

    pub fn configure(&mut self, config: AudioEncoderConfig) -> Result<(), SessionError> {
        self.core.ensure_unconfigured()?;
        config.validate()?;
        let name = implementation_name(&config.codec);
        if !self.toolkit.has_encoder(name) {
            return Err(SessionError::Configuration(format!(
                "no encoder available for '{}'",
                config.codec
            )));
        }
        let params = AudioEncoderParams {
            implementation: name.to_string(),
            sample_rate: config.sample_rate,
            channels: config.number_of_channels,
            sample_format: sample_format_for(name),
            bit_rate: config.bitrate,
            time_base: (1, 1_000_000),
            options: CodecOptions::default(),
        };
        let encoder = self
            .toolkit
            .open_audio_encoder(&params)
            .map_err(|e| SessionError::CodecOpen(e.to_string()))?;

        let processor = AudioEncodeProcessor {
            target: AudioSpec {
                format: encoder.sample_format(),
                sample_rate: config.sample_rate,
                channels: config.number_of_channels,
            },
            frame_size: encoder.frame_size().unwrap_or(DEFAULT_AUDIO_FRAME_SIZE).max(1),
            encoder,
            converter: AudioConverter::new(),
            toolkit: self.toolkit.clone(),
            fifo: None,
            header_sent: false,
        };
        self.core.start(
            processor,
            Implementation {
                name: name.to_string(),
                accel: HwAccel::None,
                fallback: false,
            },
        )
    }

    /// Queue PCM. The buffer's timestamp is in microseconds.
    pub fn submit(&mut self, buffer: AudioBuffer) -> Result<(), SessionError> {
        self.core.ensure_configured()?;
        if buffer.is_empty() || buffer.channels() == 0 || buffer.sample_rate() == 0 {
            return Err(SessionError::InvalidInput(format!(
                "unusable audio buffer ({} frames, {}ch, {}Hz)",
                buffer.frames(),
                buffer.channels(),
                buffer.sample_rate()
            )));
        }
        self.core.submit(buffer)
    }

    session_surface!();
}

impl<T: Toolkit> Drop for AudioEncoder<T> {
    fn drop(&mut self) {
        self.core.close();
    }
}
