use std::sync::Arc;

use mediaflow_codec::{
    convert::AudioConverter,
    params::AudioDecoderParams,
    selector::HwAccel,
    toolkit::{AudioDecoderBackend, AudioSpec, CodecLookup, DecoderInput, Pull, Toolkit},
};
use mediaflow_core::audio::{AudioBuffer, SampleFormat};

use crate::{
    config::AudioDecoderConfig,
    delivery::{Callbacks, FlushTicket, Sink},
    error::{SessionError, SessionState},
    output::{DecodedAudio, EncodedChunk},
    session::{Implementation, SessionCore, session_surface},
    worker::Processor,
};

fn candidates(codec: &str) -> &'static [&'static str] {
    match codec {
        "aac" => &["aac"],
        "opus" | "libopus" => &["opus", "libopus"],
        "mp3" | "libmp3lame" => &["mp3", "libmp3lame"],
        "flac" => &["flac"],
        _ => &[],
    }
}

/// Registered decoder for `codec`: the exact name first, then known aliases.
fn resolve_decoder(lookup: &impl CodecLookup, codec: &str) -> Option<String> {
    if lookup.has_decoder(codec) {
        return Some(codec.to_string());
    }
    candidates(codec)
        .iter()
        .find(|name| lookup.has_decoder(name))
        .map(|name| name.to_string())
}

struct AudioDecodeProcessor<T: Toolkit> {
    decoder: T::AudioDecoder,
    converter: AudioConverter<T>,
    toolkit: Arc<T>,
    target: AudioSpec,
}

impl<T: Toolkit> AudioDecodeProcessor<T> {
    fn convert(&mut self, buffer: AudioBuffer) -> Result<AudioBuffer, SessionError> {
        Ok(self.converter.convert(&self.toolkit, &buffer, &self.target)?)
    }
}

impl<T: Toolkit> Processor for AudioDecodeProcessor<T> {
    type Job = EncodedChunk;
    type Output = DecodedAudio;

    fn process(&mut self, chunk: EncodedChunk, sink: &mut Sink<'_, DecodedAudio>) -> Result<(), SessionError> {
        self.decoder.send_packet(Some(DecoderInput {
            data: &chunk.data,
            pts: chunk.timestamp_us,
            duration: chunk.duration_us,
            keyframe: chunk.keyframe,
        }))?;
        while let Pull::Ready(buffer) = self.decoder.receive_frame()? {
            let buffer = self.convert(buffer)?;
            sink.emit(DecodedAudio {
                buffer,
                timestamp_us: chunk.timestamp_us,
                duration_us: chunk.duration_us,
            });
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut Sink<'_, DecodedAudio>) -> Result<(), SessionError> {
        self.decoder.send_packet(None)?;
        while let Pull::Ready(buffer) = self.decoder.receive_frame()? {
            let buffer = self.convert(buffer)?;
            sink.emit(DecodedAudio {
                timestamp_us: buffer.timestamp(),
                duration_us: buffer.duration_us(),
                buffer,
            });
        }
        self.decoder.flush_buffers()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SessionError> {
        self.decoder.flush_buffers()?;
        Ok(())
    }
}

/// Asynchronous audio decode session. Output is interleaved `f32` at the configured rate and
/// channel count.
///
/// # Example
/// ```rust
/// use std::{sync::{Arc, Mutex}, time::Duration};
/// use mediaflow::prelude::*;
///
/// let decoded = Arc::new(Mutex::new(Vec::new()));
/// let sink = decoded.clone();
/// let mut decoder = AudioDecoder::new(
///     LoopbackToolkit::new(),
///     Callbacks::new(move |a: DecodedAudio| sink.lock().unwrap().push(a), |e| panic!("{e}")),
/// );
/// decoder.configure(AudioDecoderConfig::new("opus", 48_000, 2)).unwrap();
/// assert_eq!(decoder.implementation().unwrap().name, "opus");
/// decoder.close();
/// ```
pub struct AudioDecoder<T: Toolkit> {
    core: SessionCore<EncodedChunk, DecodedAudio>,
    toolkit: Arc<T>,
}

impl<T: Toolkit> AudioDecoder<T> {
    pub fn new(toolkit: impl Into<Arc<T>>, callbacks: Callbacks<DecodedAudio>) -> Self {
        Self {
            core: SessionCore::new("audio-decoder", callbacks),
            toolkit: toolkit.into(),
        }
    }

    pub fn configure(&mut self, config: AudioDecoderConfig) -> Result<(), SessionError> {
        self.core.ensure_unconfigured()?;
        config.validate()?;
        let name = resolve_decoder(&*self.toolkit, &config.codec).ok_or_else(|| {
            SessionError::Configuration(format!("no decoder available for '{}'", config.codec))
        })?;
        let params = AudioDecoderParams {
            implementation: name.clone(),
            sample_rate: config.sample_rate,
            channels: config.number_of_channels,
            extradata: config.description.clone(),
        };
        let decoder = self
            .toolkit
            .open_audio_decoder(&params)
            .map_err(|e| SessionError::CodecOpen(e.to_string()))?;
        let processor = AudioDecodeProcessor {
            decoder,
            converter: AudioConverter::new(),
            toolkit: self.toolkit.clone(),
            target: AudioSpec {
                format: SampleFormat::F32,
                sample_rate: config.sample_rate,
                channels: config.number_of_channels,
            },
        };
        self.core.start(processor, Implementation {
            name,
            accel: HwAccel::None,
            fallback: false,
        })
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

impl<T: Toolkit> Drop for AudioDecoder<T> {
    fn drop(&mut self) {
        self.core.close();
    }
}
