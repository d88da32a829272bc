use std::{collections::VecDeque, sync::Arc};

use mediaflow_core::audio::{AudioBuffer, SampleFormat};
use smallvec::SmallVec;

use super::Shared;
use crate::{
    CodecError,
    params::{AudioDecoderParams, AudioEncoderParams},
    toolkit::{AudioDecoderBackend, AudioEncoderBackend, DecoderInput, EncodedPacket, Pull},
};

const MAGIC: &[u8; 4] = b"LBA1";
const HEADER_LEN: usize = 4 + 4 + 2 + 1;

const FORMATS: &[SampleFormat] = &[
    SampleFormat::U8,
    SampleFormat::S16,
    SampleFormat::S32,
    SampleFormat::F32,
    SampleFormat::U8Planar,
    SampleFormat::S16Planar,
    SampleFormat::S32Planar,
    SampleFormat::F32Planar,
];

fn frame_size_for(implementation: &str) -> Option<usize> {
    match implementation {
        "libopus" => Some(960),
        "aac" => Some(1024),
        "libmp3lame" => Some(1152),
        _ => None,
    }
}

/// PCM framing encoder. Every packet is a keyframe.
pub struct LoopbackAudioEncoder {
    params: AudioEncoderParams,
    frame_size: Option<usize>,
    ready: VecDeque<EncodedPacket>,
    pushes: usize,
    fail_after: Option<usize>,
    draining: bool,
    shared: Arc<Shared>,
}

impl LoopbackAudioEncoder {
    pub(super) fn new(params: AudioEncoderParams, shared: Arc<Shared>) -> Self {
        let fail_after = shared.processing_failure(&params.implementation);
        Self {
            frame_size: frame_size_for(&params.implementation),
            params,
            ready: VecDeque::new(),
            pushes: 0,
            fail_after,
            draining: false,
            shared,
        }
    }
}

impl AudioEncoderBackend for LoopbackAudioEncoder {
    fn send_frame(&mut self, input: Option<&AudioBuffer>) -> Result<(), CodecError> {
        self.shared.gate.pass();
        let Some(buf) = input else {
            self.draining = true;
            return Ok(());
        };
        if self.draining {
            return Err(CodecError::Codec("encoder already drained".into()));
        }
        if self.fail_after == Some(self.pushes) {
            self.fail_after = None;
            return Err(CodecError::Codec(format!(
                "{}: injected processing failure",
                self.params.implementation
            )));
        }
        if buf.format() != self.params.sample_format
            || buf.sample_rate() != self.params.sample_rate
            || buf.channels() != self.params.channels
        {
            return Err(CodecError::Codec(format!(
                "{} expects {}/{}Hz/{}ch, got {}/{}Hz/{}ch",
                self.params.implementation,
                self.params.sample_format,
                self.params.sample_rate,
                self.params.channels,
                buf.format(),
                buf.sample_rate(),
                buf.channels()
            )));
        }
        if let Some(size) = self.frame_size
            && buf.frames() > size
        {
            return Err(CodecError::Codec(format!(
                "{} frames exceed the codec frame size {size}",
                buf.frames()
            )));
        }
        self.pushes += 1;

        let code = FORMATS.iter().position(|f| *f == buf.format()).unwrap_or(0) as u8;
        let mut data = Vec::with_capacity(HEADER_LEN + buf.planes().iter().map(Vec::len).sum::<usize>());
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(&buf.sample_rate().to_le_bytes());
        data.extend_from_slice(&buf.channels().to_le_bytes());
        data.push(code);
        for plane in buf.planes() {
            data.extend_from_slice(plane);
        }
        self.ready.push_back(EncodedPacket {
            data,
            keyframe: true,
            pts: buf.timestamp(),
            duration: buf.duration_us(),
        });
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Pull<EncodedPacket>, CodecError> {
        Ok(match self.ready.pop_front() {
            Some(p) => Pull::Ready(p),
            None if self.draining => Pull::EndOfStream,
            None => Pull::NeedInput,
        })
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.ready.clear();
        self.draining = false;
        self.shared
            .record(format!("flush-buffers:{}", self.params.implementation));
        Ok(())
    }

    fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    fn sample_format(&self) -> SampleFormat {
        self.params.sample_format
    }

    fn extradata(&self) -> Option<Vec<u8>> {
        match self.params.implementation.as_str() {
            "aac" | "libopus" => {
                let mut out = b"LBAC".to_vec();
                out.extend_from_slice(&self.params.sample_rate.to_le_bytes());
                out.extend_from_slice(&self.params.channels.to_le_bytes());
                Some(out)
            }
            _ => None,
        }
    }
}

impl Drop for LoopbackAudioEncoder {
    fn drop(&mut self) {
        self.shared
            .record(format!("drop-encoder:{}", self.params.implementation));
    }
}

/// Decoder for packets written by [`LoopbackAudioEncoder`].
pub struct LoopbackAudioDecoder {
    params: AudioDecoderParams,
    ready: VecDeque<AudioBuffer>,
    pushes: usize,
    fail_after: Option<usize>,
    draining: bool,
    shared: Arc<Shared>,
}

impl LoopbackAudioDecoder {
    pub(super) fn new(params: AudioDecoderParams, shared: Arc<Shared>) -> Self {
        let fail_after = shared.processing_failure(&params.implementation);
        Self {
            params,
            ready: VecDeque::new(),
            pushes: 0,
            fail_after,
            draining: false,
            shared,
        }
    }
}

impl AudioDecoderBackend for LoopbackAudioDecoder {
    fn send_packet(&mut self, input: Option<DecoderInput<'_>>) -> Result<(), CodecError> {
        self.shared.gate.pass();
        let Some(input) = input else {
            self.draining = true;
            return Ok(());
        };
        if self.draining {
            return Err(CodecError::Codec("decoder already drained".into()));
        }
        if self.fail_after == Some(self.pushes) {
            self.fail_after = None;
            return Err(CodecError::Codec(format!(
                "{}: injected processing failure",
                self.params.implementation
            )));
        }
        let data = input.data;
        if data.len() < HEADER_LEN || &data[..4] != MAGIC {
            return Err(CodecError::Codec("invalid loopback audio packet".into()));
        }
        let rate = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let channels = u16::from_le_bytes([data[8], data[9]]);
        let format = FORMATS
            .get(data[10] as usize)
            .copied()
            .ok_or_else(|| CodecError::Codec(format!("unknown sample code {}", data[10])))?;
        let payload = &data[HEADER_LEN..];
        let planes: SmallVec<[Vec<u8>; 2]> = if format.is_planar() && channels > 0 {
            let plane_len = payload.len() / channels as usize;
            payload.chunks(plane_len.max(1)).map(<[u8]>::to_vec).collect()
        } else {
            SmallVec::from_elem(payload.to_vec(), 1)
        };
        let buffer = AudioBuffer::from_planes(format, rate, channels, input.pts, planes)
            .map_err(|e| CodecError::Codec(e.to_string()))?;
        self.pushes += 1;
        self.ready.push_back(buffer);
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Pull<AudioBuffer>, CodecError> {
        Ok(match self.ready.pop_front() {
            Some(b) => Pull::Ready(b),
            None if self.draining => Pull::EndOfStream,
            None => Pull::NeedInput,
        })
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.ready.clear();
        self.draining = false;
        self.shared
            .record(format!("flush-buffers:{}", self.params.implementation));
        Ok(())
    }
}

impl Drop for LoopbackAudioDecoder {
    fn drop(&mut self) {
        self.shared
            .record(format!("drop-decoder:{}", self.params.implementation));
    }
}
