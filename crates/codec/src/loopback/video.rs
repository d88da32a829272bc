use std::{collections::VecDeque, sync::Arc};

use mediaflow_core::{
    buffer::{BufferPool, FrameLease, FrameMeta},
    format::{MediaFormat, PixelFormat, Resolution},
};

use super::Shared;
use crate::{
    CodecError,
    params::{VideoDecoderParams, VideoEncoderParams},
    toolkit::{
        DecoderInput, EncodedPacket, EncoderInput, Pull, VideoDecoderBackend, VideoEncoderBackend,
    },
};

const MAGIC: &[u8; 4] = b"LBV1";
const HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4;
const FLAG_KEY: u8 = 1;

const FORMATS: &[PixelFormat] = &[
    PixelFormat::I420,
    PixelFormat::I420A,
    PixelFormat::I422,
    PixelFormat::I444,
    PixelFormat::Nv12,
    PixelFormat::Rgba,
    PixelFormat::Rgbx,
    PixelFormat::Bgra,
    PixelFormat::Bgrx,
];

fn format_code(fmt: PixelFormat) -> Option<u8> {
    FORMATS.iter().position(|f| *f == fmt).map(|i| i as u8)
}

fn write_packet(fmt: PixelFormat, width: u32, height: u32, key: bool, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(if key { FLAG_KEY } else { 0 });
    out.push(format_code(fmt).unwrap_or(0));
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

struct ParsedPacket<'a> {
    format: PixelFormat,
    width: u32,
    height: u32,
    payload: &'a [u8],
}

fn parse_packet(data: &[u8]) -> Result<ParsedPacket<'_>, CodecError> {
    if data.len() < HEADER_LEN || &data[..4] != MAGIC {
        return Err(CodecError::Codec("invalid loopback video packet".into()));
    }
    let format = FORMATS
        .get(data[5] as usize)
        .copied()
        .ok_or_else(|| CodecError::Codec(format!("unknown format code {}", data[5])))?;
    let width = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
    let height = u32::from_le_bytes([data[10], data[11], data[12], data[13]]);
    Ok(ParsedPacket {
        format,
        width,
        height,
        payload: &data[HEADER_LEN..],
    })
}

/// Encoder that frames raw pixels with a header and holds back `delay` frames.
pub struct LoopbackVideoEncoder {
    params: VideoEncoderParams,
    /// CPU format accepted when the codec consumes device surfaces.
    input_format: PixelFormat,
    hardware: bool,
    delay: usize,
    pending: VecDeque<EncodedPacket>,
    ready: VecDeque<EncodedPacket>,
    frames_since_key: u32,
    pushes: usize,
    fail_after: Option<usize>,
    draining: bool,
    shared: Arc<Shared>,
}

impl LoopbackVideoEncoder {
    pub(super) fn new(
        params: VideoEncoderParams,
        upload: Option<PixelFormat>,
        hardware: bool,
        shared: Arc<Shared>,
    ) -> Self {
        let input_format = upload.unwrap_or(params.pixel_format);
        let delay = params.delay.map_or_else(|| shared.lookahead(), |d| d as usize);
        let fail_after = shared.processing_failure(&params.implementation);
        Self {
            params,
            input_format,
            hardware,
            delay,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            frames_since_key: 0,
            pushes: 0,
            fail_after,
            draining: false,
            shared,
        }
    }

    pub fn params(&self) -> &VideoEncoderParams {
        &self.params
    }

    /// Whether the encoder was opened with a device context.
    pub fn has_device(&self) -> bool {
        self.hardware
    }

    fn extradata_bytes(&self) -> Vec<u8> {
        let mut out = b"LBVC".to_vec();
        out.extend_from_slice(&self.params.width.to_le_bytes());
        out.extend_from_slice(&self.params.height.to_le_bytes());
        out
    }
}

impl VideoEncoderBackend for LoopbackVideoEncoder {
    fn send_frame(&mut self, input: Option<EncoderInput<'_>>) -> Result<(), CodecError> {
        self.shared.gate.pass();
        let Some(input) = input else {
            self.draining = true;
            self.ready.extend(self.pending.drain(..));
            return Ok(());
        };
        if self.draining {
            return Err(CodecError::Codec(
                "encoder already drained; flush buffers before reuse".into(),
            ));
        }
        if self.fail_after == Some(self.pushes) {
            self.fail_after = None;
            return Err(CodecError::Codec(format!(
                "{}: injected processing failure",
                self.params.implementation
            )));
        }
        let frame = input.frame;
        if frame.pixel_format() != self.input_format
            || frame.width() != self.params.width
            || frame.height() != self.params.height
        {
            return Err(CodecError::Codec(format!(
                "{} expects {} {}x{}, got {} {}x{}",
                self.params.implementation,
                self.input_format,
                self.params.width,
                self.params.height,
                frame.pixel_format(),
                frame.width(),
                frame.height()
            )));
        }
        frame
            .validate()
            .map_err(|e| CodecError::Codec(e.to_string()))?;
        self.pushes += 1;

        let gop = self.params.gop.max(1);
        let key = input.force_keyframe || self.frames_since_key % gop == 0;
        self.frames_since_key = if key { 1 } else { self.frames_since_key + 1 };
        let data = write_packet(
            self.input_format,
            frame.width(),
            frame.height(),
            key,
            &frame.to_packed(),
        );
        self.pending.push_back(EncodedPacket {
            data,
            keyframe: key,
            pts: input.pts,
            duration: input.duration,
        });
        while self.pending.len() > self.delay {
            if let Some(packet) = self.pending.pop_front() {
                self.ready.push_back(packet);
            }
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Pull<EncodedPacket>, CodecError> {
        Ok(match self.ready.pop_front() {
            Some(packet) => Pull::Ready(packet),
            None if self.draining => Pull::EndOfStream,
            None => Pull::NeedInput,
        })
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.pending.clear();
        self.ready.clear();
        self.draining = false;
        self.frames_since_key = 0;
        self.shared
            .record(format!("flush-buffers:{}", self.params.implementation));
        Ok(())
    }

    fn extradata(&self) -> Option<Vec<u8>> {
        self.params.global_header.then(|| self.extradata_bytes())
    }

    fn pixel_format(&self) -> PixelFormat {
        self.input_format
    }
}

impl Drop for LoopbackVideoEncoder {
    fn drop(&mut self) {
        self.shared
            .record(format!("drop-encoder:{}", self.params.implementation));
    }
}

/// Decoder for packets written by [`LoopbackVideoEncoder`].
pub struct LoopbackVideoDecoder {
    params: VideoDecoderParams,
    pool: BufferPool,
    delay: usize,
    pending: VecDeque<FrameLease>,
    ready: VecDeque<FrameLease>,
    pushes: usize,
    fail_after: Option<usize>,
    draining: bool,
    shared: Arc<Shared>,
}

impl LoopbackVideoDecoder {
    pub(super) fn new(params: VideoDecoderParams, shared: Arc<Shared>) -> Self {
        let fail_after = shared.processing_failure(&params.implementation);
        Self {
            delay: shared.decoder_delay(),
            params,
            pool: BufferPool::with_limits(0, 0, 16),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            pushes: 0,
            fail_after,
            draining: false,
            shared,
        }
    }

    pub fn params(&self) -> &VideoDecoderParams {
        &self.params
    }
}

impl VideoDecoderBackend for LoopbackVideoDecoder {
    fn send_packet(&mut self, input: Option<DecoderInput<'_>>) -> Result<(), CodecError> {
        self.shared.gate.pass();
        let Some(input) = input else {
            self.draining = true;
            self.ready.extend(self.pending.drain(..));
            return Ok(());
        };
        if self.draining {
            return Err(CodecError::Codec(
                "decoder already drained; flush buffers before reuse".into(),
            ));
        }
        if self.fail_after == Some(self.pushes) {
            self.fail_after = None;
            return Err(CodecError::Codec(format!(
                "{}: injected processing failure",
                self.params.implementation
            )));
        }
        let packet = parse_packet(input.data)?;
        let resolution = Resolution::new(packet.width, packet.height)
            .ok_or_else(|| CodecError::Codec("packet declares an empty frame".into()))?;
        let meta = FrameMeta::new(
            MediaFormat::new(packet.format, resolution, Default::default()),
            input.pts,
        )
        .with_duration(input.duration);
        let frame = FrameLease::from_packed(&self.pool, meta, packet.payload)
            .map_err(|e| CodecError::Codec(e.to_string()))?;
        self.pushes += 1;
        self.pending.push_back(frame);
        while self.pending.len() > self.delay {
            if let Some(frame) = self.pending.pop_front() {
                self.ready.push_back(frame);
            }
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Pull<FrameLease>, CodecError> {
        Ok(match self.ready.pop_front() {
            Some(frame) => Pull::Ready(frame),
            None if self.draining => Pull::EndOfStream,
            None => Pull::NeedInput,
        })
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.pending.clear();
        self.ready.clear();
        self.draining = false;
        self.shared
            .record(format!("flush-buffers:{}", self.params.implementation));
        Ok(())
    }
}

impl Drop for LoopbackVideoDecoder {
    fn drop(&mut self) {
        self.shared
            .record(format!("drop-decoder:{}", self.params.implementation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{loopback::LoopbackToolkit, toolkit::Toolkit};
    use mediaflow_core::format::VideoColorSpace;

    fn i420(pool: &BufferPool, w: u32, h: u32, fill: u8) -> FrameLease {
        let res = Resolution::new(w, h).unwrap();
        let meta = FrameMeta::new(
            MediaFormat::new(PixelFormat::I420, res, VideoColorSpace::default()),
            0,
        );
        let size = PixelFormat::I420.frame_size(w, h);
        FrameLease::from_packed(pool, meta, &vec![fill; size]).unwrap()
    }

    fn drain(enc: &mut LoopbackVideoEncoder) -> Vec<EncodedPacket> {
        let mut out = Vec::new();
        while let Pull::Ready(p) = enc.receive_packet().unwrap() {
            out.push(p);
        }
        out
    }

    #[test]
    fn lookahead_holds_frames_until_drained() {
        let toolkit = LoopbackToolkit::new();
        let pool = BufferPool::default();
        let params = VideoEncoderParams::new("libx264", 16, 16);
        let mut enc = toolkit.open_video_encoder(&params, None, None).unwrap();
        for pts in 0..3 {
            let frame = i420(&pool, 16, 16, pts as u8);
            enc.send_frame(Some(EncoderInput {
                frame: &frame,
                pts,
                duration: 1,
                force_keyframe: false,
            }))
            .unwrap();
        }
        let early = drain(&mut enc);
        assert_eq!(early.len(), 1);
        assert!(early[0].keyframe);
        enc.send_frame(None).unwrap();
        let rest = drain(&mut enc);
        assert_eq!(rest.iter().map(|p| p.pts).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(enc.receive_packet().unwrap(), Pull::EndOfStream);
        enc.flush_buffers().unwrap();
        assert_eq!(enc.receive_packet().unwrap(), Pull::NeedInput);
    }

    #[test]
    fn packets_decode_to_the_same_pixels() {
        let toolkit = LoopbackToolkit::new();
        let pool = BufferPool::default();
        let mut params = VideoEncoderParams::new("libvpx", 8, 6);
        params.delay = Some(0);
        let mut enc = toolkit.open_video_encoder(&params, None, None).unwrap();
        let frame = i420(&pool, 8, 6, 77);
        enc.send_frame(Some(EncoderInput {
            frame: &frame,
            pts: 5,
            duration: 2,
            force_keyframe: false,
        }))
        .unwrap();
        let packet = enc.receive_packet().unwrap().ready().unwrap();

        let mut dec = toolkit
            .open_video_decoder(&VideoDecoderParams::new("vp8"), None)
            .unwrap();
        dec.send_packet(Some(DecoderInput {
            data: &packet.data,
            pts: packet.pts,
            duration: packet.duration,
            keyframe: packet.keyframe,
        }))
        .unwrap();
        let out = dec.receive_frame().unwrap().ready().unwrap();
        assert_eq!(out.meta().timestamp, 5);
        assert_eq!(out.to_packed(), frame.to_packed());
    }

    #[test]
    fn rejects_mismatched_input() {
        let toolkit = LoopbackToolkit::new();
        let pool = BufferPool::default();
        let params = VideoEncoderParams::new("libx264", 16, 16);
        let mut enc = toolkit.open_video_encoder(&params, None, None).unwrap();
        let frame = i420(&pool, 8, 8, 0);
        let err = enc
            .send_frame(Some(EncoderInput {
                frame: &frame,
                pts: 0,
                duration: 0,
                force_keyframe: false,
            }))
            .unwrap_err();
        assert!(matches!(err, CodecError::Codec(_)));
    }

    #[test]
    fn corrupt_packets_are_errors() {
        let toolkit = LoopbackToolkit::new();
        let mut dec = toolkit
            .open_video_decoder(&VideoDecoderParams::new("h264"), None)
            .unwrap();
        let err = dec
            .send_packet(Some(DecoderInput {
                data: b"junk",
                pts: 0,
                duration: 0,
                keyframe: true,
            }))
            .unwrap_err();
        assert!(matches!(err, CodecError::Codec(_)));
    }
}
