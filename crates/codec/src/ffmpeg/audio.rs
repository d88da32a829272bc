use std::collections::VecDeque;

use ffmpeg_next::{
    codec, decoder, encoder,
    error::Error as FfmpegError,
    ffi::{
        AV_CODEC_CAP_VARIABLE_FRAME_SIZE, AVSampleFormat, av_channel_layout_default,
        av_frame_get_buffer,
    },
    frame::Audio as AudioFrame,
    packet::{self, Packet},
};
use mediaflow_core::audio::{AudioBuffer, SampleFormat};
use smallvec::SmallVec;

use super::{
    decoder::set_extradata,
    util::{SendSync, ff_err, from_av_sample, is_again, to_av_sample},
};
use crate::{
    CodecError,
    params::{AudioDecoderParams, AudioEncoderParams},
    toolkit::{AudioDecoderBackend, AudioEncoderBackend, DecoderInput, EncodedPacket, Pull},
};

/// Build an FFmpeg frame holding a copy of `buf`.
pub(crate) fn to_av_frame(buf: &AudioBuffer) -> Result<AudioFrame, CodecError> {
    let mut frame = AudioFrame::empty();
    unsafe {
        let raw = frame.as_mut_ptr();
        (*raw).format = AVSampleFormat::from(to_av_sample(buf.format())) as i32;
        (*raw).nb_samples = buf.frames() as i32;
        (*raw).sample_rate = buf.sample_rate() as i32;
        av_channel_layout_default(&mut (*raw).ch_layout, buf.channels() as i32);
        let ret = av_frame_get_buffer(raw, 0);
        if ret < 0 {
            return Err(CodecError::Allocation(format!(
                "av_frame_get_buffer failed: {}",
                FfmpegError::from(ret)
            )));
        }
        for (idx, plane) in buf.planes().iter().enumerate() {
            let dst = *(*raw).extended_data.add(idx);
            std::ptr::copy_nonoverlapping(plane.as_ptr(), dst, plane.len());
        }
    }
    frame.set_pts(Some(buf.timestamp()));
    Ok(frame)
}

/// Copy a decoded or resampled FFmpeg frame out into an [`AudioBuffer`].
pub(crate) fn from_av_frame(frame: &AudioFrame, timestamp: i64) -> Result<AudioBuffer, CodecError> {
    let format = from_av_sample(frame.format()).ok_or_else(|| {
        CodecError::Unsupported(format!("sample format {:?}", frame.format()))
    })?;
    unsafe {
        let raw = frame.as_ptr();
        let channels = (*raw).ch_layout.nb_channels.max(0) as usize;
        let samples = (*raw).nb_samples.max(0) as usize;
        let (plane_count, plane_len) = if format.is_planar() {
            (channels, samples * format.bytes_per_sample())
        } else {
            (1, samples * channels * format.bytes_per_sample())
        };
        let mut planes: SmallVec<[Vec<u8>; 2]> = SmallVec::with_capacity(plane_count);
        for idx in 0..plane_count {
            let src = *(*raw).extended_data.add(idx);
            planes.push(std::slice::from_raw_parts(src, plane_len).to_vec());
        }
        AudioBuffer::from_planes(
            format,
            (*raw).sample_rate as u32,
            channels as u16,
            timestamp,
            planes,
        )
        .map_err(|e| CodecError::Codec(e.to_string()))
    }
}

/// libavcodec audio encoder.
pub struct FfmpegAudioEncoder {
    encoder: SendSync<encoder::audio::Encoder>,
    codec: SendSync<ffmpeg_next::Codec>,
    params: AudioEncoderParams,
    frame_size: Option<usize>,
    ready: VecDeque<EncodedPacket>,
    drained: bool,
}

fn open_audio_context(
    codec: ffmpeg_next::Codec,
    params: &AudioEncoderParams,
) -> Result<encoder::audio::Encoder, CodecError> {
    let ctx = codec::Context::new_with_codec(codec);
    let mut enc = ctx
        .encoder()
        .audio()
        .map_err(|e| CodecError::Open(e.to_string()))?;
    enc.set_rate(params.sample_rate as i32);
    enc.set_format(to_av_sample(params.sample_format));
    enc.set_bit_rate(params.bit_rate as usize);
    enc.set_time_base(params.time_base);
    unsafe {
        av_channel_layout_default(&mut (*enc.as_mut_ptr()).ch_layout, params.channels as i32);
    }
    let mut options = ffmpeg_next::Dictionary::new();
    for (key, value) in params.options.iter() {
        options.set(key, value);
    }
    enc.open_as_with(codec, options)
        .map_err(|e| CodecError::Open(format!("{}: {e}", params.implementation)))
}

impl FfmpegAudioEncoder {
    pub(crate) fn open(params: &AudioEncoderParams) -> Result<Self, CodecError> {
        let codec = encoder::find_by_name(&params.implementation)
            .ok_or_else(|| CodecError::NotFound(params.implementation.clone()))?;
        let encoder = open_audio_context(codec, params)?;
        let variable = unsafe { (*codec.as_ptr()).capabilities } as u32
            & AV_CODEC_CAP_VARIABLE_FRAME_SIZE
            != 0;
        let frame_size = match unsafe { (*encoder.as_ptr()).frame_size } {
            n if n > 0 && !variable => Some(n as usize),
            _ => None,
        };
        Ok(Self {
            encoder: SendSync(encoder),
            codec: SendSync(codec),
            params: params.clone(),
            frame_size,
            ready: VecDeque::new(),
            drained: false,
        })
    }

    fn pull(&mut self) -> Result<Pull<EncodedPacket>, CodecError> {
        let mut packet = Packet::empty();
        match self.encoder.0.receive_packet(&mut packet) {
            Ok(()) => Ok(Pull::Ready(EncodedPacket {
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                keyframe: true,
                pts: packet.pts().unwrap_or(0),
                duration: packet.duration(),
            })),
            Err(err) if is_again(&err) => Ok(Pull::NeedInput),
            Err(FfmpegError::Eof) => Ok(Pull::EndOfStream),
            Err(err) => Err(ff_err("receive_packet")(err)),
        }
    }
}

impl AudioEncoderBackend for FfmpegAudioEncoder {
    fn send_frame(&mut self, input: Option<&AudioBuffer>) -> Result<(), CodecError> {
        let Some(buf) = input else {
            self.drained = true;
            return self.encoder.0.send_eof().map_err(ff_err("send_eof"));
        };
        let frame = to_av_frame(buf)?;
        match self.encoder.0.send_frame(&frame) {
            Ok(()) => Ok(()),
            Err(err) if is_again(&err) => {
                while let Pull::Ready(packet) = self.pull()? {
                    self.ready.push_back(packet);
                }
                self.encoder.0.send_frame(&frame).map_err(ff_err("send_frame"))
            }
            Err(err) => Err(CodecError::Codec(format!(
                "{} send_frame failed: {err}",
                self.params.implementation
            ))),
        }
    }

    fn receive_packet(&mut self) -> Result<Pull<EncodedPacket>, CodecError> {
        match self.ready.pop_front() {
            Some(packet) => Ok(Pull::Ready(packet)),
            None => self.pull(),
        }
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.ready.clear();
        if self.drained {
            self.encoder = SendSync(open_audio_context(self.codec.0, &self.params)?);
            self.drained = false;
        } else {
            unsafe { ffmpeg_next::ffi::avcodec_flush_buffers(self.encoder.0.as_mut_ptr()) };
        }
        Ok(())
    }

    fn frame_size(&self) -> Option<usize> {
        self.frame_size
    }

    fn sample_format(&self) -> SampleFormat {
        self.params.sample_format
    }

    fn extradata(&self) -> Option<Vec<u8>> {
        unsafe {
            let raw = self.encoder.0.as_ptr();
            let size = (*raw).extradata_size;
            if (*raw).extradata.is_null() || size <= 0 {
                return None;
            }
            Some(std::slice::from_raw_parts((*raw).extradata, size as usize).to_vec())
        }
    }
}

/// libavcodec audio decoder.
pub struct FfmpegAudioDecoder {
    decoder: SendSync<decoder::Audio>,
    implementation: String,
    ready: VecDeque<AudioBuffer>,
}

impl FfmpegAudioDecoder {
    pub(crate) fn open(params: &AudioDecoderParams) -> Result<Self, CodecError> {
        let codec = decoder::find_by_name(&params.implementation)
            .ok_or_else(|| CodecError::NotFound(params.implementation.clone()))?;
        let mut ctx = codec::Context::new_with_codec(codec);
        unsafe {
            let raw = ctx.as_mut_ptr();
            (*raw).sample_rate = params.sample_rate as i32;
            av_channel_layout_default(&mut (*raw).ch_layout, params.channels as i32);
            if let Some(extradata) = params.extradata.as_deref()
                && !extradata.is_empty()
            {
                set_extradata(raw, extradata)?;
            }
        }
        let decoder = ctx
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.audio())
            .map_err(|e| CodecError::Open(format!("{}: {e}", params.implementation)))?;
        Ok(Self {
            decoder: SendSync(decoder),
            implementation: params.implementation.clone(),
            ready: VecDeque::new(),
        })
    }

    fn pull(&mut self) -> Result<Pull<AudioBuffer>, CodecError> {
        let mut frame = AudioFrame::empty();
        match self.decoder.0.receive_frame(&mut frame) {
            Ok(()) => {
                let pts = frame.pts().unwrap_or(0);
                from_av_frame(&frame, pts).map(Pull::Ready)
            }
            Err(err) if is_again(&err) => Ok(Pull::NeedInput),
            Err(FfmpegError::Eof) => Ok(Pull::EndOfStream),
            Err(err) => Err(ff_err("receive_frame")(err)),
        }
    }
}

impl AudioDecoderBackend for FfmpegAudioDecoder {
    fn send_packet(&mut self, input: Option<DecoderInput<'_>>) -> Result<(), CodecError> {
        let Some(input) = input else {
            return self.decoder.0.send_eof().map_err(ff_err("send_eof"));
        };
        let mut packet = Packet::copy(input.data);
        packet.set_pts(Some(input.pts));
        packet.set_dts(Some(input.pts));
        packet.set_duration(input.duration);
        if input.keyframe {
            packet.set_flags(packet::Flags::KEY);
        }
        match self.decoder.0.send_packet(&packet) {
            Ok(()) => Ok(()),
            Err(err) if is_again(&err) => {
                while let Pull::Ready(buf) = self.pull()? {
                    self.ready.push_back(buf);
                }
                self.decoder
                    .0
                    .send_packet(&packet)
                    .map_err(ff_err("send_packet"))
            }
            Err(err) => Err(CodecError::Codec(format!(
                "{} send_packet failed: {err}",
                self.implementation
            ))),
        }
    }

    fn receive_frame(&mut self) -> Result<Pull<AudioBuffer>, CodecError> {
        match self.ready.pop_front() {
            Some(buf) => Ok(Pull::Ready(buf)),
            None => self.pull(),
        }
    }

    fn flush_buffers(&mut self) -> Result<(), CodecError> {
        self.ready.clear();
        self.decoder.0.flush();
        Ok(())
    }
}
