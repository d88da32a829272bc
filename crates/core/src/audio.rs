use std::{fmt, str::FromStr};

use smallvec::{SmallVec, smallvec};

use crate::format::FormatError;

/// Audio sample representation.
///
/// Packed formats interleave channels in a single plane; planar formats carry one plane per
/// channel.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::SampleFormat;
///
/// let fmt: SampleFormat = "f32-planar".parse().unwrap();
/// assert!(fmt.is_planar());
/// assert_eq!(fmt.packed(), SampleFormat::F32);
/// assert_eq!(fmt.bytes_per_sample(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
}

impl SampleFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "f32",
            SampleFormat::U8Planar => "u8-planar",
            SampleFormat::S16Planar => "s16-planar",
            SampleFormat::S32Planar => "s32-planar",
            SampleFormat::F32Planar => "f32-planar",
        }
    }

    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8Planar => 1,
            SampleFormat::S16 | SampleFormat::S16Planar => 2,
            SampleFormat::S32
            | SampleFormat::S32Planar
            | SampleFormat::F32
            | SampleFormat::F32Planar => 4,
        }
    }

    pub const fn is_planar(self) -> bool {
        matches!(
            self,
            SampleFormat::U8Planar
                | SampleFormat::S16Planar
                | SampleFormat::S32Planar
                | SampleFormat::F32Planar
        )
    }

    /// Interleaved variant with the same sample type.
    pub const fn packed(self) -> Self {
        match self {
            SampleFormat::U8Planar => SampleFormat::U8,
            SampleFormat::S16Planar => SampleFormat::S16,
            SampleFormat::S32Planar => SampleFormat::S32,
            SampleFormat::F32Planar => SampleFormat::F32,
            other => other,
        }
    }

    /// Planar variant with the same sample type.
    pub const fn planar(self) -> Self {
        match self {
            SampleFormat::U8 => SampleFormat::U8Planar,
            SampleFormat::S16 => SampleFormat::S16Planar,
            SampleFormat::S32 => SampleFormat::S32Planar,
            SampleFormat::F32 => SampleFormat::F32Planar,
            other => other,
        }
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        match self.packed() {
            SampleFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            SampleFormat::S16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            SampleFormat::S32 => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_648.0
            }
            _ => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    fn encode(self, value: f32, out: &mut [u8]) {
        let v = value.clamp(-1.0, 1.0);
        match self.packed() {
            SampleFormat::U8 => out[0] = (v * 127.0 + 128.0).round() as u8,
            SampleFormat::S16 => out.copy_from_slice(&((v * 32767.0).round() as i16).to_ne_bytes()),
            SampleFormat::S32 => {
                out.copy_from_slice(&((v as f64 * 2_147_483_647.0).round() as i32).to_ne_bytes())
            }
            _ => out.copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "u8" => SampleFormat::U8,
            "s16" => SampleFormat::S16,
            "s32" => SampleFormat::S32,
            "f32" => SampleFormat::F32,
            "u8-planar" => SampleFormat::U8Planar,
            "s16-planar" => SampleFormat::S16Planar,
            "s32-planar" => SampleFormat::S32Planar,
            "f32-planar" => SampleFormat::F32Planar,
            other => return Err(FormatError::UnknownSampleFormat(other.to_string())),
        })
    }
}

/// A block of PCM samples.
///
/// `timestamp` is in microseconds. Packed buffers hold one plane of
/// `frames * channels * bytes_per_sample` bytes; planar buffers hold `channels` planes of
/// `frames * bytes_per_sample` bytes.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::{AudioBuffer, SampleFormat};
///
/// let samples = [0.5f32, -0.5, 0.25, -0.25];
/// let buf = AudioBuffer::from_f32_interleaved(48_000, 2, 0, &samples)?;
/// assert_eq!(buf.frames(), 2);
/// let planar = buf.convert_format(SampleFormat::F32Planar);
/// assert_eq!(planar.planes().len(), 2);
/// assert_eq!(planar.to_f32_interleaved(), samples.to_vec());
/// # Ok::<(), mediaflow_core::prelude::FormatError>(())
/// ```
#[derive(Clone, PartialEq)]
pub struct AudioBuffer {
    format: SampleFormat,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    timestamp: i64,
    planes: SmallVec<[Vec<u8>; 2]>,
}

impl AudioBuffer {
    /// Zero-filled buffer (silence for signed and float formats).
    pub fn silence(format: SampleFormat, sample_rate: u32, channels: u16, frames: usize) -> Self {
        let (count, plane_len) = Self::plane_shape(format, channels, frames);
        let fill = if format.packed() == SampleFormat::U8 { 128 } else { 0 };
        Self {
            format,
            sample_rate,
            channels,
            frames,
            timestamp: 0,
            planes: (0..count).map(|_| vec![fill; plane_len]).collect(),
        }
    }

    /// Wrap existing plane data, checking it against the declared shape.
    pub fn from_planes(
        format: SampleFormat,
        sample_rate: u32,
        channels: u16,
        timestamp: i64,
        planes: SmallVec<[Vec<u8>; 2]>,
    ) -> Result<Self, FormatError> {
        if channels == 0 || sample_rate == 0 {
            return Err(FormatError::Geometry(
                "audio needs at least one channel and a sample rate".into(),
            ));
        }
        let expected_planes = if format.is_planar() { channels as usize } else { 1 };
        if planes.len() != expected_planes {
            return Err(FormatError::Geometry(format!(
                "{format} with {channels} channels needs {expected_planes} planes, got {}",
                planes.len()
            )));
        }
        let frame_bytes = if format.is_planar() {
            format.bytes_per_sample()
        } else {
            format.bytes_per_sample() * channels as usize
        };
        let len = planes[0].len();
        if len % frame_bytes != 0 || planes.iter().any(|p| p.len() != len) {
            return Err(FormatError::Geometry(
                "audio planes are not a whole number of frames".into(),
            ));
        }
        Ok(Self {
            format,
            sample_rate,
            channels,
            frames: len / frame_bytes,
            timestamp,
            planes,
        })
    }

    pub fn from_f32_interleaved(
        sample_rate: u32,
        channels: u16,
        timestamp: i64,
        samples: &[f32],
    ) -> Result<Self, FormatError> {
        let bytes = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::from_planes(SampleFormat::F32, sample_rate, channels, timestamp, smallvec![bytes])
    }

    fn plane_shape(format: SampleFormat, channels: u16, frames: usize) -> (usize, usize) {
        if format.is_planar() {
            (channels as usize, frames * format.bytes_per_sample())
        } else {
            (1, frames * channels as usize * format.bytes_per_sample())
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn planes(&self) -> &[Vec<u8>] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.planes
    }

    /// Playback length in microseconds.
    pub fn duration_us(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames as i64 * 1_000_000) / self.sample_rate as i64
    }

    /// One sample as normalised f32.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        let bps = self.format.bytes_per_sample();
        let (plane, offset) = if self.format.is_planar() {
            (&self.planes[channel], frame * bps)
        } else {
            (
                &self.planes[0],
                (frame * self.channels as usize + channel) * bps,
            )
        };
        self.format.decode(&plane[offset..offset + bps])
    }

    fn set_sample(&mut self, channel: usize, frame: usize, value: f32) {
        let bps = self.format.bytes_per_sample();
        let (plane, offset) = if self.format.is_planar() {
            (channel, frame * bps)
        } else {
            (0, (frame * self.channels as usize + channel) * bps)
        };
        let format = self.format;
        format.encode(value, &mut self.planes[plane][offset..offset + bps]);
    }

    pub fn to_f32_interleaved(&self) -> Vec<f32> {
        let channels = self.channels as usize;
        let mut out = Vec::with_capacity(self.frames * channels);
        for frame in 0..self.frames {
            for ch in 0..channels {
                out.push(self.sample(ch, frame));
            }
        }
        out
    }

    /// Re-encode samples into `format`, keeping rate, channels and timestamp.
    pub fn convert_format(&self, format: SampleFormat) -> Self {
        if format == self.format {
            return self.clone();
        }
        let mut out = Self::silence(format, self.sample_rate, self.channels, self.frames);
        out.timestamp = self.timestamp;
        for frame in 0..self.frames {
            for ch in 0..self.channels as usize {
                out.set_sample(ch, frame, self.sample(ch, frame));
            }
        }
        out
    }

    /// Copy of frames `start..start + len`, clamped to the buffer.
    ///
    /// The timestamp advances by the skipped duration.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let start = start.min(self.frames);
        let len = len.min(self.frames - start);
        let unit = self.frame_unit();
        let planes = self
            .planes
            .iter()
            .map(|p| p[start * unit..(start + len) * unit].to_vec())
            .collect();
        Self {
            format: self.format,
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames: len,
            timestamp: self.timestamp + self.frames_to_us(start),
            planes,
        }
    }

    /// Append `other`'s samples. Fails if the shapes differ.
    pub fn append(&mut self, other: &AudioBuffer) -> Result<(), FormatError> {
        if other.format != self.format
            || other.channels != self.channels
            || other.sample_rate != self.sample_rate
        {
            return Err(FormatError::Geometry(format!(
                "cannot append {}/{}ch/{}Hz audio to {}/{}ch/{}Hz",
                other.format,
                other.channels,
                other.sample_rate,
                self.format,
                self.channels,
                self.sample_rate
            )));
        }
        for (dst, src) in self.planes.iter_mut().zip(other.planes.iter()) {
            dst.extend_from_slice(src);
        }
        self.frames += other.frames;
        Ok(())
    }

    /// Drop the first `count` frames in place.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.frames);
        let unit = self.frame_unit();
        for plane in self.planes.iter_mut() {
            plane.drain(..count * unit);
        }
        self.timestamp += self.frames_to_us(count);
        self.frames -= count;
    }

    fn frame_unit(&self) -> usize {
        if self.format.is_planar() {
            self.format.bytes_per_sample()
        } else {
            self.format.bytes_per_sample() * self.channels as usize
        }
    }

    fn frames_to_us(&self, frames: usize) -> i64 {
        if self.sample_rate == 0 {
            0
        } else {
            frames as i64 * 1_000_000 / self.sample_rate as i64
        }
    }
}

impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
