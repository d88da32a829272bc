use mediaflow_core::{
    audio::SampleFormat,
    format::{PixelFormat, VideoColorSpace},
};

/// Ordered implementation-private options (`preset=ultrafast`, `crf=23`, ...).
///
/// Setting an existing key replaces its value in place, so application order is stable.
///
/// # Example
/// ```rust
/// use mediaflow_codec::params::CodecOptions;
///
/// let mut opts = CodecOptions::default();
/// opts.set("preset", "medium");
/// opts.set("tune", "zerolatency");
/// opts.set("preset", "ultrafast");
/// assert_eq!(opts.get("preset"), Some("ultrafast"));
/// assert_eq!(opts.iter().next(), Some(("preset", "ultrafast")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CodecOptions(Vec<(String, String)>);

impl CodecOptions {
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Codec-level rate control fields. Zero means "leave at the codec default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateControl {
    pub bit_rate: u64,
    pub min_rate: u64,
    pub max_rate: u64,
    pub buffer_size: u64,
    pub qmin: Option<i32>,
    pub qmax: Option<i32>,
}

/// Everything needed to open a video encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderParams {
    /// Toolkit implementation name (`libx264`, `h264_vaapi`, ...).
    pub implementation: String,
    pub width: u32,
    pub height: u32,
    /// Format handed to the codec; a hardware surface format for VA-API.
    pub pixel_format: PixelFormat,
    /// (numerator, denominator); timestamps in microseconds use `(1, 1_000_000)`.
    pub time_base: (i32, i32),
    pub framerate: (i32, i32),
    pub gop: u32,
    pub max_b_frames: u32,
    pub rate: RateControl,
    pub color: VideoColorSpace,
    /// 0 lets the codec pick.
    pub threads: u32,
    pub delay: Option<u32>,
    pub refs: Option<u32>,
    /// Emit parameter sets out of band (extradata) instead of in the bitstream.
    pub global_header: bool,
    pub options: CodecOptions,
}

impl VideoEncoderParams {
    /// Baseline parameters shared by every implementation.
    pub fn new(implementation: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            implementation: implementation.into(),
            width,
            height,
            pixel_format: PixelFormat::I420,
            time_base: (1, 1_000_000),
            framerate: (30, 1),
            gop: 30,
            max_b_frames: 0,
            rate: RateControl::default(),
            color: VideoColorSpace::default(),
            threads: 0,
            delay: None,
            refs: None,
            global_header: false,
            options: CodecOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDecoderParams {
    pub implementation: String,
    /// Coded size hint; decoders learn the real size from the bitstream.
    pub size: Option<(u32, u32)>,
    /// Codec description (avcC, hvcC, ...).
    pub extradata: Option<Vec<u8>>,
    pub threads: u32,
}

impl VideoDecoderParams {
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            size: None,
            extradata: None,
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoderParams {
    pub implementation: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub bit_rate: u64,
    pub time_base: (i32, i32),
    pub options: CodecOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDecoderParams {
    pub implementation: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub extradata: Option<Vec<u8>>,
}

/// Device-resident frame pool description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwFramesParams {
    /// Surface format the codec consumes.
    pub hw_format: PixelFormat,
    /// CPU-side format uploaded into the surfaces.
    pub sw_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub initial_pool_size: u32,
}

impl HwFramesParams {
    pub fn new(hw_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            hw_format,
            sw_format: PixelFormat::Nv12,
            width,
            height,
            initial_pool_size: 20,
        }
    }
}
