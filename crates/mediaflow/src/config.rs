//! Session configuration as the host describes it.
//!
//! String-valued enums accept the host spellings through [`FromStr`]; unknown spellings are a
//! configuration error except for the hardware preference, which falls back to
//! [`HwPreference::NoPreference`].

use std::{fmt, str::FromStr};

use mediaflow_codec::selector::HwPreference;
use mediaflow_core::format::{PixelFormat, VideoColorSpace};

use crate::error::SessionError;

/// Default video bitrate in bits per second.
pub const DEFAULT_VIDEO_BITRATE: u64 = 2_000_000;
/// Default audio bitrate in bits per second.
pub const DEFAULT_AUDIO_BITRATE: u64 = 128_000;
pub const DEFAULT_FRAMERATE: f64 = 30.0;

macro_rules! host_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum $name {
            $(
                #[cfg_attr(feature = "serde", serde(rename = $text))]
                $variant,
            )+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SessionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(SessionError::Configuration(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

host_enum!(
    /// Rate control strategy.
    BitrateMode { Constant => "constant", Variable => "variable", Quantizer => "quantizer" }
    default Variable
);

host_enum!(
    /// Trade compression efficiency for per-frame latency.
    LatencyMode { Quality => "quality", Realtime => "realtime" }
    default Quality
);

host_enum!(
    /// Whether the alpha plane of the input survives encoding.
    AlphaMode { Discard => "discard", Keep => "keep" }
    default Discard
);

host_enum!(
    /// H.264 bitstream framing: in-band parameter sets or out-of-band `avcC`.
    AvcFormat { AnnexB => "annexb", Avc => "avc" }
    default AnnexB
);

/// Temporal scalability modes the encoders understand.
///
/// # Example
/// ```rust
/// use mediaflow::config::ScalabilityMode;
///
/// assert_eq!("L1T3".parse::<ScalabilityMode>().unwrap().temporal_layers(), 3);
/// assert!("L2T2".parse::<ScalabilityMode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalabilityMode {
    L1T1,
    L1T2,
    L1T3,
}

impl ScalabilityMode {
    pub const fn temporal_layers(self) -> u32 {
        match self {
            ScalabilityMode::L1T1 => 1,
            ScalabilityMode::L1T2 => 2,
            ScalabilityMode::L1T3 => 3,
        }
    }
}

impl FromStr for ScalabilityMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L1T1" => Ok(ScalabilityMode::L1T1),
            "L1T2" => Ok(ScalabilityMode::L1T2),
            "L1T3" => Ok(ScalabilityMode::L1T3),
            other => Err(SessionError::Configuration(format!(
                "unsupported scalability mode '{other}'"
            ))),
        }
    }
}

/// Configuration for [`VideoEncoder`](crate::VideoEncoder).
///
/// # Example
/// ```rust
/// use mediaflow::prelude::*;
///
/// let config = VideoEncoderConfig::new("avc1.42001f", 320, 240)
///     .with_bitrate(500_000)
///     .with_bitrate_mode(BitrateMode::Constant)
///     .with_latency_mode(LatencyMode::Realtime);
/// assert_eq!(config.framerate, 30.0);
/// assert_eq!(config.hardware_acceleration, HwPreference::NoPreference);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct VideoEncoderConfig {
    /// Codec string (`avc1.42001f`, `vp09.00.10.08`, ...) or implementation name.
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    pub bitrate_mode: BitrateMode,
    pub framerate: f64,
    pub hardware_acceleration: HwPreference,
    pub color_space: VideoColorSpace,
    /// H.264 `profile_idc`; derived from an `avc1.PPCCLL` codec string when unset.
    pub profile: Option<u8>,
    pub avc_format: AvcFormat,
    pub latency_mode: LatencyMode,
    pub alpha: AlphaMode,
    /// Host spelling (`L1T2`, ...); validated at configure time.
    pub scalability_mode: Option<String>,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            codec: String::new(),
            width: 0,
            height: 0,
            bitrate: DEFAULT_VIDEO_BITRATE,
            bitrate_mode: BitrateMode::default(),
            framerate: DEFAULT_FRAMERATE,
            hardware_acceleration: HwPreference::default(),
            color_space: VideoColorSpace::default(),
            profile: None,
            avc_format: AvcFormat::default(),
            latency_mode: LatencyMode::default(),
            alpha: AlphaMode::default(),
            scalability_mode: None,
        }
    }
}

impl VideoEncoderConfig {
    pub fn new(codec: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            codec: codec.into(),
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_bitrate_mode(mut self, mode: BitrateMode) -> Self {
        self.bitrate_mode = mode;
        self
    }

    pub fn with_framerate(mut self, framerate: f64) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn with_hardware_acceleration(mut self, preference: HwPreference) -> Self {
        self.hardware_acceleration = preference;
        self
    }

    pub fn with_color_space(mut self, color: VideoColorSpace) -> Self {
        self.color_space = color;
        self
    }

    pub fn with_profile(mut self, profile: u8) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_avc_format(mut self, format: AvcFormat) -> Self {
        self.avc_format = format;
        self
    }

    pub fn with_latency_mode(mut self, mode: LatencyMode) -> Self {
        self.latency_mode = mode;
        self
    }

    pub fn with_alpha(mut self, alpha: AlphaMode) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_scalability_mode(mut self, mode: impl Into<String>) -> Self {
        self.scalability_mode = Some(mode.into());
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.codec.is_empty() {
            return Err(SessionError::Configuration("codec is required".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(SessionError::Configuration(format!(
                "invalid frame size {}x{}",
                self.width, self.height
            )));
        }
        if !self.framerate.is_finite() || self.framerate <= 0.0 {
            return Err(SessionError::Configuration(format!(
                "invalid framerate {}",
                self.framerate
            )));
        }
        self.scalability()?;
        Ok(())
    }

    /// Parsed scalability mode; `None` when unset.
    pub fn scalability(&self) -> Result<Option<ScalabilityMode>, SessionError> {
        self.scalability_mode
            .as_deref()
            .map(str::parse)
            .transpose()
    }

    /// Integer frames per second used for the GOP and the codec frame rate.
    pub fn fps(&self) -> u32 {
        (self.framerate.round() as u32).max(1)
    }

    /// Explicit profile, or the `profile_idc` byte of an `avc1.PPCCLL` string.
    pub fn avc_profile(&self) -> Option<u8> {
        self.profile.or_else(|| {
            let hex = self
                .codec
                .strip_prefix("avc1.")
                .or_else(|| self.codec.strip_prefix("avc3."))?;
            u8::from_str_radix(hex.get(..2)?, 16).ok()
        })
    }
}

/// Configuration for [`VideoDecoder`](crate::VideoDecoder).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct VideoDecoderConfig {
    pub codec: String,
    pub coded_width: Option<u32>,
    pub coded_height: Option<u32>,
    /// Codec description (avcC / hvcC) forwarded as extradata.
    pub description: Option<Vec<u8>>,
    pub hardware_acceleration: HwPreference,
    /// Convert decoded frames to this format; frames are delivered as decoded when unset.
    pub output_format: Option<PixelFormat>,
}

impl VideoDecoderConfig {
    pub fn new(codec: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            ..Self::default()
        }
    }

    pub fn with_coded_size(mut self, width: u32, height: u32) -> Self {
        self.coded_width = Some(width);
        self.coded_height = Some(height);
        self
    }

    pub fn with_description(mut self, description: Vec<u8>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_hardware_acceleration(mut self, preference: HwPreference) -> Self {
        self.hardware_acceleration = preference;
        self
    }

    pub fn with_output_format(mut self, format: PixelFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.codec.is_empty() {
            return Err(SessionError::Configuration("codec is required".into()));
        }
        if matches!(self.coded_width, Some(0)) || matches!(self.coded_height, Some(0)) {
            return Err(SessionError::Configuration("coded size must be non-zero".into()));
        }
        if self.output_format.is_some_and(PixelFormat::is_hardware) {
            return Err(SessionError::Configuration(
                "output format must be a CPU format".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for [`AudioEncoder`](crate::AudioEncoder).
///
/// # Example
/// ```rust
/// use mediaflow::prelude::*;
///
/// let config = AudioEncoderConfig::new("opus", 48_000, 2);
/// assert_eq!(config.bitrate, 128_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub number_of_channels: u16,
    pub bitrate: u64,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            codec: String::new(),
            sample_rate: 48_000,
            number_of_channels: 2,
            bitrate: DEFAULT_AUDIO_BITRATE,
        }
    }
}

impl AudioEncoderConfig {
    pub fn new(codec: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            codec: codec.into(),
            sample_rate,
            number_of_channels: channels,
            ..Self::default()
        }
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.codec.is_empty() {
            return Err(SessionError::Configuration("codec is required".into()));
        }
        if self.sample_rate == 0 || self.number_of_channels == 0 {
            return Err(SessionError::Configuration(format!(
                "invalid layout {}Hz/{}ch",
                self.sample_rate, self.number_of_channels
            )));
        }
        Ok(())
    }
}

/// Configuration for [`AudioDecoder`](crate::AudioDecoder).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub number_of_channels: u16,
    pub description: Option<Vec<u8>>,
}

impl Default for AudioDecoderConfig {
    fn default() -> Self {
        Self {
            codec: String::new(),
            sample_rate: 48_000,
            number_of_channels: 2,
            description: None,
        }
    }
}

impl AudioDecoderConfig {
    pub fn new(codec: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            codec: codec.into(),
            sample_rate,
            number_of_channels: channels,
            description: None,
        }
    }

    pub fn with_description(mut self, description: Vec<u8>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.codec.is_empty() {
            return Err(SessionError::Configuration("codec is required".into()));
        }
        if self.sample_rate == 0 || self.number_of_channels == 0 {
            return Err(SessionError::Configuration(format!(
                "invalid layout {}Hz/{}ch",
                self.sample_rate, self.number_of_channels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_spellings_parse() {
        assert_eq!("quantizer".parse::<BitrateMode>(), Ok(BitrateMode::Quantizer));
        assert_eq!("realtime".parse::<LatencyMode>(), Ok(LatencyMode::Realtime));
        assert_eq!("keep".parse::<AlphaMode>(), Ok(AlphaMode::Keep));
        assert_eq!("avc".parse::<AvcFormat>(), Ok(AvcFormat::Avc));
        assert!("cbr".parse::<BitrateMode>().is_err());
        assert_eq!(AvcFormat::default().to_string(), "annexb");
    }

    #[test]
    fn profile_comes_from_the_codec_string() {
        assert_eq!(VideoEncoderConfig::new("avc1.64001f", 16, 16).avc_profile(), Some(100));
        assert_eq!(VideoEncoderConfig::new("avc1.42E01E", 16, 16).avc_profile(), Some(66));
        assert_eq!(
            VideoEncoderConfig::new("avc1.42E01E", 16, 16)
                .with_profile(77)
                .avc_profile(),
            Some(77)
        );
        assert_eq!(VideoEncoderConfig::new("vp8", 16, 16).avc_profile(), None);
    }

    #[test]
    fn invalid_fields_are_configuration_errors() {
        let err = VideoEncoderConfig::new("vp8", 0, 16).validate().unwrap_err();
        assert!(err.is_fatal());
        let err = VideoEncoderConfig::new("vp8", 16, 16)
            .with_scalability_mode("L3T3")
            .validate()
            .unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
        assert!(AudioEncoderConfig::new("opus", 0, 2).validate().is_err());
        assert!(
            VideoDecoderConfig::new("vp9")
                .with_output_format(PixelFormat::Vaapi)
                .validate()
                .is_err()
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_reads_camel_case() {
        let config: VideoEncoderConfig = serde_json::from_str(
            r#"{"codec":"vp8","width":64,"height":48,"bitrateMode":"constant","latencyMode":"realtime","hardwareAcceleration":"prefer-software"}"#,
        )
        .unwrap();
        assert_eq!(config.bitrate_mode, BitrateMode::Constant);
        assert_eq!(config.latency_mode, LatencyMode::Realtime);
        assert_eq!(config.hardware_acceleration, HwPreference::PreferSoftware);
        assert_eq!(config.bitrate, DEFAULT_VIDEO_BITRATE);
    }
}
