//! Hardware-first codec implementation selection.
//!
//! Each codec family has a static, platform-specific priority list of implementation names. The
//! selector walks the list against a [`CodecLookup`] registry and reports the first entry that is
//! registered, honouring the caller's [`HwPreference`]. Software entries always sit at the end.

use std::{fmt, str::FromStr};

use mediaflow_core::format::PixelFormat;

use crate::toolkit::CodecLookup;

/// Codec family an identifier or implementation name belongs to.
///
/// # Example
/// ```rust
/// use mediaflow_codec::selector::CodecFamily;
///
/// assert_eq!(CodecFamily::from_codec("avc1.42001f"), Some(CodecFamily::H264));
/// assert_eq!(CodecFamily::from_codec("libvpx-vp9"), Some(CodecFamily::Vp9));
/// assert_eq!(CodecFamily::from_codec("flac"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CodecFamily {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
}

impl CodecFamily {
    /// Classify a host codec string (`avc1.*`, `vp09.*`, ...) or a toolkit implementation name.
    pub fn from_codec(codec: &str) -> Option<Self> {
        if codec.starts_with("avc1") || codec.starts_with("avc3") {
            return Some(CodecFamily::H264);
        }
        if codec.starts_with("hvc1") || codec.starts_with("hev1") {
            return Some(CodecFamily::Hevc);
        }
        if codec == "vp8" {
            return Some(CodecFamily::Vp8);
        }
        if codec.starts_with("vp09") || codec == "vp9" {
            return Some(CodecFamily::Vp9);
        }
        if codec.starts_with("av01") {
            return Some(CodecFamily::Av1);
        }

        if codec == "libx264" || codec == "h264" || codec.starts_with("h264_") {
            Some(CodecFamily::H264)
        } else if codec == "libx265" || codec == "hevc" || codec.starts_with("hevc_") {
            Some(CodecFamily::Hevc)
        } else if codec == "libvpx" || codec.contains("vp8") {
            Some(CodecFamily::Vp8)
        } else if codec == "libvpx-vp9" || codec.contains("vp9") {
            Some(CodecFamily::Vp9)
        } else if codec == "libaom-av1" || codec == "libsvtav1" || codec.contains("av1") {
            Some(CodecFamily::Av1)
        } else {
            None
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CodecFamily::H264 => "h264",
            CodecFamily::Hevc => "hevc",
            CodecFamily::Vp8 => "vp8",
            CodecFamily::Vp9 => "vp9",
            CodecFamily::Av1 => "av1",
        }
    }

    /// Priority-ordered encoder candidates for the current platform.
    pub fn encoders(self) -> &'static [Candidate] {
        match self {
            CodecFamily::H264 => tables::H264_ENCODERS,
            CodecFamily::Hevc => tables::HEVC_ENCODERS,
            CodecFamily::Vp8 => tables::VP8_ENCODERS,
            CodecFamily::Vp9 => tables::VP9_ENCODERS,
            CodecFamily::Av1 => tables::AV1_ENCODERS,
        }
    }

    /// Priority-ordered decoder candidates for the current platform.
    pub fn decoders(self) -> &'static [Candidate] {
        match self {
            CodecFamily::H264 => tables::H264_DECODERS,
            CodecFamily::Hevc => tables::HEVC_DECODERS,
            CodecFamily::Vp8 => tables::VP8_DECODERS,
            CodecFamily::Vp9 => tables::VP9_DECODERS,
            CodecFamily::Av1 => tables::AV1_DECODERS,
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's hardware acceleration preference.
///
/// # Example
/// ```rust
/// use mediaflow_codec::selector::HwPreference;
///
/// assert_eq!(HwPreference::parse("prefer-software"), HwPreference::PreferSoftware);
/// assert_eq!(HwPreference::parse("whatever"), HwPreference::NoPreference);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum HwPreference {
    #[default]
    NoPreference,
    PreferHardware,
    PreferSoftware,
}

impl HwPreference {
    /// Parse the host spelling; unrecognised strings mean no preference.
    pub fn parse(value: &str) -> Self {
        match value {
            "prefer-hardware" => HwPreference::PreferHardware,
            "prefer-software" => HwPreference::PreferSoftware,
            _ => HwPreference::NoPreference,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            HwPreference::NoPreference => "no-preference",
            HwPreference::PreferHardware => "prefer-hardware",
            HwPreference::PreferSoftware => "prefer-software",
        }
    }
}

impl FromStr for HwPreference {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Acceleration technology behind an implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HwAccel {
    #[default]
    None,
    VideoToolbox,
    Nvenc,
    Cuvid,
    Qsv,
    Vaapi,
    Amf,
    MediaFoundation,
    V4l2m2m,
}

impl HwAccel {
    pub const fn is_hardware(self) -> bool {
        !matches!(self, HwAccel::None)
    }

    /// Human-readable name used in logs and `implementation()` reports.
    pub const fn display_name(self) -> &'static str {
        match self {
            HwAccel::None => "Software",
            HwAccel::VideoToolbox => "VideoToolbox",
            HwAccel::Nvenc => "NVENC",
            HwAccel::Cuvid => "CUVID",
            HwAccel::Qsv => "QuickSync",
            HwAccel::Vaapi => "VA-API",
            HwAccel::Amf => "AMF",
            HwAccel::MediaFoundation => "MediaFoundation",
            HwAccel::V4l2m2m => "V4L2M2M",
        }
    }

    /// Device context type the accelerator needs, if any.
    pub const fn device_type(self) -> Option<HwDeviceType> {
        match self {
            HwAccel::VideoToolbox => Some(HwDeviceType::VideoToolbox),
            HwAccel::Nvenc | HwAccel::Cuvid => Some(HwDeviceType::Cuda),
            HwAccel::Qsv => Some(HwDeviceType::Qsv),
            HwAccel::Vaapi => Some(HwDeviceType::Vaapi),
            HwAccel::Amf => Some(HwDeviceType::D3d11va),
            HwAccel::None | HwAccel::MediaFoundation | HwAccel::V4l2m2m => None,
        }
    }
}

impl fmt::Display for HwAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Hardware device context kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HwDeviceType {
    Cuda,
    Qsv,
    Vaapi,
    VideoToolbox,
    D3d11va,
}

/// One row of a priority table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub name: &'static str,
    pub accel: HwAccel,
    /// Pixel format the implementation consumes (encoders) or produces (decoders).
    pub format: PixelFormat,
}

const fn hw(name: &'static str, accel: HwAccel, format: PixelFormat) -> Candidate {
    Candidate {
        name,
        accel,
        format,
    }
}

const fn sw(name: &'static str) -> Candidate {
    Candidate {
        name,
        accel: HwAccel::None,
        format: PixelFormat::I420,
    }
}

#[rustfmt::skip]
mod tables {
    #[allow(unused_imports)]
    use super::{Candidate, HwAccel::*, hw, sw};
    #[allow(unused_imports)]
    use mediaflow_core::format::PixelFormat::{Nv12, Vaapi as VaSurface, I420};

    #[cfg(target_os = "linux")]
    pub const H264_ENCODERS: &[Candidate] = &[
        hw("h264_nvenc", Nvenc, Nv12),
        hw("h264_vaapi", Vaapi, VaSurface),
        hw("h264_qsv", Qsv, Nv12),
        hw("h264_v4l2m2m", V4l2m2m, I420),
        sw("libx264"),
    ];
    #[cfg(target_os = "macos")]
    pub const H264_ENCODERS: &[Candidate] = &[
        hw("h264_videotoolbox", VideoToolbox, Nv12),
        sw("libx264"),
    ];
    #[cfg(target_os = "windows")]
    pub const H264_ENCODERS: &[Candidate] = &[
        hw("h264_mf", MediaFoundation, Nv12),
        hw("h264_amf", Amf, Nv12),
        hw("h264_nvenc", Nvenc, Nv12),
        hw("h264_qsv", Qsv, Nv12),
        sw("libx264"),
    ];
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    pub const H264_ENCODERS: &[Candidate] = &[sw("libx264")];

    #[cfg(target_os = "linux")]
    pub const HEVC_ENCODERS: &[Candidate] = &[
        hw("hevc_nvenc", Nvenc, Nv12),
        hw("hevc_vaapi", Vaapi, VaSurface),
        hw("hevc_qsv", Qsv, Nv12),
        sw("libx265"),
    ];
    #[cfg(target_os = "macos")]
    pub const HEVC_ENCODERS: &[Candidate] = &[
        hw("hevc_videotoolbox", VideoToolbox, Nv12),
        sw("libx265"),
    ];
    #[cfg(target_os = "windows")]
    pub const HEVC_ENCODERS: &[Candidate] = &[
        hw("hevc_mf", MediaFoundation, Nv12),
        hw("hevc_amf", Amf, Nv12),
        hw("hevc_nvenc", Nvenc, Nv12),
        hw("hevc_qsv", Qsv, Nv12),
        sw("libx265"),
    ];
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    pub const HEVC_ENCODERS: &[Candidate] = &[sw("libx265")];

    pub const VP8_ENCODERS: &[Candidate] = &[sw("libvpx")];

    #[cfg(target_os = "linux")]
    pub const VP9_ENCODERS: &[Candidate] = &[
        hw("vp9_vaapi", Vaapi, VaSurface),
        hw("vp9_qsv", Qsv, Nv12),
        sw("libvpx-vp9"),
    ];
    #[cfg(not(target_os = "linux"))]
    pub const VP9_ENCODERS: &[Candidate] = &[sw("libvpx-vp9")];

    #[cfg(target_os = "linux")]
    pub const AV1_ENCODERS: &[Candidate] = &[
        hw("av1_nvenc", Nvenc, Nv12),
        hw("av1_vaapi", Vaapi, VaSurface),
        hw("av1_qsv", Qsv, Nv12),
        sw("libsvtav1"),
        sw("libaom-av1"),
    ];
    #[cfg(target_os = "windows")]
    pub const AV1_ENCODERS: &[Candidate] = &[
        hw("av1_nvenc", Nvenc, Nv12),
        hw("av1_amf", Amf, Nv12),
        hw("av1_qsv", Qsv, Nv12),
        sw("libsvtav1"),
        sw("libaom-av1"),
    ];
    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    pub const AV1_ENCODERS: &[Candidate] = &[sw("libsvtav1"), sw("libaom-av1")];

    #[cfg(target_os = "linux")]
    pub const H264_DECODERS: &[Candidate] = &[
        hw("h264_cuvid", Cuvid, Nv12),
        hw("h264_vaapi", Vaapi, VaSurface),
        hw("h264_qsv", Qsv, Nv12),
        sw("h264"),
    ];
    #[cfg(target_os = "macos")]
    pub const H264_DECODERS: &[Candidate] = &[
        hw("h264_videotoolbox", VideoToolbox, Nv12),
        sw("h264"),
    ];
    #[cfg(target_os = "windows")]
    pub const H264_DECODERS: &[Candidate] = &[
        hw("h264_cuvid", Cuvid, Nv12),
        hw("h264_qsv", Qsv, Nv12),
        sw("h264"),
    ];
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    pub const H264_DECODERS: &[Candidate] = &[sw("h264")];

    #[cfg(target_os = "linux")]
    pub const HEVC_DECODERS: &[Candidate] = &[
        hw("hevc_cuvid", Cuvid, Nv12),
        hw("hevc_vaapi", Vaapi, VaSurface),
        hw("hevc_qsv", Qsv, Nv12),
        sw("hevc"),
    ];
    #[cfg(target_os = "macos")]
    pub const HEVC_DECODERS: &[Candidate] = &[
        hw("hevc_videotoolbox", VideoToolbox, Nv12),
        sw("hevc"),
    ];
    #[cfg(target_os = "windows")]
    pub const HEVC_DECODERS: &[Candidate] = &[
        hw("hevc_cuvid", Cuvid, Nv12),
        hw("hevc_qsv", Qsv, Nv12),
        sw("hevc"),
    ];
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    pub const HEVC_DECODERS: &[Candidate] = &[sw("hevc")];

    pub const VP8_DECODERS: &[Candidate] = &[sw("vp8")];

    #[cfg(target_os = "linux")]
    pub const VP9_DECODERS: &[Candidate] = &[
        hw("vp9_cuvid", Cuvid, Nv12),
        hw("vp9_vaapi", Vaapi, VaSurface),
        hw("vp9_qsv", Qsv, Nv12),
        sw("vp9"),
    ];
    #[cfg(not(target_os = "linux"))]
    pub const VP9_DECODERS: &[Candidate] = &[sw("vp9")];

    #[cfg(target_os = "linux")]
    pub const AV1_DECODERS: &[Candidate] = &[
        hw("av1_cuvid", Cuvid, Nv12),
        hw("av1_vaapi", Vaapi, VaSurface),
        hw("av1_qsv", Qsv, Nv12),
        sw("libdav1d"),
        sw("libaom-av1"),
    ];
    #[cfg(target_os = "windows")]
    pub const AV1_DECODERS: &[Candidate] = &[
        hw("av1_cuvid", Cuvid, Nv12),
        hw("av1_qsv", Qsv, Nv12),
        sw("libdav1d"),
        sw("libaom-av1"),
    ];
    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    pub const AV1_DECODERS: &[Candidate] = &[sw("libdav1d"), sw("libaom-av1")];
}

/// Outcome of encoder selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderChoice {
    pub name: String,
    pub accel: HwAccel,
    /// Pixel format the codec consumes.
    pub input_format: PixelFormat,
    /// A device-resident frame pool must be created before opening (VA-API).
    pub requires_hw_frames: bool,
}

/// Outcome of decoder selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderChoice {
    pub name: String,
    pub accel: HwAccel,
    /// Decoding runs on a hardware device context.
    pub uses_hw_frames: bool,
}

fn pick<'a>(
    list: &'a [Candidate],
    preference: HwPreference,
    registered: impl Fn(&str) -> bool,
) -> Option<&'a Candidate> {
    if preference == HwPreference::PreferSoftware {
        return list
            .iter()
            .rev()
            .find(|c| !c.accel.is_hardware() && registered(c.name));
    }
    list.iter().find(|c| registered(c.name))
}

/// Choose an encoder for `codec` under `preference`.
///
/// Unknown families fall back to `codec` itself when the registry knows that name.
///
/// # Example
/// ```rust
/// use mediaflow_codec::selector::{HwAccel, HwPreference, select_encoder};
/// use mediaflow_codec::toolkit::CodecLookup;
///
/// struct OnlyX264;
/// impl CodecLookup for OnlyX264 {
///     fn has_encoder(&self, name: &str) -> bool { name == "libx264" }
///     fn has_decoder(&self, _: &str) -> bool { false }
/// }
///
/// let choice = select_encoder(&OnlyX264, "avc1.42001f", HwPreference::NoPreference).unwrap();
/// assert_eq!(choice.name, "libx264");
/// assert_eq!(choice.accel, HwAccel::None);
/// ```
pub fn select_encoder<L: CodecLookup + ?Sized>(
    lookup: &L,
    codec: &str,
    preference: HwPreference,
) -> Option<EncoderChoice> {
    let Some(family) = CodecFamily::from_codec(codec) else {
        return lookup.has_encoder(codec).then(|| EncoderChoice {
            name: codec.to_string(),
            accel: HwAccel::None,
            input_format: PixelFormat::I420,
            requires_hw_frames: false,
        });
    };
    pick(family.encoders(), preference, |n| lookup.has_encoder(n)).map(|c| EncoderChoice {
        name: c.name.to_string(),
        accel: c.accel,
        input_format: c.format,
        requires_hw_frames: c.accel == HwAccel::Vaapi,
    })
}

/// Choose a decoder for `codec` under `preference`.
pub fn select_decoder<L: CodecLookup + ?Sized>(
    lookup: &L,
    codec: &str,
    preference: HwPreference,
) -> Option<DecoderChoice> {
    let Some(family) = CodecFamily::from_codec(codec) else {
        return lookup.has_decoder(codec).then(|| DecoderChoice {
            name: codec.to_string(),
            accel: HwAccel::None,
            uses_hw_frames: false,
        });
    };
    pick(family.decoders(), preference, |n| lookup.has_decoder(n)).map(|c| DecoderChoice {
        name: c.name.to_string(),
        accel: c.accel,
        uses_hw_frames: c.accel.is_hardware(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Registry {
        encoders: HashSet<&'static str>,
        decoders: HashSet<&'static str>,
    }

    impl Registry {
        fn new(encoders: &[&'static str], decoders: &[&'static str]) -> Self {
            Self {
                encoders: encoders.iter().copied().collect(),
                decoders: decoders.iter().copied().collect(),
            }
        }
    }

    impl CodecLookup for Registry {
        fn has_encoder(&self, name: &str) -> bool {
            self.encoders.contains(name)
        }

        fn has_decoder(&self, name: &str) -> bool {
            self.decoders.contains(name)
        }
    }

    #[test]
    fn family_normalisation() {
        assert_eq!(CodecFamily::from_codec("avc3.640028"), Some(CodecFamily::H264));
        assert_eq!(CodecFamily::from_codec("hev1.1.6.L93"), Some(CodecFamily::Hevc));
        assert_eq!(CodecFamily::from_codec("hevc_qsv"), Some(CodecFamily::Hevc));
        assert_eq!(CodecFamily::from_codec("libvpx"), Some(CodecFamily::Vp8));
        assert_eq!(CodecFamily::from_codec("vp09.00.10.08"), Some(CodecFamily::Vp9));
        assert_eq!(CodecFamily::from_codec("av01.0.04M.08"), Some(CodecFamily::Av1));
        assert_eq!(CodecFamily::from_codec("libsvtav1"), Some(CodecFamily::Av1));
        assert_eq!(CodecFamily::from_codec("opus"), None);
    }

    #[test]
    fn prefer_software_walks_from_the_end() {
        let reg = Registry::new(&["libsvtav1", "libaom-av1"], &[]);
        let choice = select_encoder(&reg, "av01.0.04M.08", HwPreference::PreferSoftware).unwrap();
        assert_eq!(choice.name, "libaom-av1");
        let choice = select_encoder(&reg, "av01.0.04M.08", HwPreference::NoPreference).unwrap();
        assert_eq!(choice.name, "libsvtav1");
    }

    #[test]
    fn software_is_last_resort() {
        let reg = Registry::new(&["libx264"], &["h264"]);
        let enc = select_encoder(&reg, "avc1.42001f", HwPreference::PreferHardware).unwrap();
        assert_eq!(enc.name, "libx264");
        assert!(!enc.requires_hw_frames);
        let dec = select_decoder(&reg, "libx264", HwPreference::NoPreference).unwrap();
        assert_eq!(dec.name, "h264");
        assert!(!dec.uses_hw_frames);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn vaapi_encoders_need_frame_pools() {
        let reg = Registry::new(&["h264_vaapi", "h264_qsv", "libx264"], &["h264_qsv", "h264"]);
        let enc = select_encoder(&reg, "avc1.42001f", HwPreference::NoPreference).unwrap();
        assert_eq!(enc.name, "h264_vaapi");
        assert_eq!(enc.accel, HwAccel::Vaapi);
        assert_eq!(enc.input_format, PixelFormat::Vaapi);
        assert!(enc.requires_hw_frames);
        assert_eq!(enc.accel.device_type(), Some(HwDeviceType::Vaapi));

        let dec = select_decoder(&reg, "avc1.42001f", HwPreference::NoPreference).unwrap();
        assert_eq!(dec.name, "h264_qsv");
        assert!(dec.uses_hw_frames);

        let soft = select_encoder(&reg, "avc1.42001f", HwPreference::PreferSoftware).unwrap();
        assert_eq!(soft.name, "libx264");
    }

    #[test]
    fn unknown_family_uses_exact_name() {
        let reg = Registry::new(&["mjpeg"], &["mjpeg"]);
        let enc = select_encoder(&reg, "mjpeg", HwPreference::PreferHardware).unwrap();
        assert_eq!(enc.name, "mjpeg");
        assert_eq!(enc.accel, HwAccel::None);
        assert!(select_decoder(&reg, "theora", HwPreference::NoPreference).is_none());
    }

    #[test]
    fn nothing_registered_yields_none() {
        let reg = Registry::new(&[], &[]);
        assert!(select_encoder(&reg, "vp8", HwPreference::NoPreference).is_none());
        assert!(select_encoder(&reg, "vp8", HwPreference::PreferSoftware).is_none());
    }

    #[test]
    fn display_names() {
        assert_eq!(HwAccel::Vaapi.display_name(), "VA-API");
        assert_eq!(HwAccel::Qsv.to_string(), "QuickSync");
        assert_eq!(HwAccel::None.display_name(), "Software");
        assert_eq!(HwAccel::Amf.device_type(), Some(HwDeviceType::D3d11va));
        assert_eq!(HwAccel::V4l2m2m.device_type(), None);
    }
}
