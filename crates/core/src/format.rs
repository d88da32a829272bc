use std::{fmt, num::NonZeroU32, str::FromStr};

use smallvec::{SmallVec, smallvec};

/// Errors raised while parsing or validating format descriptors.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::{FormatError, PixelFormat};
///
/// let err = "YUY2".parse::<PixelFormat>().unwrap_err();
/// assert!(matches!(err, FormatError::UnknownPixelFormat(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unknown pixel format: {0}")]
    UnknownPixelFormat(String),
    #[error("unknown sample format: {0}")]
    UnknownSampleFormat(String),
    #[error("unknown color value: {0}")]
    UnknownColor(String),
    /// Plane data does not fit the declared geometry.
    #[error("invalid geometry: {0}")]
    Geometry(String),
}

/// Raw pixel layouts understood by the sessions.
///
/// Names follow the host-facing spellings (`I420`, `NV12`, `RGBA`, ...). `Vaapi` is an opaque
/// device-resident surface and never carries CPU planes.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::PixelFormat;
///
/// let fmt: PixelFormat = "I420A".parse().unwrap();
/// assert!(fmt.has_alpha());
/// assert_eq!(fmt.plane_count(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelFormat {
    /// Planar 4:2:0, three planes.
    #[cfg_attr(feature = "serde", serde(rename = "I420"))]
    I420,
    /// Planar 4:2:0 with a full-resolution alpha plane.
    #[cfg_attr(feature = "serde", serde(rename = "I420A"))]
    I420A,
    /// Planar 4:2:2.
    #[cfg_attr(feature = "serde", serde(rename = "I422"))]
    I422,
    /// Planar 4:4:4.
    #[cfg_attr(feature = "serde", serde(rename = "I444"))]
    I444,
    /// Semi-planar 4:2:0 (Y plane + interleaved UV).
    #[cfg_attr(feature = "serde", serde(rename = "NV12"))]
    Nv12,
    #[cfg_attr(feature = "serde", serde(rename = "RGBA"))]
    Rgba,
    #[cfg_attr(feature = "serde", serde(rename = "RGBX"))]
    Rgbx,
    #[cfg_attr(feature = "serde", serde(rename = "BGRA"))]
    Bgra,
    #[cfg_attr(feature = "serde", serde(rename = "BGRX"))]
    Bgrx,
    /// VA-API hardware surface.
    #[cfg_attr(feature = "serde", serde(rename = "VAAPI"))]
    Vaapi,
}

/// Bytes per row and number of rows for one plane of a tightly packed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub row_bytes: usize,
    pub rows: usize,
}

impl PixelFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            PixelFormat::I420 => "I420",
            PixelFormat::I420A => "I420A",
            PixelFormat::I422 => "I422",
            PixelFormat::I444 => "I444",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Rgbx => "RGBX",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Bgrx => "BGRX",
            PixelFormat::Vaapi => "VAAPI",
        }
    }

    /// Whether frames of this format live in device memory.
    pub const fn is_hardware(self) -> bool {
        matches!(self, PixelFormat::Vaapi)
    }

    /// Whether the layout carries an alpha channel.
    pub const fn has_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::I420A | PixelFormat::Rgba | PixelFormat::Bgra
        )
    }

    /// Whether the layout is a single packed RGB(A) plane.
    pub const fn is_packed_rgb(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba | PixelFormat::Rgbx | PixelFormat::Bgra | PixelFormat::Bgrx
        )
    }

    pub const fn plane_count(self) -> usize {
        match self {
            PixelFormat::I420 | PixelFormat::I422 | PixelFormat::I444 => 3,
            PixelFormat::I420A => 4,
            PixelFormat::Nv12 => 2,
            PixelFormat::Rgba | PixelFormat::Rgbx | PixelFormat::Bgra | PixelFormat::Bgrx => 1,
            PixelFormat::Vaapi => 0,
        }
    }

    /// Per-plane geometry for a tightly packed frame of the given size.
    ///
    /// # Example
    /// ```rust
    /// use mediaflow_core::prelude::PixelFormat;
    ///
    /// let planes = PixelFormat::I420.plane_geometry(5, 3);
    /// assert_eq!(planes[0].row_bytes, 5);
    /// assert_eq!(planes[1].row_bytes, 3);
    /// assert_eq!(planes[1].rows, 2);
    /// ```
    pub fn plane_geometry(self, width: u32, height: u32) -> SmallVec<[PlaneGeometry; 4]> {
        let w = width as usize;
        let h = height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        let plane = |row_bytes, rows| PlaneGeometry { row_bytes, rows };
        match self {
            PixelFormat::I420 => smallvec![plane(w, h), plane(cw, ch), plane(cw, ch)],
            PixelFormat::I420A => smallvec![
                plane(w, h),
                plane(cw, ch),
                plane(cw, ch),
                plane(w, h)
            ],
            PixelFormat::I422 => smallvec![plane(w, h), plane(cw, h), plane(cw, h)],
            PixelFormat::I444 => smallvec![plane(w, h), plane(w, h), plane(w, h)],
            PixelFormat::Nv12 => smallvec![plane(w, h), plane(cw * 2, ch)],
            PixelFormat::Rgba | PixelFormat::Rgbx | PixelFormat::Bgra | PixelFormat::Bgrx => {
                smallvec![plane(w * 4, h)]
            }
            PixelFormat::Vaapi => SmallVec::new(),
        }
    }

    /// Total bytes of a tightly packed frame.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        self.plane_geometry(width, height)
            .iter()
            .map(|p| p.row_bytes * p.rows)
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "I420" => PixelFormat::I420,
            "I420A" => PixelFormat::I420A,
            "I422" => PixelFormat::I422,
            "I444" => PixelFormat::I444,
            "NV12" => PixelFormat::Nv12,
            "RGBA" => PixelFormat::Rgba,
            "RGBX" => PixelFormat::Rgbx,
            "BGRA" => PixelFormat::Bgra,
            "BGRX" => PixelFormat::Bgrx,
            "VAAPI" => PixelFormat::Vaapi,
            other => return Err(FormatError::UnknownPixelFormat(other.to_string())),
        })
    }
}

/// Resolution of a frame.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::Resolution;
///
/// let res = Resolution::new(640, 480).unwrap();
/// assert_eq!(res.width.get(), 640);
/// assert!(Resolution::new(0, 480).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width.get()
    }

    pub fn height(&self) -> u32 {
        self.height.get()
    }
}

macro_rules! color_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = FormatError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(FormatError::UnknownColor(other.to_string())),
                }
            }
        }
    };
}

color_enum! {
    /// Colour primaries.
    ColorPrimaries {
        Bt709 => "bt709",
        Bt470bg => "bt470bg",
        Smpte170m => "smpte170m",
        Bt2020 => "bt2020",
        Smpte432 => "smpte432",
    }
}

color_enum! {
    /// Transfer characteristics.
    TransferCharacteristics {
        Bt709 => "bt709",
        Smpte170m => "smpte170m",
        Iec61966_2_1 => "iec61966-2-1",
        Linear => "linear",
        Pq => "pq",
        Hlg => "hlg",
    }
}

color_enum! {
    /// Matrix coefficients used to derive YUV from RGB.
    MatrixCoefficients {
        Rgb => "rgb",
        Bt709 => "bt709",
        Bt470bg => "bt470bg",
        Smpte170m => "smpte170m",
        Bt2020Ncl => "bt2020-ncl",
    }
}

/// Colour description attached to video frames and encoder configs.
///
/// Every field is optional; unset fields are left to the codec's defaults.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::{ColorPrimaries, VideoColorSpace};
///
/// let cs = VideoColorSpace {
///     primaries: Some(ColorPrimaries::Bt709),
///     full_range: Some(false),
///     ..VideoColorSpace::default()
/// };
/// assert!(!cs.is_unspecified());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct VideoColorSpace {
    pub primaries: Option<ColorPrimaries>,
    pub transfer: Option<TransferCharacteristics>,
    pub matrix: Option<MatrixCoefficients>,
    pub full_range: Option<bool>,
}

impl VideoColorSpace {
    pub fn is_unspecified(&self) -> bool {
        *self == Self::default()
    }
}

/// Media format including pixel layout and geometry.
///
/// # Example
/// ```rust
/// use mediaflow_core::prelude::{MediaFormat, PixelFormat, Resolution, VideoColorSpace};
///
/// let res = Resolution::new(1920, 1080).unwrap();
/// let fmt = MediaFormat::new(PixelFormat::Nv12, res, VideoColorSpace::default());
/// assert_eq!(fmt.pixel.to_string(), "NV12");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaFormat {
    pub pixel: PixelFormat,
    pub resolution: Resolution,
    pub color: VideoColorSpace,
}

impl MediaFormat {
    pub fn new(pixel: PixelFormat, resolution: Resolution, color: VideoColorSpace) -> Self {
        Self {
            pixel,
            resolution,
            color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_chroma_rounds_up_for_odd_sizes() {
        let planes = PixelFormat::Nv12.plane_geometry(3, 3);
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[1].row_bytes, 4);
        assert_eq!(planes[1].rows, 2);
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), 9 + 8);
    }

    #[test]
    fn hardware_surfaces_have_no_planes() {
        assert!(PixelFormat::Vaapi.is_hardware());
        assert!(PixelFormat::Vaapi.plane_geometry(64, 64).is_empty());
        assert_eq!(PixelFormat::Vaapi.frame_size(64, 64), 0);
    }

    #[test]
    fn color_names_parse() {
        assert_eq!(
            "iec61966-2-1".parse::<TransferCharacteristics>().unwrap(),
            TransferCharacteristics::Iec61966_2_1
        );
        assert_eq!(
            "bt2020-ncl".parse::<MatrixCoefficients>().unwrap(),
            MatrixCoefficients::Bt2020Ncl
        );
        assert!("bt601".parse::<ColorPrimaries>().is_err());
    }

    #[test]
    fn pixel_format_names_round_trip_through_display() {
        for fmt in [
            PixelFormat::I420,
            PixelFormat::I420A,
            PixelFormat::Nv12,
            PixelFormat::Bgrx,
        ] {
            assert_eq!(fmt.to_string().parse::<PixelFormat>().unwrap(), fmt);
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn color_space_uses_camel_case_json() {
        let cs = VideoColorSpace {
            primaries: Some(ColorPrimaries::Bt709),
            full_range: Some(false),
            ..Default::default()
        };
        let json = serde_json::to_value(cs).unwrap();
        assert_eq!(json["fullRange"], serde_json::json!(false));
        let back: VideoColorSpace = serde_json::from_value(json).unwrap();
        assert_eq!(back, cs);
    }
}
