use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageFormat, Limits};
use tracing::debug;

use crate::color::normalize_to_srgb;
use crate::decode::{SourceFormat, decode};
use crate::encode::{Encoded, OutputFormat, encode};
use crate::error::ImagingError;
use crate::resample;

pub const DEFAULT_QUALITY: u8 = 85;

/// Resampling kernel names accepted on the wire.
///
/// Kernels the image crate ships run through `imageops`; the rest use the
/// convolution resampler in `resample`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Kernel {
    Nearest,
    Linear,
    Cubic,
    Mitchell,
    Lanczos2,
    #[default]
    Lanczos3,
    Mks2013,
    Mks2021,
}

impl Kernel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Linear => "linear",
            Self::Cubic => "cubic",
            Self::Mitchell => "mitchell",
            Self::Lanczos2 => "lanczos2",
            Self::Lanczos3 => "lanczos3",
            Self::Mks2013 => "mks2013",
            Self::Mks2021 => "mks2021",
        }
    }

    fn resampler(&self) -> Resampler {
        match self {
            Self::Nearest => Resampler::Builtin(FilterType::Nearest),
            Self::Linear => Resampler::Builtin(FilterType::Triangle),
            Self::Cubic => Resampler::Builtin(FilterType::CatmullRom),
            Self::Lanczos3 => Resampler::Builtin(FilterType::Lanczos3),
            Self::Mitchell => Resampler::Convolution(resample::Filter {
                weight: resample::mitchell,
                radius: 2.0,
            }),
            Self::Lanczos2 => Resampler::Convolution(resample::Filter {
                weight: resample::lanczos2,
                radius: 2.0,
            }),
            Self::Mks2013 => Resampler::Convolution(resample::Filter {
                weight: resample::mks2013,
                radius: 2.5,
            }),
            Self::Mks2021 => Resampler::Convolution(resample::Filter {
                weight: resample::mks2021,
                radius: 4.5,
            }),
        }
    }
}

enum Resampler {
    Builtin(FilterType),
    Convolution(resample::Filter),
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kernel {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "nearest" => Self::Nearest,
            "linear" => Self::Linear,
            "cubic" => Self::Cubic,
            "mitchell" => Self::Mitchell,
            "lanczos2" => Self::Lanczos2,
            "lanczos3" => Self::Lanczos3,
            "mks2013" => Self::Mks2013,
            "mks2021" => Self::Mks2021,
            other => {
                return Err(ImagingError::InvalidParameter(format!(
                    "unknown kernel '{other}'"
                )));
            }
        })
    }
}

/// Clockwise rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }
}

impl FromStr for Rotation {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "0" => Ok(Self::None),
            "90" => Ok(Self::Cw90),
            "180" => Ok(Self::Cw180),
            "270" => Ok(Self::Cw270),
            other => Err(ImagingError::InvalidParameter(format!(
                "rotate must be 0, 90, 180 or 270, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flip {
    Horizontal,
    Vertical,
}

impl Flip {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
        }
    }

    /// `""` parses to `None`.
    pub fn parse_optional(s: &str) -> Result<Option<Self>, ImagingError> {
        match s {
            "" => Ok(None),
            "horizontal" => Ok(Some(Self::Horizontal)),
            "vertical" => Ok(Some(Self::Vertical)),
            other => Err(ImagingError::InvalidParameter(format!(
                "flip must be horizontal or vertical, got '{other}'"
            ))),
        }
    }
}

/// A fully parsed transform request.
///
/// `format: None` re-encodes in the source container (JPEG for sources we
/// cannot write). A zero width or height lets the other dimension govern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformSpec {
    pub width: u32,
    pub height: u32,
    pub rotate: Rotation,
    pub flip: Option<Flip>,
    pub kernel: Kernel,
    pub format: Option<OutputFormat>,
    pub quality: u8,
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            rotate: Rotation::None,
            flip: None,
            kernel: Kernel::default(),
            format: None,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl TransformSpec {
    /// Named webp transform in a square box.
    pub fn webp_box(size: u32, quality: u8) -> Self {
        Self {
            width: size,
            height: size,
            format: Some(OutputFormat::Webp),
            quality,
            ..Self::default()
        }
    }
}

/// Apply the EXIF orientation. Never fails; unknown orientations are ignored.
pub fn autorotate(image: &mut DynamicImage, orientation: Orientation) {
    if orientation != Orientation::NoTransforms {
        image.apply_orientation(orientation);
    }
}

/// Target size that fits `(src_w, src_h)` inside `(max_w, max_h)`.
///
/// Returns `None` when both bounds are zero (no resize requested).
pub fn fit_dimensions(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> Option<(u32, u32)> {
    if src_w == 0 || src_h == 0 {
        return None;
    }
    let (sw, sh) = (src_w as f64, src_h as f64);
    let scale = match (max_w, max_h) {
        (0, 0) => return None,
        (w, 0) => w as f64 / sw,
        (0, h) => h as f64 / sh,
        (w, h) => (w as f64 / sw).min(h as f64 / sh),
    };
    let w = ((sw * scale).round() as u32).max(1);
    let h = ((sh * scale).round() as u32).max(1);
    Some((w, h))
}

/// Scale to fit within `width`×`height` without cropping.
pub fn scale_proportionally(
    image: &DynamicImage,
    width: u32,
    height: u32,
    kernel: Kernel,
) -> DynamicImage {
    match fit_dimensions(image.width(), image.height(), width, height) {
        Some((w, h)) if (w, h) != (image.width(), image.height()) => match kernel.resampler() {
            Resampler::Builtin(filter) => image.resize_exact(w, h, filter),
            Resampler::Convolution(filter) => resample::resize(image, w, h, filter),
        },
        _ => image.clone(),
    }
}

/// Output container when the request asked for the source format.
pub fn passthrough_format(source: SourceFormat) -> OutputFormat {
    match source {
        SourceFormat::Image(ImageFormat::Png) => OutputFormat::Png,
        SourceFormat::Image(ImageFormat::WebP) => OutputFormat::Webp,
        SourceFormat::Image(ImageFormat::Avif) => OutputFormat::Avif,
        _ => OutputFormat::Jpeg,
    }
}

/// Decode, autorotate, normalize to sRGB, rotate, flip, resize, encode.
pub fn apply_transform(
    bytes: &[u8],
    spec: &TransformSpec,
    limits: &Limits,
    file_type: Option<&str>,
) -> Result<Encoded, ImagingError> {
    let decoded = decode(bytes, limits, file_type)?;
    let mut image = normalize_to_srgb(&decoded);
    autorotate(&mut image, decoded.orientation);

    image = match spec.rotate {
        Rotation::None => image,
        Rotation::Cw90 => image.rotate90(),
        Rotation::Cw180 => image.rotate180(),
        Rotation::Cw270 => image.rotate270(),
    };
    image = match spec.flip {
        None => image,
        Some(Flip::Horizontal) => image.fliph(),
        Some(Flip::Vertical) => image.flipv(),
    };
    if spec.width > 0 || spec.height > 0 {
        image = scale_proportionally(&image, spec.width, spec.height, spec.kernel);
    }

    let format = spec
        .format
        .unwrap_or_else(|| passthrough_format(decoded.format));
    debug!(
        target: "imaging",
        source = decoded.format.name(),
        output = %format,
        width = image.width(),
        height = image.height(),
        "Transform applied"
    );
    encode(&image, format, spec.quality)
}
