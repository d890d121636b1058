use std::str::FromStr;

use imaging::transform::DEFAULT_QUALITY;
use imaging::{Flip, ImagingError, Kernel, OutputFormat, Rotation, TransformSpec};
use serde::Deserialize;
use utoipa::IntoParams;

/// Query string of `GET /images/{uid}/file`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FileQuery {
    /// `webp`, `png`, `jpg`, `jpeg`, `avif`, `heif`, or empty to keep the source format.
    pub format: Option<String>,
    /// Maximum width; 0 lets the height govern.
    pub w: Option<i64>,
    /// Maximum height; 0 lets the width govern.
    pub h: Option<i64>,
    /// 0..=100. Remapped to 0..=10 for PNG.
    pub quality: Option<i64>,
    /// 0, 90, 180 or 270.
    pub rotate: Option<String>,
    /// `horizontal`, `vertical` or empty.
    pub flip: Option<String>,
    /// Resampling kernel. Default: `lanczos3`.
    pub kernel: Option<String>,
    /// Any non-empty value other than `0`/`false` serves as an attachment.
    pub download: Option<String>,
    /// Download token authorizing this image.
    pub token: Option<String>,
    /// Password of a protected download token.
    pub password: Option<String>,
}

impl FileQuery {
    pub fn wants_download(&self) -> bool {
        self.download
            .as_deref()
            .is_some_and(|d| !d.is_empty() && d != "0" && !d.eq_ignore_ascii_case("false"))
    }

    /// The requested transform, or `None` when the original should be served.
    pub fn transform(&self) -> Result<Option<TransformSpec>, ImagingError> {
        let width = dimension("w", self.w)?;
        let height = dimension("h", self.h)?;
        let quality = match self.quality {
            None => None,
            Some(q @ 0..=100) => Some(q as u8),
            Some(q) => {
                return Err(ImagingError::InvalidParameter(format!(
                    "quality must be between 0 and 100, got {q}"
                )));
            }
        };
        let format = match self.format.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(f) => Some(OutputFormat::from_str(f)?),
        };
        let rotate = Rotation::from_str(self.rotate.as_deref().unwrap_or("").trim())?;
        let flip = Flip::parse_optional(self.flip.as_deref().unwrap_or("").trim())?;
        let kernel = match self.kernel.as_deref().map(str::trim) {
            None | Some("") => Kernel::default(),
            Some(k) => Kernel::from_str(k)?,
        };

        let requested = format.is_some()
            || width > 0
            || height > 0
            || quality.is_some()
            || rotate != Rotation::None
            || flip.is_some();
        if !requested {
            return Ok(None);
        }

        Ok(Some(TransformSpec {
            width,
            height,
            rotate,
            flip,
            kernel,
            format,
            quality: quality.unwrap_or(DEFAULT_QUALITY),
        }))
    }
}

fn dimension(name: &str, value: Option<i64>) -> Result<u32, ImagingError> {
    match value {
        None => Ok(0),
        Some(v) if v < 0 => Err(ImagingError::InvalidParameter(format!(
            "{name} must not be negative"
        ))),
        Some(v) => u32::try_from(v)
            .map_err(|_| ImagingError::InvalidParameter(format!("{name} is too large"))),
    }
}

/// Named renditions referenced by image URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentTransform {
    Thumbnail,
    Preview,
}

impl PermanentTransform {
    pub const ALL: &'static [PermanentTransform] = &[Self::Thumbnail, Self::Preview];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnail",
            Self::Preview => "preview",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn spec(&self) -> TransformSpec {
        match self {
            Self::Thumbnail => TransformSpec::webp_box(400, 85),
            Self::Preview => TransformSpec::webp_box(1920, 90),
        }
    }
}
