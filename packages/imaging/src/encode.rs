use std::fmt;
use std::str::FromStr;

use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

use crate::error::ImagingError;

/// Output container for web delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Webp,
    Png,
    Jpeg,
    /// Also used for `heif` requests; HEIC output is not available.
    Avif,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Avif => "avif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Avif => "image/avif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::Webp),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "avif" | "heif" | "heic" => Ok(Self::Avif),
            other => Err(ImagingError::InvalidParameter(format!(
                "unsupported format '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl Encoded {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

/// Map a 0..100 quality onto PNG's 0..10 compression scale.
pub fn png_compression(quality: u8) -> u8 {
    quality.min(100) / 10
}

fn png_compression_type(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=7 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Quality at which WebP switches to lossless.
pub const WEBP_LOSSLESS_QUALITY: u8 = 100;

/// Encode an sRGB image.
///
/// `quality` is 1..100 for JPEG, AVIF and WebP (100 writes lossless WebP),
/// and remapped for PNG.
pub fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Encoded, ImagingError> {
    let quality = quality.clamp(1, 100);
    let (width, height) = (image.width(), image.height());
    let mut bytes = Vec::new();

    match format {
        OutputFormat::Jpeg => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, quality)
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| ImagingError::encode("jpeg", e))?;
        }
        OutputFormat::Png => {
            let level = png_compression(quality);
            let encoder = PngEncoder::new_with_quality(
                &mut bytes,
                png_compression_type(level),
                PngFilter::Adaptive,
            );
            write_rgb_or_rgba(encoder, image).map_err(|e| ImagingError::encode("png", e))?;
        }
        OutputFormat::Webp => bytes = encode_webp(image, quality)?,
        OutputFormat::Avif => {
            let encoder = AvifEncoder::new_with_speed_quality(&mut bytes, 8, quality);
            write_rgb_or_rgba(encoder, image).map_err(|e| ImagingError::encode("avif", e))?;
        }
    }

    Ok(Encoded { bytes, format })
}

fn encode_webp(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let (width, height) = (image.width(), image.height());
    let lossless = quality >= WEBP_LOSSLESS_QUALITY;
    let encoded = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height)
            .encode_simple(lossless, f32::from(quality))
    } else {
        let rgb = image.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height)
            .encode_simple(lossless, f32::from(quality))
    };
    encoded
        .map(|mem| mem.to_vec())
        .map_err(|e| ImagingError::encode("webp", format!("{e:?}")))
}

fn write_rgb_or_rgba(
    encoder: impl ImageEncoder,
    image: &DynamicImage,
) -> image::ImageResult<()> {
    let (width, height) = (image.width(), image.height());
    if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        encoder.write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
    } else {
        let rgb = image.to_rgb8();
        encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(16, 8, |x, y| {
            Rgb([x as u8 * 10, y as u8 * 20, 128])
        }))
    }

    #[test]
    fn png_quality_maps_to_compression_levels() {
        assert_eq!(png_compression(0), 0);
        assert_eq!(png_compression(85), 8);
        assert_eq!(png_compression(100), 10);
        assert_eq!(png_compression(250), 10);
    }

    #[test]
    fn formats_parse_with_aliases() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("heif".parse::<OutputFormat>().unwrap(), OutputFormat::Avif);
        assert!("gif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn encodes_each_web_format() {
        for (format, expected) in [
            (OutputFormat::Jpeg, ImageFormat::Jpeg),
            (OutputFormat::Png, ImageFormat::Png),
            (OutputFormat::Webp, ImageFormat::WebP),
        ] {
            let out = encode(&sample(), format, 80).unwrap();
            assert_eq!(image::guess_format(&out.bytes).unwrap(), expected);
            let back = image::load_from_memory(&out.bytes).unwrap();
            assert_eq!((back.width(), back.height()), (16, 8));
        }
    }

    #[test]
    fn webp_quality_controls_size() {
        let noisy = DynamicImage::ImageRgb8(RgbImage::from_fn(96, 96, |x, y| {
            let n = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663)) >> 3;
            Rgb([n as u8, (n >> 8) as u8, (n >> 16) as u8])
        }));
        let low = encode(&noisy, OutputFormat::Webp, 30).unwrap();
        let high = encode(&noisy, OutputFormat::Webp, 90).unwrap();
        assert!(
            low.bytes.len() < high.bytes.len(),
            "q30 {} bytes, q90 {} bytes",
            low.bytes.len(),
            high.bytes.len()
        );

        let lossless = encode(&noisy, OutputFormat::Webp, 100).unwrap();
        let back = image::load_from_memory(&lossless.bytes).unwrap().to_rgb8();
        assert_eq!(back.as_raw(), noisy.to_rgb8().as_raw());
    }

    #[test]
    fn webp_keeps_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 100])));
        let out = encode(&img, OutputFormat::Webp, 90).unwrap();
        let back = image::load_from_memory(&out.bytes).unwrap();
        assert!(back.color().has_alpha());
        assert_eq!(out.content_type(), "image/webp");
    }
}
