use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Limits};
use tracing::debug;

use crate::avif;
use crate::error::ImagingError;
use crate::raw;

/// File types handled by the RAW loader before the generic decoder is tried.
///
/// Most of these are TIFF containers; the generic TIFF decoder would happily
/// return the embedded preview IFD instead of the sensor data.
pub const RAW_EXTENSIONS: &[&str] = &[
    "3fr", "ari", "arw", "cr2", "crw", "dcr", "dng", "erf", "kdc", "mef", "mos", "mrw", "nef",
    "nrw", "orf", "pef", "raf", "raw", "rw2", "rwl", "srf", "srw", "x3f",
];

pub fn is_raw_extension(ext: &str) -> bool {
    RAW_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Where the pixels came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Image(ImageFormat),
    Raw,
}

impl SourceFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Image(ImageFormat::Jpeg) => "jpeg",
            Self::Image(ImageFormat::Png) => "png",
            Self::Image(ImageFormat::Tiff) => "tiff",
            Self::Image(ImageFormat::WebP) => "webp",
            Self::Image(ImageFormat::Gif) => "gif",
            Self::Image(ImageFormat::Bmp) => "bmp",
            Self::Image(ImageFormat::Avif) => "avif",
            Self::Image(_) => "image",
            Self::Raw => "raw",
        }
    }
}

/// A decoded image together with what the container told us about it.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub image: DynamicImage,
    pub format: SourceFormat,
    pub icc_profile: Option<Vec<u8>>,
    pub orientation: Orientation,
}

impl Decoded {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// Decode arbitrary image bytes.
///
/// The generic decoder goes first and the RAW loader is the fallback. When
/// `file_type` names a camera RAW extension the order is reversed.
pub fn decode(
    bytes: &[u8],
    limits: &Limits,
    file_type: Option<&str>,
) -> Result<Decoded, ImagingError> {
    let raw_first = file_type.is_some_and(is_raw_extension);

    let (first, second): (Attempt, Attempt) = if raw_first {
        (decode_raw, decode_generic)
    } else {
        (decode_generic, decode_raw)
    };

    match first(bytes, limits) {
        Ok(decoded) => Ok(decoded),
        Err(first_err) => {
            debug!(target: "imaging", error = %first_err, raw_first, "Primary decoder failed, trying fallback");
            second(bytes, limits)
                .map_err(|second_err| ImagingError::Decode(format!("{first_err}; {second_err}")))
        }
    }
}

/// Allocation budget per pixel used to turn a pixel cap into `Limits`.
pub const BYTES_PER_PIXEL: u64 = 4;

type Attempt = fn(&[u8], &Limits) -> Result<Decoded, String>;

fn decode_generic(bytes: &[u8], limits: &Limits) -> Result<Decoded, String> {
    if avif::is_heif_container(bytes) {
        return Ok(Decoded {
            image: avif::decode(bytes, limits)?,
            format: SourceFormat::Image(ImageFormat::Avif),
            icc_profile: None,
            orientation: Orientation::NoTransforms,
        });
    }
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("generic: {e}"))?;
    let format = reader
        .format()
        .ok_or_else(|| "generic: unrecognized format".to_string())?;
    reader.limits(limits.clone());

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| format!("generic: {e}"))?;
    let icc_profile = decoder.icc_profile().ok().flatten();
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);
    let image = DynamicImage::from_decoder(decoder).map_err(|e| format!("generic: {e}"))?;

    Ok(Decoded {
        image,
        format: SourceFormat::Image(format),
        icc_profile,
        orientation,
    })
}

fn decode_raw(bytes: &[u8], limits: &Limits) -> Result<Decoded, String> {
    let max_pixels = limits.max_alloc.map(|bytes| bytes / BYTES_PER_PIXEL);
    raw::decode_raw(bytes, max_pixels).map_err(|e| format!("raw: {e}"))
}

/// Width and height as the decoder reports them, without orientation.
///
/// Header-only for regular formats; RAW files are developed in full since
/// the output size depends on the sensor crop.
pub fn probe_dimensions(
    bytes: &[u8],
    limits: &Limits,
    file_type: Option<&str>,
) -> Result<(u32, u32), ImagingError> {
    if avif::is_heif_container(bytes)
        && let Ok(dims) = avif::dimensions(bytes)
    {
        return Ok(dims);
    }
    if !file_type.is_some_and(is_raw_extension)
        && let Ok(reader) = ImageReader::new(Cursor::new(bytes)).with_guessed_format()
        && reader.format().is_some()
        && let Ok(dims) = reader.into_dimensions()
    {
        return Ok(dims);
    }
    decode(bytes, limits, file_type).map(|d| d.dimensions())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageEncoder, Rgb, RgbImage};

    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    #[test]
    fn decodes_jpeg() {
        let decoded = decode(&jpeg_bytes(64, 32), &Limits::default(), None).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
        assert_eq!(decoded.format, SourceFormat::Image(ImageFormat::Jpeg));
        assert_eq!(decoded.orientation, Orientation::NoTransforms);
    }

    #[test]
    fn probes_without_full_decode() {
        let dims = probe_dimensions(&png_bytes(17, 9), &Limits::default(), Some("png")).unwrap();
        assert_eq!(dims, (17, 9));
    }

    #[test]
    fn garbage_fails_both_decoders() {
        let err = decode(b"definitely not an image", &Limits::default(), None).unwrap_err();
        match err {
            ImagingError::Decode(msg) => {
                assert!(msg.contains("generic"), "{msg}");
                assert!(msg.contains("raw"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decodes_and_probes_avif() {
        let bytes = crate::avif::tests::avif_bytes(40, 30);
        let decoded = decode(&bytes, &Limits::default(), Some("avif")).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
        assert_eq!(decoded.format, SourceFormat::Image(ImageFormat::Avif));
        assert_eq!(probe_dimensions(&bytes, &Limits::default(), Some("heic")).unwrap(), (40, 30));
    }

    #[test]
    fn raw_extensions_are_case_insensitive() {
        assert!(is_raw_extension("NEF"));
        assert!(is_raw_extension("dng"));
        assert!(!is_raw_extension("jpg"));
    }
}
