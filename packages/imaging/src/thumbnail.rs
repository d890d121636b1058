//! Display thumbnail and thumbhash placeholder.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, Limits};

use crate::color::normalize_to_srgb;
use crate::decode::decode;
use crate::encode::{OutputFormat, encode};
use crate::error::ImagingError;
use crate::transform::{Kernel, autorotate, scale_proportionally};

/// Width of the JPEG companion written next to the original.
pub const DISPLAY_THUMBNAIL_WIDTH: u32 = 200;
pub const THUMBNAIL_QUALITY: u8 = 85;
/// Longest side of the image fed to the thumbhash encoder.
pub const THUMBHASH_SOURCE_SIZE: u32 = 32;

/// Decode, orient and convert to sRGB: the common start of every derived view.
pub fn oriented_srgb(
    bytes: &[u8],
    limits: &Limits,
    file_type: Option<&str>,
) -> Result<DynamicImage, ImagingError> {
    let decoded = decode(bytes, limits, file_type)?;
    let mut image = normalize_to_srgb(&decoded);
    autorotate(&mut image, decoded.orientation);
    Ok(image)
}

/// JPEG thumbnail fitting `width`×`height` (either may be 0).
pub fn create_thumbnail(
    bytes: &[u8],
    width: u32,
    height: u32,
    limits: &Limits,
    file_type: Option<&str>,
) -> Result<Vec<u8>, ImagingError> {
    let image = oriented_srgb(bytes, limits, file_type)?;
    thumbnail_jpeg(&image, width, height)
}

pub fn thumbnail_jpeg(image: &DynamicImage, width: u32, height: u32) -> Result<Vec<u8>, ImagingError> {
    let scaled = scale_proportionally(image, width, height, Kernel::Lanczos3);
    Ok(encode(&scaled, OutputFormat::Jpeg, THUMBNAIL_QUALITY)?.bytes)
}

/// The small RGBA image the thumbhash is computed from.
pub fn thumbhash_source(image: &DynamicImage) -> DynamicImage {
    let small = scale_proportionally(
        image,
        THUMBHASH_SOURCE_SIZE,
        THUMBHASH_SOURCE_SIZE,
        Kernel::Linear,
    );
    DynamicImage::ImageRgba8(small.to_rgba8())
}

/// Base64 thumbhash of an already oriented sRGB image.
pub fn thumbhash_base64(image: &DynamicImage) -> String {
    let source = thumbhash_source(image).to_rgba8();
    let hash = thumbhash::rgba_to_thumb_hash(
        source.width() as usize,
        source.height() as usize,
        source.as_raw(),
    );
    STANDARD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::jpeg_bytes;

    #[test]
    fn display_thumbnail_is_200_wide_jpeg() {
        let out = create_thumbnail(
            &jpeg_bytes(1920, 1080),
            DISPLAY_THUMBNAIL_WIDTH,
            0,
            &Limits::default(),
            None,
        )
        .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
        let back = image::load_from_memory(&out).unwrap();
        assert_eq!((back.width(), back.height()), (200, 113));
    }

    #[test]
    fn thumbhash_source_fits_32() {
        let img = oriented_srgb(&jpeg_bytes(640, 320), &Limits::default(), None).unwrap();
        let src = thumbhash_source(&img);
        assert_eq!((src.width(), src.height()), (32, 16));
    }

    #[test]
    fn thumbhash_is_stable_base64() {
        let img = oriented_srgb(&jpeg_bytes(120, 80), &Limits::default(), None).unwrap();
        let a = thumbhash_base64(&img);
        assert!(!a.is_empty());
        assert!(STANDARD.decode(&a).is_ok());
        assert_eq!(a, thumbhash_base64(&img));
    }
}
