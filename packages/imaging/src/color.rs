//! Color-space normalization to sRGB.

use image::{ColorType, DynamicImage};
use qcms::{DataType, Intent, Profile, Transform};
use tracing::{debug, warn};

use crate::decode::{Decoded, SourceFormat};

/// Label stored in `image_metadata.color_space` for untagged RGB images.
pub const SRGB_LABEL: &str = "sRGB";

/// Convert a decoded image into 8-bit sRGB, keeping alpha when present.
///
/// An embedded RGB ICC profile other than sRGB is transformed with the
/// perceptual intent. Untagged images, grey and CMYK sources (which the
/// decoder has already expanded to RGB) are interpreted as sRGB.
pub fn normalize_to_srgb(decoded: &Decoded) -> DynamicImage {
    let has_alpha = decoded.image.color().has_alpha();
    let mut image = if has_alpha {
        DynamicImage::ImageRgba8(decoded.image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(decoded.image.to_rgb8())
    };

    let Some(icc) = decoded.icc_profile.as_deref() else {
        return image;
    };
    if is_srgb_profile(icc) || icc_color_space(icc) != Some(*b"RGB ") {
        return image;
    }

    let Some(input) = Profile::new_from_slice(icc, false) else {
        warn!(target: "imaging", "Unparseable ICC profile, assuming sRGB");
        return image;
    };
    let output = Profile::new_sRGB();
    let data_type = if has_alpha {
        DataType::RGBA8
    } else {
        DataType::RGB8
    };
    let Some(transform) = Transform::new(&input, &output, data_type, Intent::Perceptual) else {
        warn!(target: "imaging", "Could not build ICC transform, assuming sRGB");
        return image;
    };

    match &mut image {
        DynamicImage::ImageRgb8(buf) => transform.apply(&mut **buf),
        DynamicImage::ImageRgba8(buf) => transform.apply(&mut **buf),
        _ => {}
    }
    debug!(target: "imaging", profile = ?icc_description(icc), "Converted to sRGB");
    image
}

/// Human-readable color-space label for metadata.
pub fn color_space_label(decoded: &Decoded) -> String {
    if let Some(icc) = decoded.icc_profile.as_deref() {
        if let Some(desc) = icc_description(icc) {
            return desc;
        }
        return match icc_color_space(icc).as_ref() {
            Some(b"GRAY") => "Gray".into(),
            Some(b"CMYK") => "CMYK".into(),
            _ => "ICC".into(),
        };
    }
    if decoded.format == SourceFormat::Raw {
        return SRGB_LABEL.into();
    }
    match decoded.image.color() {
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => "Gray".into(),
        _ => SRGB_LABEL.into(),
    }
}

/// True if the profile describes sRGB (IEC 61966-2.1).
pub fn is_srgb_profile(icc: &[u8]) -> bool {
    icc_description(icc).is_some_and(|d| {
        let d = d.to_ascii_lowercase();
        d.contains("srgb") || d.contains("61966-2")
    })
}

/// Data color space signature from the ICC header (`RGB `, `GRAY`, `CMYK`, ...).
pub fn icc_color_space(icc: &[u8]) -> Option<[u8; 4]> {
    icc.get(16..20)?.try_into().ok()
}

/// Profile description from the `desc` tag (v2 `desc` or v4 `mluc`).
pub fn icc_description(icc: &[u8]) -> Option<String> {
    let tag_count = be_u32(icc, 128)? as usize;
    let tag = (0..tag_count.min(256)).find_map(|i| {
        let entry = 132 + i * 12;
        (icc.get(entry..entry + 4)? == b"desc")
            .then(|| Some((be_u32(icc, entry + 4)? as usize, be_u32(icc, entry + 8)? as usize)))
            .flatten()
    })?;
    let (offset, size) = tag;
    let data = icc.get(offset..offset.checked_add(size)?)?;

    let text = match data.get(0..4)? {
        b"desc" => {
            let len = be_u32(data, 8)? as usize;
            let bytes = data.get(12..12 + len)?;
            String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
        }
        b"mluc" => {
            let len = be_u32(data, 20)? as usize;
            let start = be_u32(data, 24)? as usize;
            let bytes = data.get(start..start.checked_add(len)?)?;
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
                .trim_end_matches('\0')
                .to_string()
        }
        _ => return None,
    };

    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::metadata::Orientation;
    use image::{ImageFormat, Luma, Rgb, RgbImage};

    /// Minimal ICC blob with a v2 `desc` tag and the given color space.
    fn icc_with_desc(desc: &str, space: &[u8; 4]) -> Vec<u8> {
        let mut icc = vec![0u8; 128];
        icc[16..20].copy_from_slice(space);
        icc.extend_from_slice(&1u32.to_be_bytes());
        let tag_offset = 128 + 4 + 12;
        let mut tag = Vec::new();
        tag.extend_from_slice(b"desc");
        tag.extend_from_slice(&[0; 4]);
        tag.extend_from_slice(&((desc.len() + 1) as u32).to_be_bytes());
        tag.extend_from_slice(desc.as_bytes());
        tag.push(0);
        icc.extend_from_slice(b"desc");
        icc.extend_from_slice(&(tag_offset as u32).to_be_bytes());
        icc.extend_from_slice(&(tag.len() as u32).to_be_bytes());
        icc.extend_from_slice(&tag);
        icc
    }

    fn decoded(image: DynamicImage, icc: Option<Vec<u8>>) -> Decoded {
        Decoded {
            image,
            format: SourceFormat::Image(ImageFormat::Png),
            icc_profile: icc,
            orientation: Orientation::NoTransforms,
        }
    }

    #[test]
    fn reads_v2_description() {
        let icc = icc_with_desc("sRGB IEC61966-2.1", b"RGB ");
        assert_eq!(icc_description(&icc).as_deref(), Some("sRGB IEC61966-2.1"));
        assert!(is_srgb_profile(&icc));
        assert_eq!(icc_color_space(&icc), Some(*b"RGB "));
    }

    #[test]
    fn other_profiles_are_not_srgb() {
        let icc = icc_with_desc("Display P3", b"RGB ");
        assert!(!is_srgb_profile(&icc));
    }

    #[test]
    fn truncated_profiles_are_ignored() {
        assert_eq!(icc_description(&[0u8; 40]), None);
        assert_eq!(icc_color_space(&[0u8; 10]), None);
    }

    #[test]
    fn grey_is_expanded_to_rgb() {
        let grey = image::GrayImage::from_pixel(4, 4, Luma([128]));
        let d = decoded(DynamicImage::ImageLuma8(grey), None);
        assert_eq!(color_space_label(&d), "Gray");
        let out = normalize_to_srgb(&d);
        assert_eq!(out.color(), ColorType::Rgb8);
        assert_eq!(out.to_rgb8().get_pixel(0, 0), &Rgb([128, 128, 128]));
    }

    #[test]
    fn srgb_tagged_images_pass_through() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        let icc = icc_with_desc("sRGB built-in", b"RGB ");
        let d = decoded(DynamicImage::ImageRgb8(rgb.clone()), Some(icc));
        assert_eq!(color_space_label(&d), "sRGB built-in");
        assert_eq!(normalize_to_srgb(&d).to_rgb8(), rgb);
    }

    #[test]
    fn unparseable_profile_falls_back() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]));
        let icc = icc_with_desc("Broken", b"RGB ");
        let d = decoded(DynamicImage::ImageRgb8(rgb.clone()), Some(icc));
        // The stub profile has no curves, so qcms refuses it and the pixels stay.
        assert_eq!(normalize_to_srgb(&d).to_rgb8(), rgb);
    }
}
