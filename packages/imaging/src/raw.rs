//! Camera RAW development through `rawloader`.
//!
//! This is a straightforward develop: black/white level normalization, camera
//! white balance, 3×3 neighbourhood demosaic and sRGB transfer. The camera
//! color matrix is not applied, so colors are close but not calibrated.

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, Rgb, RgbImage};
use rawloader::{RawImage, RawImageData};

use crate::decode::{Decoded, SourceFormat};

pub(crate) fn decode_raw(bytes: &[u8], max_pixels: Option<u64>) -> Result<Decoded, String> {
    let raw = rawloader::decode(&mut Cursor::new(bytes)).map_err(|e| format!("{e:?}"))?;

    if let Some(max) = max_pixels
        && (raw.width as u64) * (raw.height as u64) > max
    {
        return Err(format!(
            "sensor {}x{} exceeds pixel limit",
            raw.width, raw.height
        ));
    }

    let image = develop(&raw)?;
    let orientation =
        Orientation::from_exif(raw.orientation.to_u16() as u8).unwrap_or(Orientation::NoTransforms);

    Ok(Decoded {
        image: DynamicImage::ImageRgb8(image),
        format: SourceFormat::Raw,
        icc_profile: None,
        orientation,
    })
}

fn develop(raw: &RawImage) -> Result<RgbImage, String> {
    let samples: Vec<f32> = match &raw.data {
        RawImageData::Integer(data) => data.iter().map(|&v| v as f32).collect(),
        RawImageData::Float(data) => data.clone(),
    };

    let width = raw.width;
    let height = raw.height;
    let [top, right, bottom, left] = raw.crops;
    let out_w = width.saturating_sub(left + right);
    let out_h = height.saturating_sub(top + bottom);
    if out_w == 0 || out_h == 0 {
        return Err("empty sensor area after crop".into());
    }
    if samples.len() < width * height * raw.cpp {
        return Err("truncated sensor data".into());
    }

    let wb = white_balance(raw.wb_coeffs);
    let level = |channel: usize, v: f32| -> f32 {
        let black = raw.blacklevels[channel.min(3)] as f32;
        let white = raw.whitelevels[channel.min(3)] as f32;
        ((v - black) / (white - black).max(1.0)).clamp(0.0, 1.0)
    };

    let mut out = RgbImage::new(out_w as u32, out_h as u32);

    // Linear DNGs and similar already carry three samples per pixel.
    if raw.cpp == 3 {
        for y in 0..out_h {
            for x in 0..out_w {
                let base = ((y + top) * width + (x + left)) * 3;
                let px = [0, 1, 2].map(|c| encode_srgb(level(c, samples[base + c]) * wb[c]));
                out.put_pixel(x as u32, y as u32, Rgb(px));
            }
        }
        return Ok(out);
    }

    let monochrome = raw.cfa.width == 0;

    for y in 0..out_h {
        for x in 0..out_w {
            let row = y + top;
            let col = x + left;

            let mut sum = [0f32; 3];
            let mut count = [0u32; 3];
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let r = row as isize + dy;
                    let c = col as isize + dx;
                    if r < 0 || c < 0 || r as usize >= height || c as usize >= width {
                        continue;
                    }
                    let (r, c) = (r as usize, c as usize);
                    let color = if monochrome { 1 } else { raw.cfa.color_at(r, c) };
                    // The fourth CFA color (emerald/second green) counts as green.
                    let channel = if color >= 3 { 1 } else { color };
                    sum[channel] += level(color, samples[r * width + c]);
                    count[channel] += 1;
                }
            }

            let px = if monochrome {
                let v = encode_srgb(sum[1] / count[1].max(1) as f32);
                [v, v, v]
            } else {
                [0, 1, 2].map(|c| {
                    let avg = if count[c] == 0 {
                        0.0
                    } else {
                        sum[c] / count[c] as f32
                    };
                    encode_srgb(avg * wb[c])
                })
            };
            out.put_pixel(x as u32, y as u32, Rgb(px));
        }
    }

    Ok(out)
}

/// Camera multipliers normalized to green; neutral if the camera gave none.
fn white_balance(coeffs: [f32; 4]) -> [f32; 3] {
    let [r, g, b, _] = coeffs;
    if [r, g, b].iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return [1.0, 1.0, 1.0];
    }
    [r / g, 1.0, b / g]
}

/// Linear 0..1 to 8-bit sRGB.
fn encode_srgb(linear: f32) -> u8 {
    let v = linear.clamp(0.0, 1.0);
    let encoded = if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}
