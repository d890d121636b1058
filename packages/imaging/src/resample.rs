//! Separable convolution resampler for the kernels `image::imageops` lacks.
//!
//! Works on an `Rgba32FImage` copy: one horizontal pass, then one vertical
//! pass, each tap weight normalized so flat regions stay flat.

use image::{ColorType, DynamicImage, ImageBuffer, Rgba, Rgba32FImage};

/// A resampling kernel: weight function and support radius in source pixels
/// at 1:1 scale.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Filter {
    pub weight: fn(f32) -> f32,
    pub radius: f32,
}

fn sinc(x: f32) -> f32 {
    if x == 0.0 {
        1.0
    } else {
        let a = x * std::f32::consts::PI;
        a.sin() / a
    }
}

/// Mitchell-Netravali with B = C = 1/3.
pub(crate) fn mitchell(x: f32) -> f32 {
    const B: f32 = 1.0 / 3.0;
    const C: f32 = 1.0 / 3.0;
    let x = x.abs();
    if x < 1.0 {
        ((12.0 - 9.0 * B - 6.0 * C) * x.powi(3)
            + (-18.0 + 12.0 * B + 6.0 * C) * x.powi(2)
            + (6.0 - 2.0 * B))
            / 6.0
    } else if x < 2.0 {
        ((-B - 6.0 * C) * x.powi(3)
            + (6.0 * B + 30.0 * C) * x.powi(2)
            + (-12.0 * B - 48.0 * C) * x
            + (8.0 * B + 24.0 * C))
            / 6.0
    } else {
        0.0
    }
}

pub(crate) fn lanczos2(x: f32) -> f32 {
    if x.abs() < 2.0 { sinc(x) * sinc(x / 2.0) } else { 0.0 }
}

/// Magic Kernel Sharp 2013.
pub(crate) fn mks2013(x: f32) -> f32 {
    let x = x.abs();
    if x <= 0.5 {
        17.0 / 16.0 - 7.0 / 4.0 * x * x
    } else if x <= 1.5 {
        (1.0 - x) * (7.0 / 4.0 - x)
    } else if x <= 2.5 {
        -(x - 2.5).powi(2) / 8.0
    } else {
        0.0
    }
}

/// Magic Kernel Sharp 2021.
pub(crate) fn mks2021(x: f32) -> f32 {
    let x = x.abs();
    if x <= 0.5 {
        577.0 / 576.0 - 239.0 / 144.0 * x * x
    } else if x <= 1.5 {
        (140.0 * x * x - 379.0 * x + 239.0) / 144.0
    } else if x <= 2.5 {
        -(24.0 * x * x - 113.0 * x + 130.0) / 144.0
    } else if x <= 3.5 {
        (4.0 * x * x - 27.0 * x + 45.0) / 144.0
    } else if x <= 4.5 {
        -(4.0 * x * x - 36.0 * x + 81.0) / 1152.0
    } else {
        0.0
    }
}

/// Resize `image` to exactly `width`×`height` with `filter`, keeping the
/// source's bit depth class (8-bit, 16-bit or float) and alpha.
pub(crate) fn resize(image: &DynamicImage, width: u32, height: u32, filter: Filter) -> DynamicImage {
    let src = image.to_rgba32f();
    let horizontal = pass(&src, width, filter, Axis::X);
    let out = pass(&horizontal, height, filter, Axis::Y);
    restore_color(out, image.color())
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

struct Taps {
    start: u32,
    weights: Vec<f32>,
}

/// Weights for every destination index along one axis.
fn taps(src_len: u32, dst_len: u32, filter: Filter) -> Vec<Taps> {
    let ratio = src_len as f32 / dst_len as f32;
    let scale = ratio.max(1.0);
    let support = filter.radius * scale;

    (0..dst_len)
        .map(|i| {
            let center = (i as f32 + 0.5) * ratio;
            let left = ((center - support).floor().max(0.0)) as u32;
            let right = ((center + support).ceil() as u32).min(src_len);
            let mut weights: Vec<f32> = (left..right)
                .map(|j| (filter.weight)((j as f32 + 0.5 - center) / scale))
                .collect();
            let sum: f32 = weights.iter().sum();
            if sum.abs() > f32::EPSILON {
                weights.iter_mut().for_each(|w| *w /= sum);
            }
            Taps {
                start: left,
                weights,
            }
        })
        .collect()
}

fn pass(src: &Rgba32FImage, dst_len: u32, filter: Filter, axis: Axis) -> Rgba32FImage {
    let (sw, sh) = src.dimensions();
    let (src_len, (dw, dh)) = match axis {
        Axis::X => (sw, (dst_len, sh)),
        Axis::Y => (sh, (sw, dst_len)),
    };
    let table = taps(src_len, dst_len, filter);

    ImageBuffer::from_fn(dw, dh, |x, y| {
        let (along, across) = match axis {
            Axis::X => (x, y),
            Axis::Y => (y, x),
        };
        let tap = &table[along as usize];
        let mut acc = [0f32; 4];
        for (k, w) in tap.weights.iter().enumerate() {
            let j = tap.start + k as u32;
            let p = match axis {
                Axis::X => src.get_pixel(j, across),
                Axis::Y => src.get_pixel(across, j),
            };
            for c in 0..4 {
                acc[c] += p.0[c] * w;
            }
        }
        Rgba(acc.map(|v| v.clamp(0.0, 1.0)))
    })
}

fn restore_color(out: Rgba32FImage, color: ColorType) -> DynamicImage {
    let out = DynamicImage::ImageRgba32F(out);
    match color {
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(out.to_rgb32f()),
        ColorType::Rgba32F => out,
        ColorType::L16 | ColorType::Rgb16 => DynamicImage::ImageRgb16(out.to_rgb16()),
        ColorType::La16 | ColorType::Rgba16 => DynamicImage::ImageRgba16(out.to_rgba16()),
        c if c.has_alpha() => DynamicImage::ImageRgba8(out.to_rgba8()),
        _ => DynamicImage::ImageRgb8(out.to_rgb8()),
    }
}
