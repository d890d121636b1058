//! AVIF and AV1-coded HEIF decoding.
//!
//! The image crate only encodes AVIF. Decoding goes through `avif-parse` for
//! the ISOBMFF container and `rav1d` for the AV1 payload, then a BT.601
//! YUV → RGB conversion. HEVC-coded HEIC has no pure Rust decoder and is
//! reported as such.

use std::io::Cursor;
use std::ptr::NonNull;

use image::{DynamicImage, Limits, RgbImage};
use rav1d::include::dav1d::data::Dav1dData;
use rav1d::include::dav1d::dav1d::Dav1dSettings;
use rav1d::include::dav1d::headers::{
    DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
    DAV1D_PIXEL_LAYOUT_I444,
};
use rav1d::include::dav1d::picture::Dav1dPicture;
use rav1d::src::lib as dav1d;

const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"avif", b"avis", b"mif1", b"msf1", b"heic", b"heix", b"heim", b"heis", b"hevc", b"hevx",
];

/// Whether `bytes` start with an ISOBMFF `ftyp` box naming an AVIF or HEIF
/// brand, major or compatible.
pub fn is_heif_container(bytes: &[u8]) -> bool {
    if bytes.len() < 16 || &bytes[4..8] != b"ftyp" {
        return false;
    }
    let box_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let end = box_len.clamp(16, bytes.len());
    // major brand, minor version, then compatible brands
    std::iter::once(&bytes[8..12])
        .chain(bytes[16..end].chunks_exact(4))
        .any(|brand| HEIF_BRANDS.iter().any(|b| b.as_slice() == brand))
}

fn parse(bytes: &[u8]) -> Result<avif_parse::AvifData, String> {
    avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| format!("heif: not an AV1-coded image ({e:?}); HEVC HEIC is not supported"))
}

/// Frame size from the AV1 sequence header, without decoding.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    let avif = parse(bytes)?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| format!("heif: unreadable AV1 metadata ({e:?})"))?;
    Ok((meta.max_frame_width.get(), meta.max_frame_height.get()))
}

/// Decode the primary item to 8-bit RGB.
pub fn decode(bytes: &[u8], limits: &Limits) -> Result<DynamicImage, String> {
    let avif = parse(bytes)?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| format!("heif: unreadable AV1 metadata ({e:?})"))?;
    let (w, h) = (meta.max_frame_width.get(), meta.max_frame_height.get());
    check_limits(w, h, limits)?;

    let rgb = decode_av1(&avif.primary_item)?;
    Ok(DynamicImage::ImageRgb8(rgb))
}

fn check_limits(w: u32, h: u32, limits: &Limits) -> Result<(), String> {
    if limits.max_image_width.is_some_and(|max| w > max)
        || limits.max_image_height.is_some_and(|max| h > max)
    {
        return Err(format!("heif: {w}x{h} exceeds the dimension limit"));
    }
    let needed = u64::from(w) * u64::from(h) * crate::decode::BYTES_PER_PIXEL;
    if limits.max_alloc.is_some_and(|max| needed > max) {
        return Err(format!("heif: {w}x{h} exceeds the pixel limit"));
    }
    Ok(())
}

fn decode_av1(av1: &[u8]) -> Result<RgbImage, String> {
    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    // SAFETY: dav1d_default_settings initializes every field.
    let mut settings = unsafe {
        dav1d::dav1d_default_settings(NonNull::from(&mut settings).cast());
        settings.assume_init()
    };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    // SAFETY: both pointers are valid for the duration of the call.
    let rc = unsafe { dav1d::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(format!("av1: decoder open failed ({})", rc.0));
    }

    let result = 'decode: {
        let mut data = Dav1dData::default();
        // SAFETY: dav1d_data_create allocates `av1.len()` bytes owned by `data`.
        let buf = unsafe { dav1d::dav1d_data_create(NonNull::new(&mut data), av1.len()) };
        if buf.is_null() {
            break 'decode Err("av1: buffer allocation failed".to_string());
        }
        // SAFETY: `buf` points at `av1.len()` writable bytes.
        unsafe { std::ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len()) };

        // SAFETY: data was created above; the decoder takes ownership on success.
        let rc = unsafe { dav1d::dav1d_send_data(ctx, NonNull::new(&mut data)) };
        if rc.0 != 0 {
            // SAFETY: on failure the data is still ours to release.
            unsafe { dav1d::dav1d_data_unref(NonNull::new(&mut data)) };
            break 'decode Err(format!("av1: send_data failed ({})", rc.0));
        }

        // SAFETY: an all-zero picture is the documented empty state.
        let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
        // SAFETY: ctx is open and pic is a valid out-parameter.
        let rc = unsafe { dav1d::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
        if rc.0 != 0 {
            break 'decode Err(format!("av1: get_picture failed ({})", rc.0));
        }

        let rgb = picture_to_rgb(&pic);
        // SAFETY: pic holds a reference returned by get_picture.
        unsafe { dav1d::dav1d_picture_unref(NonNull::new(&mut pic)) };
        rgb
    };
    // SAFETY: ctx was opened above and is not used afterwards.
    unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };
    result
}

/// One plane of a decoded picture.
#[derive(Clone, Copy)]
struct Plane {
    ptr: *const u8,
    stride: isize,
}

impl Plane {
    /// Sample at (x, y). 10 and 12 bit samples are stored as u16.
    fn sample(&self, x: u32, y: u32, bpc: u32) -> f32 {
        let row = y as isize * self.stride;
        // SAFETY: callers stay within the plane's width and height.
        unsafe {
            if bpc <= 8 {
                f32::from(*self.ptr.offset(row + x as isize))
            } else {
                f32::from(self.ptr.offset(row + x as isize * 2).cast::<u16>().read_unaligned())
            }
        }
    }
}

fn picture_to_rgb(pic: &Dav1dPicture) -> Result<RgbImage, String> {
    let (w, h) = (pic.p.w as u32, pic.p.h as u32);
    let bpc = pic.p.bpc as u32;
    let plane = |i: usize, stride: isize| -> Result<Plane, String> {
        let ptr = pic.data[i].ok_or_else(|| format!("av1: plane {i} missing"))?;
        Ok(Plane {
            ptr: ptr.as_ptr() as *const u8,
            stride,
        })
    };
    let y = plane(0, pic.stride[0])?;

    let chroma = match pic.p.layout {
        DAV1D_PIXEL_LAYOUT_I400 => None,
        DAV1D_PIXEL_LAYOUT_I420 => Some((true, true)),
        DAV1D_PIXEL_LAYOUT_I422 => Some((true, false)),
        DAV1D_PIXEL_LAYOUT_I444 => Some((false, false)),
        other => return Err(format!("av1: unsupported pixel layout {other}")),
    };
    let chroma = match chroma {
        Some(ss) => Some((plane(1, pic.stride[1])?, plane(2, pic.stride[1])?, ss)),
        None => None,
    };

    let max = ((1u32 << bpc) - 1) as f32;
    let center = (1u32 << (bpc - 1)) as f32;
    let scale = 255.0 / max;

    Ok(RgbImage::from_fn(w, h, |col, row| {
        let luma = y.sample(col, row, bpc);
        let Some((u, v, (ss_x, ss_y))) = chroma else {
            let g = (luma * scale).clamp(0.0, 255.0) as u8;
            return image::Rgb([g, g, g]);
        };
        let (cx, cy) = (if ss_x { col / 2 } else { col }, if ss_y { row / 2 } else { row });
        let cb = u.sample(cx, cy, bpc) - center;
        let cr = v.sample(cx, cy, bpc) - center;
        let to8 = |c: f32| (c * scale).clamp(0.0, 255.0) as u8;
        image::Rgb([
            to8(luma + 1.402 * cr),
            to8(luma - 0.344_136 * cb - 0.714_136 * cr),
            to8(luma + 1.772 * cb),
        ])
    }))
}
