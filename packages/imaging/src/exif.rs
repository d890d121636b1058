//! EXIF extraction through `kamadak-exif`.

use std::collections::BTreeMap;
use std::io::{BufReader, Cursor};

use common::ExifData;
use exif::{Context, Exif, Field, In, Reader, Tag, Value};
use tracing::debug;

use crate::error::ImagingError;

/// Microsoft/Adobe `Rating` tag in IFD0.
const RATING: Tag = Tag(Context::Tiff, 0x4746);

fn read(bytes: &[u8]) -> Result<Exif, exif::Error> {
    let mut reader = BufReader::new(Cursor::new(bytes));
    Reader::new().read_from_container(&mut reader)
}

/// Extract the fields we store on the image row.
///
/// Files without an EXIF block yield `Ok(None)`; broken blocks are errors.
pub fn extract_exif(bytes: &[u8]) -> Result<Option<ExifData>, ImagingError> {
    let exif = match read(bytes) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(container)) => {
            debug!(target: "imaging", container, "No EXIF block");
            return Ok(None);
        }
        Err(e) => return Err(ImagingError::Exif(e.to_string())),
    };

    let text = |tag: Tag| exif.get_field(tag, In::PRIMARY).and_then(|f| field_text(&exif, f));
    let uint = |tag: Tag| {
        exif.get_field(tag, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .map(|v| v.to_string())
    };

    let data = ExifData {
        make: text(Tag::Make),
        model: text(Tag::Model),
        software: text(Tag::Software),
        lens_make: text(Tag::LensMake),
        lens_model: text(Tag::LensModel),
        iso: uint(Tag::PhotographicSensitivity),
        f_number: text(Tag::FNumber),
        exposure_time: text(Tag::ExposureTime),
        exposure_bias: text(Tag::ExposureBiasValue),
        aperture: text(Tag::ApertureValue),
        focal_length: text(Tag::FocalLength),
        flash: text(Tag::Flash),
        white_balance: text(Tag::WhiteBalance),
        metering_mode: text(Tag::MeteringMode),
        date_taken: text(Tag::DateTimeOriginal),
        date_modified: text(Tag::DateTime),
        gps_latitude: gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S'),
        gps_longitude: gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W'),
        gps_altitude: gps_altitude(&exif),
        orientation: uint(Tag::Orientation),
        rating: uint(RATING),
        artist: text(Tag::Artist),
        copyright: text(Tag::Copyright),
        description: text(Tag::ImageDescription),
        width: uint(Tag::PixelXDimension).or_else(|| uint(Tag::ImageWidth)),
        height: uint(Tag::PixelYDimension).or_else(|| uint(Tag::ImageLength)),
    };

    Ok((!data.is_empty()).then_some(data))
}

/// Every readable primary-IFD field, keyed by tag name.
///
/// Maker notes and other opaque blobs are skipped.
pub fn exif_fields(bytes: &[u8]) -> Result<BTreeMap<String, String>, ImagingError> {
    let exif = read(bytes).map_err(|e| ImagingError::Exif(e.to_string()))?;
    Ok(exif
        .fields()
        .filter(|f| f.ifd_num == In::PRIMARY && f.tag != Tag::MakerNote)
        .filter(|f| !matches!(f.value, Value::Undefined(ref v, _) if v.len() > 64))
        .filter_map(|f| Some((f.tag.to_string(), field_text(&exif, f)?)))
        .collect())
}

fn field_text(exif: &Exif, field: &Field) -> Option<String> {
    let text = match &field.value {
        Value::Ascii(parts) => parts
            .iter()
            .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        _ => field.display_value().with_unit(exif).to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn gps_coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<String> {
    let Value::Rational(parts) = &exif.get_field(tag, In::PRIMARY)?.value else {
        return None;
    };
    let dms: Vec<f64> = parts.iter().map(|r| r.to_f64()).collect();
    let degrees = match dms.as_slice() {
        [d, m, s, ..] => d + m / 60.0 + s / 3600.0,
        [d, m] => d + m / 60.0,
        [d] => *d,
        [] => return None,
    };
    if !degrees.is_finite() {
        return None;
    }
    let negative = matches!(
        exif.get_field(ref_tag, In::PRIMARY).map(|f| &f.value),
        Some(Value::Ascii(v)) if v.first().and_then(|s| s.first()) == Some(&negative_ref)
    );
    let signed = if negative { -degrees } else { degrees };
    Some(format!("{signed:.6}"))
}

fn gps_altitude(exif: &Exif) -> Option<String> {
    let Value::Rational(parts) = &exif.get_field(Tag::GPSAltitude, In::PRIMARY)?.value else {
        return None;
    };
    let meters = parts.first()?.to_f64();
    if !meters.is_finite() {
        return None;
    }
    let below_sea = exif
        .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        == Some(1);
    Some(format!("{:.1}", if below_sea { -meters } else { meters }))
}
