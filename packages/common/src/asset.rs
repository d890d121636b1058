//! Value types stored in the image row's JSON columns.
//!
//! The relational row keeps `image_metadata` and `exif` as JSON. These structs
//! are the only shape those columns ever take; conversions happen explicitly
//! at the persistence boundary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Color label assigned by the user or imported from XMP.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
pub enum ColorLabel {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    Grey,
    #[default]
    None,
}

impl ColorLabel {
    pub const ALL: &'static [ColorLabel] = &[
        Self::Red,
        Self::Orange,
        Self::Yellow,
        Self::Green,
        Self::Blue,
        Self::Purple,
        Self::Pink,
        Self::Grey,
        Self::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "Red",
            Self::Orange => "Orange",
            Self::Yellow => "Yellow",
            Self::Green => "Green",
            Self::Blue => "Blue",
            Self::Purple => "Purple",
            Self::Pink => "Pink",
            Self::Grey => "Grey",
            Self::None => "None",
        }
    }

    /// Map a Photoshop `Urgency` value (1..=7) onto a label.
    pub fn from_urgency(urgency: u8) -> Option<Self> {
        match urgency {
            1 => Some(Self::Red),
            2 => Some(Self::Orange),
            3 => Some(Self::Yellow),
            4 => Some(Self::Green),
            5 => Some(Self::Blue),
            6 => Some(Self::Purple),
            7 => Some(Self::Grey),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for ColorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an unknown label name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLabelError(pub String);

impl fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown color label '{}'", self.0)
    }
}

impl std::error::Error for ParseLabelError {}

impl FromStr for ColorLabel {
    type Err = ParseLabelError;

    /// Case-insensitive; accepts the `Gray` spelling used by some editors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(Self::Red),
            "orange" => Ok(Self::Orange),
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            "blue" => Ok(Self::Blue),
            "purple" => Ok(Self::Purple),
            "pink" => Ok(Self::Pink),
            "grey" | "gray" => Ok(Self::Grey),
            "none" | "" => Ok(Self::None),
            _ => Err(ParseLabelError(s.to_string())),
        }
    }
}

/// Nested metadata record of an image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct ImageMetadata {
    /// Name of the original inside the image directory.
    pub file_name: String,
    /// Name the file was uploaded with.
    pub original_file_name: String,
    /// Declared type, lowercase extension without dot (`jpeg`, `nef`, ...).
    pub file_type: String,
    pub color_space: Option<String>,
    pub has_icc_profile: bool,
    pub size_bytes: i64,
    /// Lowercase hex SHA-1 of the original bytes.
    pub checksum: String,
    /// Base64 thumbhash, set once the image has been processed.
    pub thumbhash: Option<String>,
    pub keywords: Vec<String>,
    pub label: ColorLabel,
    /// 0..=5 when set.
    pub rating: Option<u8>,
    pub file_created_at: Option<DateTime<Utc>>,
    pub file_modified_at: Option<DateTime<Utc>>,
}

impl ImageMetadata {
    /// Fill rating, label and keywords from embedded tags.
    ///
    /// A field is only written while it is still unset (`None`, empty or
    /// `ColorLabel::None`), so values chosen by the user always win.
    /// Returns true if anything changed.
    pub fn fill_from_tags(&mut self, tags: &EmbeddedTags) -> bool {
        let mut changed = false;

        if self.rating.is_none()
            && let Some(rating) = tags.rating.filter(|r| *r <= 5)
        {
            self.rating = Some(rating);
            changed = true;
        }

        if self.label.is_none()
            && let Some(label) = tags.label.filter(|l| !l.is_none())
        {
            self.label = label;
            changed = true;
        }

        if self.keywords.is_empty() && !tags.keywords.is_empty() {
            self.keywords = tags.keywords.clone();
            changed = true;
        }

        changed
    }
}

/// Rating, label and keywords recovered from XMP packets or EXIF.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbeddedTags {
    pub rating: Option<u8>,
    pub label: Option<ColorLabel>,
    pub keywords: Vec<String>,
}

/// String-valued EXIF record stored on the image row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct ExifData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aperture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metering_mode: Option<String>,
    /// `DateTimeOriginal`, EXIF format `YYYY:MM:DD HH:MM:SS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<String>,
    /// `DateTime` (a.k.a. ModifyDate).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_latitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_longitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_altitude: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

impl ExifData {
    /// Numeric EXIF orientation (1..=8), if present and well formed.
    pub fn orientation_value(&self) -> Option<u8> {
        self.orientation
            .as_deref()
            .and_then(|o| o.trim().parse::<u8>().ok())
            .filter(|o| (1..=8).contains(o))
    }

    /// Numeric rating (0..=5), if present.
    pub fn rating_value(&self) -> Option<u8> {
        self.rating
            .as_deref()
            .and_then(|r| r.trim().parse::<i32>().ok())
            .map(|r| r.clamp(0, 5) as u8)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parse an EXIF timestamp (`YYYY:MM:DD HH:MM:SS`), interpreting it as UTC.
///
/// All-zero timestamps written by some cameras parse as `None`.
pub fn parse_exif_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_end_matches('\0');
    ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Capture and modification times derived from EXIF.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureTimes {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl CaptureTimes {
    /// `DateTimeOriginal` then `ModifyDate` then `now`. A missing side takes
    /// the other; if both are missing both become `now`.
    pub fn resolve(exif: &ExifData, now: DateTime<Utc>) -> Self {
        let taken = exif.date_taken.as_deref().and_then(parse_exif_datetime);
        let modified = exif.date_modified.as_deref().and_then(parse_exif_datetime);

        match (taken, modified) {
            (Some(created), Some(modified)) => Self { created, modified },
            (Some(t), None) => Self {
                created: t,
                modified: t,
            },
            (None, Some(m)) => Self {
                created: m,
                modified: m,
            },
            (None, None) => Self {
                created: now,
                modified: now,
            },
        }
    }
}
