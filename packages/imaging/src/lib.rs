//! Image pipeline primitives.
//!
//! | Step | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader`, `avif-parse` + `rav1d` for AVIF/HEIF, falling back to `rawloader` for camera RAW |
//! | **Autorotate** | EXIF orientation via `DynamicImage::apply_orientation` |
//! | **Normalize** | ICC profile to sRGB through `qcms` (perceptual intent) |
//! | **Scale** | proportional fit, `image::imageops` filters plus a convolution resampler for Mitchell, Lanczos2 and MKS |
//! | **Encode** | JPEG, PNG, WebP (`webp`, lossy below q100), AVIF (rav1e) |
//! | **Thumbhash** | `thumbhash::rgba_to_thumb_hash` on a 32×32 source |
//! | **EXIF** | `kamadak-exif` |
//! | **XMP** | packet scan + tag extraction, RDF/XML sidecar writer |
//!
//! Everything here is synchronous and CPU bound. Async callers go through
//! [`ImagingRuntime::run`], which bounds concurrency and moves the work to
//! the blocking pool.

mod avif;
pub mod color;
pub mod decode;
pub mod encode;
pub mod error;
pub mod exif;
mod raw;
mod resample;
pub mod runtime;
pub mod thumbnail;
pub mod transform;
pub mod xmp;

pub use decode::{Decoded, SourceFormat, decode, probe_dimensions};
pub use encode::{Encoded, OutputFormat, encode};
pub use error::ImagingError;
pub use runtime::{ImagingConfig, ImagingRuntime};
pub use transform::{Flip, Kernel, Rotation, TransformSpec, apply_transform};
