//! On-demand renditions with an ETag-keyed disk cache.

pub mod cache;
pub mod etag;
pub mod gc;
pub mod params;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use common::storage::Library;
use imaging::{ImagingRuntime, TransformSpec, apply_transform};
use tracing::{debug, instrument, warn};

use crate::entity::image;
use crate::error::AppError;
use crate::utils::http::etag_matches;

pub use etag::transform_etag;
pub use params::{FileQuery, PermanentTransform};

pub const ORIGINAL_CACHE_CONTROL: &str = "private, max-age=86400, no-transform";
pub const TRANSFORM_CACHE_CONTROL: &str = "public, max-age=604800, no-transform";

/// What a serve produced.
#[derive(Debug)]
pub enum Served {
    NotModified {
        etag: String,
        cache_control: &'static str,
    },
    Bytes {
        bytes: Vec<u8>,
        content_type: String,
        etag: String,
        cache_control: &'static str,
        last_modified: Option<DateTime<Utc>>,
        /// Extension matching `content_type`, for download file names.
        extension: String,
    },
}

pub struct TransformEngine<'a> {
    library: &'a Library,
    imaging: &'a ImagingRuntime,
}

impl<'a> TransformEngine<'a> {
    pub fn new(library: &'a Library, imaging: &'a ImagingRuntime) -> Self {
        Self { library, imaging }
    }

    /// The original bytes. `If-None-Match` on the checksum answers 304
    /// without touching the file.
    pub async fn serve_original(
        &self,
        row: &image::Model,
        headers: &HeaderMap,
    ) -> Result<Served, AppError> {
        let etag = row.checksum.clone();
        if etag_matches(headers, &etag) {
            return Ok(Served::NotModified {
                etag,
                cache_control: ORIGINAL_CACHE_CONTROL,
            });
        }

        let meta = row.metadata();
        let path = self.library.original_path(&row.uid, &meta.file_name)?;
        let bytes = self.library.read(&path).await?;
        let content_type = mime_guess::from_path(&meta.file_name)
            .first_or_octet_stream()
            .to_string();
        Ok(Served::Bytes {
            bytes,
            content_type,
            etag,
            cache_control: ORIGINAL_CACHE_CONTROL,
            last_modified: Some(row.last_modified()),
            extension: meta.file_type,
        })
    }

    /// A rendition: 304 on a matching ETag, the cached file if present,
    /// otherwise rendered from the original and cached.
    #[instrument(skip(self, row, headers), fields(image_uid = %row.uid))]
    pub async fn serve_transform(
        &self,
        row: &image::Model,
        spec: &TransformSpec,
        headers: &HeaderMap,
    ) -> Result<Served, AppError> {
        let etag = transform_etag(&row.checksum, spec);
        if etag_matches(headers, &etag) {
            return Ok(Served::NotModified {
                etag,
                cache_control: TRANSFORM_CACHE_CONTROL,
            });
        }

        let meta = row.metadata();
        let dir = self.library.transforms_dir(&row.uid)?;

        // The output container is only known up front when requested
        // explicitly. Passthrough renditions are looked up under each
        // writable container.
        let candidates: Vec<imaging::OutputFormat> = match spec.format {
            Some(f) => vec![f],
            None => vec![
                imaging::OutputFormat::Jpeg,
                imaging::OutputFormat::Png,
                imaging::OutputFormat::Webp,
                imaging::OutputFormat::Avif,
            ],
        };
        for format in candidates {
            let name = cache::cache_file_name(&etag, format.extension());
            match cache::read(&dir, &name).await {
                Ok(Some(bytes)) => {
                    debug!(etag = %etag, "Transform cache hit");
                    return Ok(Served::Bytes {
                        bytes,
                        content_type: format.content_type().to_string(),
                        etag,
                        cache_control: TRANSFORM_CACHE_CONTROL,
                        last_modified: None,
                        extension: format.extension().to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(etag = %etag, error = %e, "Transform cache read failed"),
            }
        }

        let path = self.library.original_path(&row.uid, &meta.file_name)?;
        let original = self.library.read(&path).await?;
        let job_spec = spec.clone();
        let file_type = meta.file_type.clone();
        let encoded = self
            .imaging
            .run(move |limits| {
                let ft = (!file_type.is_empty()).then_some(file_type.as_str());
                apply_transform(&original, &job_spec, limits, ft)
            })
            .await?;

        let name = cache::cache_file_name(&etag, encoded.extension());
        if let Err(e) = cache::write(&dir, &name, &encoded.bytes).await {
            warn!(etag = %etag, error = %e, "Failed to cache transform");
        }

        Ok(Served::Bytes {
            content_type: encoded.content_type().to_string(),
            extension: encoded.extension().to_string(),
            bytes: encoded.bytes,
            etag,
            cache_control: TRANSFORM_CACHE_CONTROL,
            last_modified: None,
        })
    }

    /// Drop every cached rendition of an image.
    pub async fn purge(&self, uid: &str) -> Result<u64, AppError> {
        let dir = self.library.transforms_dir(uid)?;
        Ok(cache::clear(&dir).await?)
    }
}
