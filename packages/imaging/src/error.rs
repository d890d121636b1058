use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagingError {
    /// Neither the generic decoder nor the RAW loader accepted the bytes.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode {format}: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to read EXIF: {0}")]
    Exif(String),

    #[error("Imaging runtime is shut down")]
    Closed,

    #[error("Imaging task failed: {0}")]
    Task(String),
}

impl ImagingError {
    pub(crate) fn encode(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Encode {
            format,
            message: err.to_string(),
        }
    }
}
