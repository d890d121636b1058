use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use imaging::ImagingError;
use sea_orm::DbErr;
use serde::Serialize;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `TOKEN_MISSING`,
    /// `TOKEN_INVALID`, `PASSWORD_REQUIRED`, `PERMISSION_DENIED`, `NOT_FOUND`,
    /// `CONFLICT`, `QUOTA_EXCEEDED`, `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "quality must be between 0 and 100")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    TokenMissing,
    TokenInvalid,
    /// Download token is password protected and the password was missing or wrong.
    PasswordRequired,
    /// Authenticated but not allowed: role, embed policy, disabled downloads.
    PermissionDenied,
    NotFound(String),
    Conflict(String),
    QuotaExceeded(String),
    Internal(String),
}

impl AppError {
    pub(crate) fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::TokenMissing => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_MISSING",
                    message: "Authentication required".into(),
                },
            ),
            AppError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_INVALID",
                    message: "Invalid or expired token".into(),
                },
            ),
            AppError::PasswordRequired => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "PASSWORD_REQUIRED",
                    message: "Password required or invalid".into(),
                },
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    code: "PERMISSION_DENIED",
                    message: "Insufficient permissions".into(),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::QuotaExceeded(msg) => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    code: "QUOTA_EXCEEDED",
                    message: msg,
                },
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::InvalidUid(_) => {
                AppError::NotFound("Image not found".into())
            }
            StorageError::InvalidChecksum(msg) => AppError::Validation(msg),
            StorageError::SizeLimitExceeded { .. } => AppError::Validation(err.to_string()),
            StorageError::AlreadyExists(what) => {
                AppError::Conflict(format!("Already exists: {what}"))
            }
            StorageError::Io(e) => AppError::Internal(format!("Storage I/O error: {e}")),
        }
    }
}

impl From<ImagingError> for AppError {
    fn from(err: ImagingError) -> Self {
        match err {
            ImagingError::InvalidParameter(msg) => AppError::Validation(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: AppError) -> StatusCode {
        err.status_and_body().0
    }

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(status(AppError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(AppError::PasswordRequired), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AppError::PermissionDenied), StatusCode::FORBIDDEN);
        assert_eq!(
            status(AppError::QuotaExceeded("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(AppError::Internal("secret".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let (_, body) = AppError::Internal("db password leaked".into()).status_and_body();
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert!(!body.message.contains("password"));
    }

    #[test]
    fn library_errors_map_onto_taxonomy() {
        let missing = AppError::from(StorageError::NotFound("x".into()));
        assert!(matches!(missing, AppError::NotFound(_)));

        let bad_param = AppError::from(ImagingError::InvalidParameter("w".into()));
        assert!(matches!(bad_param, AppError::Validation(_)));

        let decode = AppError::from(ImagingError::Decode("garbage".into()));
        assert!(matches!(decode, AppError::Internal(_)));
    }
}
