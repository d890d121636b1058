use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::state::AppState;
use crate::utils::jwt;

/// Role allowed to use `/admin/*`.
pub const ADMIN_ROLE: &str = "admin";

/// Authenticated principal extracted from the `Authorization: Bearer <token>` header.
///
/// Add this as a handler parameter to require authentication.
/// Role checks happen via `require_admin()` in the handler body.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_uid: String,
    pub role: String,
    pub scopes: Vec<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    /// Returns `Ok(())` for admins, `Err(PermissionDenied)` otherwise.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::PermissionDenied)
        }
    }

    /// Whether the principal may act on something owned by `owner_uid`.
    pub fn can_access(&self, owner_uid: &str) -> bool {
        self.is_admin() || self.user_uid == owner_uid
    }
}

fn bearer(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(auth_header) = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(None);
    };
    auth_header
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or(AppError::TokenInvalid)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?.ok_or(AppError::TokenMissing)?;

        let claims = jwt::verify(&state.config.auth.jwt_secret, token)
            .map_err(|_| AppError::TokenInvalid)?;

        Ok(AuthUser {
            user_uid: claims.sub,
            role: claims.role,
            scopes: claims.scopes,
        })
    }
}

/// Like [`AuthUser`] but absent instead of rejected when no header is sent.
///
/// Used by routes that also accept a download token in place of a session.
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if bearer(parts)?.is_none() {
            return Ok(MaybeAuthUser(None));
        }
        AuthUser::from_request_parts(parts, state)
            .await
            .map(|user| MaybeAuthUser(Some(user)))
    }
}
