use std::collections::HashSet;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use tracing::{debug, warn};

use crate::entity::download_token;
use crate::error::AppError;
use crate::utils::hash::{hash_password, verify_password};
use crate::utils::http::{embedding_hosts, normalize_host};

/// Length of a token in hex characters.
pub const TOKEN_LEN: usize = 64;

/// Accepted clock skew when checking `created_at`.
const CREATED_AT_SKEW_SECS: i64 = 60;

/// Options for minting a token.
#[derive(Debug, Clone)]
pub struct TokenOptions {
    pub image_uids: Vec<String>,
    /// Lifetime in seconds. `None` never expires.
    pub expires_in: Option<i64>,
    pub password: Option<String>,
    pub allow_download: bool,
    pub allow_embed: bool,
    pub show_metadata: bool,
    pub description: Option<String>,
    pub created_by: String,
}

impl TokenOptions {
    pub fn new(image_uids: Vec<String>, created_by: impl Into<String>) -> Self {
        Self {
            image_uids,
            expires_in: None,
            password: None,
            allow_download: true,
            allow_embed: false,
            show_metadata: true,
            description: None,
            created_by: created_by.into(),
        }
    }
}

/// A token that passed validation.
#[derive(Debug, Clone)]
pub struct ValidToken {
    pub token: String,
    pub image_uids: Vec<String>,
    pub allow_download: bool,
    pub allow_embed: bool,
    pub show_metadata: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ValidToken {
    pub fn authorizes(&self, uid: &str) -> bool {
        self.image_uids.iter().any(|u| u == uid)
    }
}

/// Every way looking up a token can end.
#[derive(Debug)]
pub enum TokenOutcome {
    Valid(ValidToken),
    /// Past `expires_at`. The row has been removed.
    Expired,
    Missing,
    /// Not shaped like a token at all.
    BadSignature,
    /// Password protected and the password was absent or wrong.
    BadPassword,
    /// Created in the future beyond clock skew.
    NotYet,
    /// The stored uid list is unreadable or empty.
    InvalidClaims,
    /// Stored password hash is in a format this server cannot verify.
    Unsupported,
}

impl TokenOutcome {
    /// The one place token outcomes become HTTP errors.
    pub fn into_result(self) -> Result<ValidToken, AppError> {
        match self {
            TokenOutcome::Valid(token) => Ok(token),
            TokenOutcome::BadPassword => Err(AppError::PasswordRequired),
            TokenOutcome::Unsupported => {
                Err(AppError::Internal("download token hash unsupported".into()))
            }
            TokenOutcome::Expired
            | TokenOutcome::Missing
            | TokenOutcome::BadSignature
            | TokenOutcome::NotYet
            | TokenOutcome::InvalidClaims => Err(AppError::TokenInvalid),
        }
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

pub fn looks_like_token(s: &str) -> bool {
    s.len() == TOKEN_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Store a new token. `expires_in` must be positive when given.
pub async fn create<C: ConnectionTrait>(
    db: &C,
    opts: TokenOptions,
) -> Result<download_token::Model, AppError> {
    if opts.image_uids.is_empty() {
        return Err(AppError::Validation("uids must not be empty".into()));
    }
    let now = Utc::now();
    let expires_at = match opts.expires_in {
        Some(secs) if secs <= 0 => {
            return Err(AppError::Validation("expires_in must be positive".into()));
        }
        Some(secs) => Some(now + Duration::seconds(secs)),
        None => None,
    };
    let password_hash = match opts.password.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => Some(
            hash_password(p).map_err(|e| AppError::Internal(format!("password hash: {e}")))?,
        ),
        None => None,
    };

    let mut uids = opts.image_uids;
    let mut seen = HashSet::new();
    uids.retain(|u| seen.insert(u.clone()));

    let row = download_token::ActiveModel {
        uid: Set(generate_token()),
        image_uids: Set(serde_json::json!(uids)),
        allow_download: Set(opts.allow_download),
        allow_embed: Set(opts.allow_embed),
        show_metadata: Set(opts.show_metadata),
        password_hash: Set(password_hash),
        description: Set(opts.description.filter(|d| !d.trim().is_empty())),
        created_by: Set(opts.created_by),
        created_at: Set(now),
        expires_at: Set(expires_at),
    }
    .insert(db)
    .await?;
    debug!(uids = uids.len(), expires_at = ?expires_at, "Download token created");
    Ok(row)
}

/// Look a token up and check its lifetime and password.
pub async fn validate<C: ConnectionTrait>(
    db: &C,
    token: &str,
    password: Option<&str>,
) -> Result<TokenOutcome, DbErr> {
    if !looks_like_token(token) {
        return Ok(TokenOutcome::BadSignature);
    }
    let Some(row) = download_token::Entity::find_by_id(token.to_ascii_lowercase())
        .one(db)
        .await?
    else {
        return Ok(TokenOutcome::Missing);
    };

    let now = Utc::now();
    if row.expires_at.is_some_and(|at| at <= now) {
        download_token::Entity::delete_by_id(row.uid.clone())
            .exec(db)
            .await?;
        debug!("Expired download token removed on access");
        return Ok(TokenOutcome::Expired);
    }
    Ok(check_row(row, password, now))
}

fn check_row(row: download_token::Model, password: Option<&str>, now: DateTime<Utc>) -> TokenOutcome {
    if row.created_at > now + Duration::seconds(CREATED_AT_SKEW_SECS) {
        return TokenOutcome::NotYet;
    }

    let Ok(image_uids) = serde_json::from_value::<Vec<String>>(row.image_uids.clone()) else {
        return TokenOutcome::InvalidClaims;
    };
    if image_uids.is_empty() {
        return TokenOutcome::InvalidClaims;
    }

    if let Some(hash) = &row.password_hash {
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            return TokenOutcome::BadPassword;
        };
        match verify_password(password, hash) {
            Ok(true) => {}
            Ok(false) => return TokenOutcome::BadPassword,
            Err(e) => {
                warn!(error = %e, "Stored download token hash is unreadable");
                return TokenOutcome::Unsupported;
            }
        }
    }

    TokenOutcome::Valid(ValidToken {
        token: row.uid,
        image_uids,
        allow_download: row.allow_download,
        allow_embed: row.allow_embed,
        show_metadata: row.show_metadata,
        expires_at: row.expires_at,
    })
}

/// Reject requests embedded by another site unless the token allows it.
/// Requests without `Referer`/`Origin` always pass.
pub fn check_embed(token: &ValidToken, headers: &HeaderMap, own_host: &str) -> Result<(), AppError> {
    if token.allow_embed {
        return Ok(());
    }
    let own_host = normalize_host(own_host);
    if embedding_hosts(headers)
        .iter()
        .any(|h| own_host.as_deref() != Some(h.as_str()))
    {
        return Err(AppError::PermissionDenied);
    }
    Ok(())
}

/// The uids a bulk request may fetch. Empty means every authorized uid;
/// anything outside the token rejects the whole request.
pub fn authorize_subset(token: &ValidToken, requested: &[String]) -> Result<Vec<String>, AppError> {
    if requested.is_empty() {
        return Ok(token.image_uids.clone());
    }
    if requested.iter().all(|uid| token.authorizes(uid)) {
        let mut seen = HashSet::new();
        Ok(requested
            .iter()
            .filter(|u| seen.insert(u.as_str()))
            .cloned()
            .collect())
    } else {
        Err(AppError::TokenInvalid)
    }
}

/// Delete every token past its expiry.
pub async fn sweep_expired<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    let res = download_token::Entity::delete_many()
        .filter(download_token::Column::ExpiresAt.is_not_null())
        .filter(download_token::Column::ExpiresAt.lte(Utc::now()))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};
    use serde_json::json;

    fn row(uids: serde_json::Value, password_hash: Option<String>) -> download_token::Model {
        download_token::Model {
            uid: generate_token(),
            image_uids: uids,
            allow_download: true,
            allow_embed: false,
            show_metadata: true,
            password_hash,
            description: None,
            created_by: "u".into(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    fn valid(uids: &[&str], allow_embed: bool) -> ValidToken {
        ValidToken {
            token: generate_token(),
            image_uids: uids.iter().map(|s| s.to_string()).collect(),
            allow_download: true,
            allow_embed,
            show_metadata: true,
            expires_at: None,
        }
    }

    #[test]
    fn tokens_are_64_hex_chars() {
        let t = generate_token();
        assert!(looks_like_token(&t));
        assert_ne!(t, generate_token());
        assert!(!looks_like_token("abc"));
        assert!(!looks_like_token(&"z".repeat(64)));
    }

    #[test]
    fn password_outcomes() {
        let hash = hash_password("p").unwrap();
        let r = row(json!(["a"]), Some(hash));
        assert!(matches!(check_row(r.clone(), None, Utc::now()), TokenOutcome::BadPassword));
        assert!(matches!(check_row(r.clone(), Some(""), Utc::now()), TokenOutcome::BadPassword));
        assert!(matches!(check_row(r.clone(), Some("q"), Utc::now()), TokenOutcome::BadPassword));
        assert!(matches!(check_row(r, Some("p"), Utc::now()), TokenOutcome::Valid(_)));

        let broken = row(json!(["a"]), Some("plaintext".into()));
        assert!(matches!(check_row(broken, Some("p"), Utc::now()), TokenOutcome::Unsupported));
    }

    #[test]
    fn malformed_claims_and_clock() {
        assert!(matches!(
            check_row(row(json!([]), None), None, Utc::now()),
            TokenOutcome::InvalidClaims
        ));
        assert!(matches!(
            check_row(row(json!({"a": 1}), None), None, Utc::now()),
            TokenOutcome::InvalidClaims
        ));
        let mut future = row(json!(["a"]), None);
        future.created_at = Utc::now() + Duration::hours(1);
        assert!(matches!(check_row(future, None, Utc::now()), TokenOutcome::NotYet));
    }

    #[test]
    fn outcomes_map_to_http_errors() {
        assert!(matches!(
            TokenOutcome::BadPassword.into_result(),
            Err(AppError::PasswordRequired)
        ));
        assert!(matches!(TokenOutcome::Missing.into_result(), Err(AppError::TokenInvalid)));
        assert!(matches!(TokenOutcome::Expired.into_result(), Err(AppError::TokenInvalid)));
    }

    #[test]
    fn subset_rule() {
        let t = valid(&["A", "B"], false);
        assert_eq!(authorize_subset(&t, &[]).unwrap(), vec!["A", "B"]);
        assert_eq!(authorize_subset(&t, &["A".into(), "A".into()]).unwrap(), vec!["A"]);
        assert!(matches!(
            authorize_subset(&t, &["A".into(), "C".into()]),
            Err(AppError::TokenInvalid)
        ));
    }

    #[test]
    fn embed_policy() {
        let strict = valid(&["A"], false);
        let mut headers = HeaderMap::new();
        assert!(check_embed(&strict, &headers, "photos.example").is_ok());

        headers.insert(header::REFERER, HeaderValue::from_static("https://photos.example/x"));
        assert!(check_embed(&strict, &headers, "Photos.Example").is_ok());

        headers.insert(header::ORIGIN, HeaderValue::from_static("https://evil.example"));
        assert!(matches!(
            check_embed(&strict, &headers, "photos.example"),
            Err(AppError::PermissionDenied)
        ));
        assert!(check_embed(&valid(&["A"], true), &headers, "photos.example").is_ok());
    }

    #[test]
    fn embed_policy_ignores_default_ports() {
        let strict = valid(&["A"], false);
        let mut headers = HeaderMap::new();
        headers.insert(header::REFERER, HeaderValue::from_static("https://photos.example:443/x"));
        assert!(check_embed(&strict, &headers, "photos.example").is_ok());

        headers.insert(header::REFERER, HeaderValue::from_static("http://photos.example:80/x"));
        assert!(check_embed(&strict, &headers, "photos.example:443").is_ok());

        headers.insert(header::REFERER, HeaderValue::from_static("http://photos.example:8080/x"));
        assert!(matches!(
            check_embed(&strict, &headers, "photos.example"),
            Err(AppError::PermissionDenied)
        ));
    }
}
