use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// JWT claims of an authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User UID.
    pub sub: String,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: usize,
}

/// Sign a token for a principal, valid for `ttl`.
pub fn sign(
    secret: &str,
    user_uid: &str,
    role: &str,
    scopes: &[String],
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (Utc::now() + ttl).timestamp().max(0);

    let claims = Claims {
        sub: user_uid.to_owned(),
        role: role.to_owned(),
        scopes: scopes.to_vec(),
        exp: expiration as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify and decode a token.
pub fn verify(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let token = sign("s3cret", "user1", "admin", &["images:write".into()], Duration::hours(1))
            .unwrap();
        let claims = verify("s3cret", &token).unwrap();
        assert_eq!(claims.sub, "user1");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.scopes, vec!["images:write".to_string()]);
    }

    #[test]
    fn wrong_secret_or_expired_is_rejected() {
        let token = sign("a", "u", "user", &[], Duration::hours(1)).unwrap();
        assert!(verify("b", &token).is_err());

        let expired = sign("a", "u", "user", &[], Duration::hours(-2)).unwrap();
        assert!(verify("a", &expired).is_err());
    }
}
