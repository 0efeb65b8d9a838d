//! Bearer token verification.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::http::headers::Headers;

/// Headers the gateway writes for backends after authenticating a request.
/// Client-supplied copies are always stripped.
pub const HEADER_USER_ID: &str = "X-User-ID";
pub const HEADER_USERNAME: &str = "X-Username";
pub const HEADER_EMAIL: &str = "X-Email";

pub const IDENTITY_HEADERS: [&str; 3] = [HEADER_USER_ID, HEADER_USERNAME, HEADER_EMAIL];

/// Claim set issued by the user service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub exp: i64,
}

/// The authenticated caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: i64,
    pub username: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingHeader,

    #[error("Invalid authorization format. Use: Bearer <token>")]
    BadFormat,

    #[error("Invalid or expired token: {0}")]
    BadSignature(String),

    #[error("Invalid or expired token: token has expired")]
    Expired,
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::BadFormat => GatewayError::BadRequest(err.to_string()),
            _ => GatewayError::Unauthenticated(err.to_string()),
        }
    }
}

/// Verifies HMAC-signed bearer tokens with a shared secret.
pub struct AuthGate {
    key: DecodingKey,
    validation: Validation,
}

impl AuthGate {
    pub fn new(secret: &str) -> Self {
        // Any HMAC variant is accepted; every other algorithm family is refused.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Extracts and verifies the bearer token in `headers`.
    pub fn authenticate(&self, headers: &Headers) -> Result<Identity, AuthError> {
        let header = headers
            .get("Authorization")
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingHeader)?;

        let token = header.strip_prefix("Bearer ").ok_or(AuthError::BadFormat)?;

        self.verify(token)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidAlgorithm => {
                AuthError::BadSignature("unexpected signing method".to_string())
            }
            _ => AuthError::BadSignature(e.to_string()),
        })?;

        let claims = data.claims;

        // `exp` must lie strictly in the future.
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AuthError::BadSignature("invalid exp claim".to_string()))?;
        if expires_at <= Utc::now() {
            return Err(AuthError::Expired);
        }

        Ok(Identity {
            subject_id: claims.user_id,
            username: claims.username,
            email: claims.email,
            expires_at,
        })
    }
}
