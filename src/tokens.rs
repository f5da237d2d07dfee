//! Bearer credential codec.
//!
//! Mirrors the shape of `server::auth::JwtValidator` in the licensing
//! server this crate grew out of, generalized to the two claim shapes a
//! token can carry: a user token and a license token, distinguished by
//! which claim key is present rather than a fixed `sub`/`scope` pair.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// User token claims: `{user_id, username, email, iat, exp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// License token claims: `{tenant_id, tenant_name, license_id, max_apps,
/// max_executions_per_24h, valid_from, valid_to, status, iat, exp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseClaims {
    pub tenant_id: String,
    pub tenant_name: String,
    pub license_id: String,
    pub max_apps: i64,
    pub max_executions_per_24h: i64,
    pub valid_from: i64,
    pub valid_to: i64,
    pub status: String,
    pub iat: i64,
    pub exp: i64,
}

/// The two claim shapes a verified token can carry. `serde(untagged)` lets
/// one decode try both shapes; which one matched is what the Identity
/// Resolver branches on, the same way the Python original inspects
/// whether `user_id` or `tenant_id` is present in the decoded payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Claims {
    User(UserClaims),
    License(LicenseClaims),
}

impl Claims {
    pub fn exp(&self) -> i64 {
        match self {
            Claims::User(c) => c.exp,
            Claims::License(c) => c.exp,
        }
    }
}

/// Signs and verifies bearer credentials with a single configured HMAC
/// algorithm, exactly as `JwtValidator` does for the license-activation
/// server, minus the scope/issuer/audience fields this service's claims
/// don't carry.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiration_secs: i64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("expiration_secs", &self.expiration_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str, expiration_secs: i64) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiration_secs,
        }
    }

    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(jsonwebtoken::Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Malformed(e.to_string()))
    }

    /// `verify(token) → claims | ExpiredToken | MalformedToken`.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                other => TokenError::Malformed(other.to_string()),
            }
        })?;
        Ok(data.claims)
    }

    pub fn sign_user(&self, user_id: &str, username: &str, email: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims::User(UserClaims {
            user_id: user_id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.expiration_secs,
        });
        self.sign(&claims)
    }

    pub fn sign_license(&self, license: &crate::models::License, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims::License(LicenseClaims {
            tenant_id: license.tenant_id.clone(),
            tenant_name: license.tenant_name.clone(),
            license_id: license.id.clone(),
            max_apps: license.max_apps,
            max_executions_per_24h: license.max_executions_per_24h,
            valid_from: license.valid_from.timestamp(),
            valid_to: license.valid_to.timestamp(),
            status: license.status.as_str().to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.expiration_secs,
        });
        self.sign(&claims)
    }
}
