//! Bearer-token authentication extractor.
//!
//! Mirrors `AuthenticatedUser`'s `FromRequestParts` impl from the
//! licensing server's JWT middleware: pull the `Authorization: Bearer`
//! header, verify it, resolve it to a principal, and hand the handler a
//! ready-to-use value instead of raw claims.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::models::Principal;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::state::AppState;

pub struct AuthenticatedPrincipal(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = match parts.headers.get(axum::http::header::AUTHORIZATION) {
            Some(header) => {
                let header = header.to_str().map_err(|_| ApiError::new(ErrorCode::InvalidToken))?;
                header
                    .strip_prefix("Bearer ")
                    .ok_or_else(|| ApiError::new(ErrorCode::InvalidToken))?
                    .to_string()
            }
            None => parts
                .headers
                .get("x-license-token")
                .ok_or_else(|| ApiError::new(ErrorCode::MissingToken))?
                .to_str()
                .map_err(|_| ApiError::new(ErrorCode::InvalidToken))?
                .to_string(),
        };

        let claims = state.tokens.verify(&token).map_err(|err| match err {
            crate::tokens::TokenError::Expired => ApiError::new(ErrorCode::TokenExpired),
            crate::tokens::TokenError::Malformed(msg) => {
                ApiError::with_message(ErrorCode::InvalidToken, msg)
            }
        })?;

        let principal = state.identity.resolve(claims).await?;
        Ok(AuthenticatedPrincipal(principal))
    }
}

/// Shared-secret guard for the license-CRUD admin surface, checked
/// against `X-Admin-Token`. Modeled on the bootstrap-token posture: a
/// single pre-shared secret rather than a scoped token table, and
/// absent configuration disables the surface outright instead of
/// falling open.
pub struct AdminPrincipal;

#[async_trait]
impl FromRequestParts<AppState> for AdminPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let configured = state
            .admin_token
            .as_deref()
            .ok_or_else(|| ApiError::with_message(ErrorCode::Forbidden, "admin surface is disabled"))?;

        let provided = parts
            .headers
            .get("x-admin-token")
            .ok_or_else(|| ApiError::new(ErrorCode::MissingToken))?
            .to_str()
            .map_err(|_| ApiError::new(ErrorCode::InvalidToken))?;

        if provided != configured {
            return Err(ApiError::new(ErrorCode::InvalidToken));
        }
        Ok(AdminPrincipal)
    }
}
