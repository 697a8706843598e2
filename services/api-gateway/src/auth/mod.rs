use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use forecast_core::auth::bearer;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    bearer(headers.get(header::AUTHORIZATION)?.to_str().ok()?)
}

/// Caller identity taken from the bearer token's `sub` claim.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let sub = state.jwt.subject(token).map_err(|e| {
            debug!(error=%e, "rejected bearer token");
            ApiError::Unauthorized
        })?;
        Ok(AuthUser(sub))
    }
}
