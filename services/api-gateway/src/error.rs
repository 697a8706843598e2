use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use forecast_core::{Rejection, StoreError};
use serde::Serialize;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("internal error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(ErrBody { error: self.to_string() })).into_response()
    }
}

impl From<Rejection> for ApiError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::Invalid(msg) => ApiError::BadRequest(msg),
            r @ Rejection::Conflict => ApiError::Conflict(r.to_string()),
            r @ Rejection::RateLimited { .. } => ApiError::TooManyRequests(r.to_string()),
            Rejection::UnknownInstrument(_) => ApiError::NotFound,
            r @ Rejection::PriceUnavailable(_) => ApiError::Unavailable(r.to_string()),
            Rejection::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error=%e, "store failure");
        ApiError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_status_codes() {
        let cases = [
            (Rejection::Invalid("x".into()), StatusCode::BAD_REQUEST),
            (Rejection::Conflict, StatusCode::CONFLICT),
            (
                Rejection::RateLimited { limit: 5, window_minutes: 60 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (Rejection::UnknownInstrument("Z".into()), StatusCode::NOT_FOUND),
            (Rejection::PriceUnavailable("Z".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                Rejection::Store(StoreError::Corrupt("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (rejection, status) in cases {
            assert_eq!(ApiError::from(rejection).into_response().status(), status);
        }
    }
}
