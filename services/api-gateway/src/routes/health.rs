use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

/// Liveness plus a cheap store round trip.
pub async fn get(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.totals().await {
        Ok(_) => (StatusCode::OK, Json(json!({"ok": true}))),
        Err(e) => {
            warn!(error=%e, "health check: store unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"ok": false})))
        }
    }
}
