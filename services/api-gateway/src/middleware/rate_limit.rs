use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

/// Coarse per-client request limiter in front of every route. Prediction
/// admission has its own per-user cap in the core; this one only sheds load.
#[derive(Clone)]
pub struct RateLimiter {
    // key -> (count, window_start)
    map: Arc<DashMap<String, (u32, Instant)>>,
    pub max_per_minute: u32,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self { map: Arc::new(DashMap::new()), max_per_minute }
    }

    /// Counts one request for `key`; false once the minute's budget is spent.
    pub fn check(&self, key: &str, now: Instant) -> bool {
        let window = Duration::from_secs(60);
        let mut entry = self.map.entry(key.to_string()).or_insert((0, now));
        let (count, start) = entry.value_mut();
        if now.duration_since(*start) > window {
            *count = 0;
            *start = now;
        }
        *count += 1;
        *count <= self.max_per_minute
    }
}

fn client_key(req: &Request) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("local")
        .to_string()
}

pub async fn rate_limit(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    if !limiter.check(&client_key(&req), Instant::now()) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    next.run(req).await
}
