use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, info_span, Instrument};

use super::request_id::REQUEST_ID_HEADER;

pub async fn trace(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().path().to_string();
    let rid = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let span = info_span!("http", %method, %uri, request_id=%rid);
    async move {
        let started = std::time::Instant::now();
        let res = next.run(req).await;
        info!(
            status = res.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );
        res
    }
    .instrument(span)
    .await
}
