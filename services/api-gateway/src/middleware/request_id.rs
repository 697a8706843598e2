use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Keeps a caller-supplied request id, otherwise mints one, and echoes it back.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let rid = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());
    if let Some(rid) = &rid {
        req.headers_mut().insert(REQUEST_ID_HEADER, rid.clone());
    }
    let mut res = next.run(req).await;
    if let Some(rid) = rid {
        res.headers_mut().insert(REQUEST_ID_HEADER, rid);
    }
    res
}
