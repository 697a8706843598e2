use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::IntoResponse;
use forecast_core::auth::{bearer, JwtAuth};
use forecast_core::events::user_topic;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::pubsub::Hub;
use crate::throttling::Throttle;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub jwt: Arc<JwtAuth>,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// User id from the bearer token, sent either as an `Authorization` header
/// or as `?token=` for browser clients that cannot set headers on upgrade.
#[derive(Debug, Clone)]
pub struct WsUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for WsUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer)
            .map(str::to_string);
        let token = match from_header {
            Some(t) => t,
            None => Query::<WsParams>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(p)| p.token)
                .ok_or(StatusCode::UNAUTHORIZED)?,
        };
        let sub = state.jwt.subject(&token).map_err(|e| {
            debug!(error=%e, "websocket token rejected");
            StatusCode::UNAUTHORIZED
        })?;
        Ok(WsUser(sub))
    }
}

pub async fn ws_handler(
    State(state): State<AppState>,
    WsUser(user_id): WsUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, user_id, socket))
}

/// Parses `{"subscribe":"<userId>"}` into the user's topic.
pub fn subscription_topic(text: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let user_id = v.get("subscribe")?.as_str()?.trim();
    (!user_id.is_empty()).then(|| user_topic(user_id))
}

/// Topic for a subscribe message from `user_id`, or the error to send back.
/// Clients may only follow their own outcomes.
pub fn authorize(text: &str, user_id: &str) -> Result<String, &'static str> {
    let topic = subscription_topic(text).ok_or(r#"{"error":"expected subscribe"}"#)?;
    if topic != user_topic(user_id) {
        return Err(r#"{"error":"forbidden"}"#);
    }
    Ok(topic)
}

async fn handle_socket(state: AppState, user_id: String, mut socket: WebSocket) {
    let throttle = Throttle::new(Duration::from_millis(50));

    // first message must be the subscription
    let mut rx: broadcast::Receiver<String> = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(t))) => match authorize(&t, &user_id) {
                Ok(topic) => {
                    info!(%topic, "subscribed");
                    let rx = state.hub.subscribe(&topic);
                    if socket.send(Message::Text(r#"{"ok":true}"#.into())).await.is_err() {
                        return;
                    }
                    break rx;
                }
                Err(reply) => {
                    debug!(%user_id, "subscription refused");
                    let _ = socket.send(Message::Text(reply.into())).await;
                }
            },
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => {}
        }
    };

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            event = rx.recv() => match event {
                Ok(m) => {
                    throttle.wait().await;
                    if socket.send(Message::Text(m)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "slow subscriber, events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("socket closed");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    const SECRET: &str = "ws-secret";

    fn state() -> AppState {
        AppState { hub: Hub::new(), jwt: Arc::new(JwtAuth::new(SECRET, None, None)) }
    }

    async fn status_of(uri: &str, auth: Option<String>) -> StatusCode {
        let mut req = Request::builder().uri(uri);
        if let Some(value) = auth {
            req = req.header(header::AUTHORIZATION, value);
        }
        let res = crate::build_router(state())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        res.status()
    }

    #[test]
    fn subscribe_message_maps_to_user_topic() {
        assert_eq!(subscription_topic(r#"{"subscribe":"u42"}"#).as_deref(), Some("user:u42"));
        assert_eq!(subscription_topic(r#"{"subscribe":"  "}"#), None);
        assert_eq!(subscription_topic(r#"{"subscribe":7}"#), None);
        assert_eq!(subscription_topic("not json"), None);
    }

    #[test]
    fn only_the_token_owner_topic_is_allowed() {
        assert_eq!(authorize(r#"{"subscribe":"u42"}"#, "u42").as_deref(), Ok("user:u42"));
        assert_eq!(authorize(r#"{"subscribe":"victim"}"#, "u42"), Err(r#"{"error":"forbidden"}"#));
        assert!(authorize("hello", "u42").is_err());
    }

    #[tokio::test]
    async fn upgrade_without_a_valid_token_is_401() {
        assert_eq!(status_of("/ws", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("/ws?token=garbage", None).await, StatusCode::UNAUTHORIZED);

        let foreign = JwtAuth::new("other", None, None).issue("u1", 60).unwrap();
        let value = format!("Bearer {foreign}");
        assert_eq!(status_of("/ws", Some(value)).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_reaches_the_upgrade() {
        let token = JwtAuth::new(SECRET, None, None).issue("u1", 60).unwrap();
        // a plain GET is not an upgrade, but it must get past authentication
        let by_query = status_of(&format!("/ws?token={token}"), None).await;
        assert_ne!(by_query, StatusCode::UNAUTHORIZED);
        let by_header = status_of("/ws", Some(format!("Bearer {token}"))).await;
        assert_ne!(by_header, StatusCode::UNAUTHORIZED);
    }
}
