use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use clap::Parser;
use forecast_core::auth::JwtAuth;
use tracing::{info, warn};

mod pubsub;
mod relay;
mod throttling;
mod ws;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "0.0.0.0:8090")]
    bind: String,

    #[arg(long, env = "REDIS_URL")]
    redis_url: String,

    /// Same secret the gateway verifies with; sockets are bound to the token's user.
    #[arg(long, env = "FORECAST_JWT_SECRET")]
    jwt_secret: String,

    #[arg(long, env = "FORECAST_JWT_AUDIENCE")]
    jwt_audience: Option<String>,

    #[arg(long, env = "FORECAST_JWT_ISSUER")]
    jwt_issuer: Option<String>,
}

pub(crate) fn build_router(state: ws::AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(|| async { axum::Json(serde_json::json!({"ok": true})) }))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forecast_core::logging::init_logging("info");
    let args = Args::parse();

    let hub = pubsub::Hub::new();
    let relay_hub = hub.clone();
    let redis_url = args.redis_url.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = relay::run(&redis_url, relay_hub.clone()).await {
                warn!(error=%e, "outcome relay stopped, reconnecting");
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    });

    let jwt = Arc::new(JwtAuth::new(args.jwt_secret, args.jwt_audience, args.jwt_issuer));
    let app = build_router(ws::AppState { hub, jwt });

    info!(bind=%args.bind, "realtime listening");
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
