use std::sync::Arc;
use std::time::Duration;

use axum::{middleware as axum_middleware, routing::get, Router};
use clap::Parser;
use forecast_core::auth::JwtAuth;
use forecast_core::clock::SystemClock;
use forecast_core::price::PgPriceSource;
use forecast_core::store::PgStore;
use forecast_core::{AdmissionController, AdmissionPolicy};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

mod auth;
mod cache;
mod error;
mod middleware;
mod openapi;
mod routes;
mod state;

use crate::cache::{redis::RedisCache, StatsCache};
use crate::middleware::rate_limit::RateLimiter;
use crate::routes::metrics::Counters;
use crate::state::AppState;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Shares the stats cache between replicas when set.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, default_value = "10")]
    max_db_connections: u32,

    #[arg(long, default_value = "600")]
    rate_limit_per_minute: u32,

    #[arg(long, default_value = "false")]
    enable_openapi: bool,

    #[arg(long, env = "FORECAST_JWT_SECRET")]
    jwt_secret: String,

    #[arg(long, env = "FORECAST_JWT_AUDIENCE")]
    jwt_audience: Option<String>,

    #[arg(long, env = "FORECAST_JWT_ISSUER")]
    jwt_issuer: Option<String>,

    #[arg(long, default_value = "5")]
    max_predictions_per_hour: u32,

    #[arg(long, default_value = "10")]
    burst_threshold: u32,

    #[arg(long, default_value = "3000")]
    price_timeout_ms: u64,

    #[arg(long, default_value = "30")]
    stats_cache_secs: u64,
}

pub(crate) fn build_router(state: AppState, limiter: RateLimiter, enable_openapi: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::get))
        .route("/metrics", get(routes::metrics::get))
        .route("/predictions", get(routes::predictions::list).post(routes::predictions::create))
        .route("/predictions/stats", get(routes::predictions::stats))
        .route("/predictions/user/:user_id", get(routes::predictions::by_user))
        .route("/predictions/:id", get(routes::predictions::get_one));

    if enable_openapi {
        app = app.route(
            "/openapi.json",
            get(|| async { axum::Json(openapi::spec::openapi_spec()) }),
        );
    }

    app.layer(axum_middleware::from_fn_with_state(limiter, middleware::rate_limit::rate_limit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(axum_middleware::from_fn(middleware::tracing::trace))
        .layer(axum_middleware::from_fn(middleware::request_id::request_id))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forecast_core::logging::init_logging("info,sqlx=warn");
    let args = Args::parse();

    let store = PgStore::connect(&args.database_url, args.max_db_connections).await?;
    store.ensure_schema().await?;
    let prices = PgPriceSource::new(store.pool().clone());
    let store = Arc::new(store);

    let policy = AdmissionPolicy {
        max_per_user: args.max_predictions_per_hour,
        burst_threshold: args.burst_threshold,
        price_timeout: Duration::from_millis(args.price_timeout_ms),
        ..AdmissionPolicy::default()
    };
    let admission =
        AdmissionController::new(store.clone(), Arc::new(prices), Arc::new(SystemClock), policy);

    let shared = args.redis_url.as_deref().map(RedisCache::new).transpose()?;
    let state = AppState {
        admission,
        store: store.clone(),
        ledger: store,
        jwt: Arc::new(JwtAuth::new(args.jwt_secret, args.jwt_audience, args.jwt_issuer)),
        stats_cache: StatsCache::new(Duration::from_secs(args.stats_cache_secs), shared),
        counters: Arc::new(Counters::default()),
    };

    let limiter = RateLimiter::new(args.rate_limit_per_minute);
    let app = build_router(state, limiter, args.enable_openapi);

    info!(bind=%args.bind, "api-gateway listening");
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
