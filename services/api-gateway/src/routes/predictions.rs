use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use forecast_core::model::{Prediction, PredictionFilter, PredictionPayload, UserStanding};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

const TOP_PREDICTORS: usize = 10;

pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<PredictionPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.counters.submitted();
    let Json(payload) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    match state.admission.submit(&user_id, &payload).await {
        Ok(prediction) => {
            state.counters.accepted(prediction.flagged);
            Ok((StatusCode::CREATED, Json(prediction)))
        }
        Err(rejection) => {
            debug!(%user_id, %rejection, "prediction rejected");
            state.counters.rejected(&rejection);
            Err(rejection.into())
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<PredictionFilter>,
) -> Result<Json<Vec<Prediction>>, ApiError> {
    Ok(Json(state.store.list(&filter).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Prediction>, ApiError> {
    state.store.get(id).await?.map(Json).ok_or(ApiError::NotFound)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserStats {
    total: u64,
    evaluated: u64,
    correct: u64,
    accuracy: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPredictions {
    predictions: Vec<Prediction>,
    stats: UserStats,
    reputation: UserStanding,
}

/// Most recent page of one user's predictions, totals over all of them and
/// the user's ledger standing.
pub async fn by_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserPredictions>, ApiError> {
    let predictions = state.store.list(&PredictionFilter::for_user(&user_id)).await?;
    let totals = state.store.totals_for_user(&user_id).await?;
    let reputation = state.ledger.standing(&user_id).await?;
    Ok(Json(UserPredictions {
        predictions,
        stats: UserStats {
            total: totals.total,
            evaluated: totals.evaluated,
            correct: totals.correct,
            accuracy: totals.accuracy(),
        },
        reputation,
    }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(cached) = state.stats_cache.get().await {
        return Ok(Json(cached));
    }
    let totals = state.store.totals().await?;
    let top = state.ledger.top(TOP_PREDICTORS).await?;
    let top: Vec<_> = top
        .iter()
        .map(|s| {
            json!({
                "userId": s.user_id,
                "totalPredictions": s.total_predictions,
                "accuratePredictions": s.accurate_predictions,
                "reputationScore": s.reputation_score,
                "accuracy": s.accuracy(),
            })
        })
        .collect();
    let doc = json!({
        "totalPredictions": totals.total,
        "evaluatedPredictions": totals.evaluated,
        "correctPredictions": totals.correct,
        "accuracy": totals.accuracy(),
        "topPredictors": top,
    });
    state.stats_cache.put(&doc).await;
    Ok(Json(doc))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use axum::Router;
    use chrono::Utc;
    use forecast_core::auth::JwtAuth;
    use forecast_core::clock::SystemClock;
    use forecast_core::model::{Direction, Forecast, PredictionDraft, Timeframe, ValidatedPayload};
    use forecast_core::price::StaticPriceSource;
    use forecast_core::store::{
        MemoryLedger, MemoryStore, PredictionStore, ReputationLedger, ScoreChange,
    };
    use forecast_core::{AdmissionController, AdmissionPolicy};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::StatsCache;
    use crate::middleware::rate_limit::RateLimiter;
    use crate::routes::metrics::Counters;
    use crate::state::AppState;

    const SECRET: &str = "test-secret";

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        ledger: Arc<MemoryLedger>,
        prices: StaticPriceSource,
    }

    impl TestApp {
        async fn send(
            &self,
            method: Method,
            uri: &str,
            user: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(user) = user {
                let token = JwtAuth::new(SECRET, None, None).issue(user, 3600).unwrap();
                req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let req = match body {
                Some(b) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(b.to_string())),
                None => req.body(Body::empty()),
            }
            .unwrap();
            let res = self.router.clone().oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }

        async fn post(&self, user: &str, body: Value) -> (StatusCode, Value) {
            self.send(Method::POST, "/predictions", Some(user), Some(body)).await
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Method::GET, uri, None, None).await
        }
    }

    fn app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let prices = StaticPriceSource::with_prices([("AAPL", 190.0), ("TSLA", 250.0)]);
        let admission = AdmissionController::new(
            store.clone(),
            Arc::new(prices.clone()),
            Arc::new(SystemClock),
            AdmissionPolicy::default(),
        );
        let state = AppState {
            admission,
            store: store.clone(),
            ledger: ledger.clone(),
            jwt: Arc::new(JwtAuth::new(SECRET, None, None)),
            stats_cache: StatsCache::new(Duration::from_secs(30), None),
            counters: Arc::new(Counters::default()),
        };
        let router = crate::build_router(state, RateLimiter::new(10_000), false);
        TestApp { router, store, ledger, prices }
    }

    fn up(instrument: &str) -> Value {
        json!({
            "instrumentId": instrument,
            "kind": "direction",
            "direction": "up",
            "timeframe": "1d",
        })
    }

    #[tokio::test]
    async fn create_requires_a_bearer_token() {
        let app = app();
        let (status, _) = app.send(Method::POST, "/predictions", None, Some(up("AAPL"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_returns_the_stored_prediction() {
        let app = app();
        let (status, body) = app.post("alice", up("AAPL")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["userId"], "alice");
        assert_eq!(body["instrumentId"], "AAPL");
        assert_eq!(body["initialPrice"], 190.0);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["kind"], "direction");

        let id = body["id"].as_str().unwrap().to_string();
        let (status, fetched) = app.get(&format!("/predictions/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], id.as_str());
    }

    #[tokio::test]
    async fn rejections_surface_as_status_codes() {
        let app = app();
        let bad = json!({"instrumentId": "AAPL", "kind": "price", "timeframe": "1d"});
        let (status, body) = app.post("bob", bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = app.post("bob", up("NOPE")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        app.post("bob", up("TSLA")).await;
        let (status, _) = app.post("bob", up("TSLA")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        app.prices.set("TSLA", -1.0);
        let (status, _) = app.post("carol", up("TSLA")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn sixth_submission_in_an_hour_is_429() {
        let app = app();
        for i in 0..5 {
            let instrument = format!("S{i}");
            app.prices.set(&instrument, 10.0);
            let (status, _) = app.post("dave", up(&instrument)).await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, _) = app.post("dave", up("AAPL")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn list_filters_and_user_view_reports_stats() {
        let app = app();
        app.post("erin", up("AAPL")).await;
        app.post("erin", up("TSLA")).await;
        app.post("frank", up("AAPL")).await;

        let (status, body) = app.get("/predictions?instrumentId=AAPL").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = app.get("/predictions?userId=erin&evaluated=false").await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = app.get("/predictions/user/erin").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions"].as_array().unwrap().len(), 2);
        assert_eq!(body["stats"]["total"], 2);
        assert_eq!(body["stats"]["evaluated"], 0);
        assert_eq!(body["stats"]["accuracy"], 0.0);
    }

    #[tokio::test]
    async fn user_stats_cover_more_than_one_page() {
        let app = app();
        let now = Utc::now();
        for i in 0..150 {
            let payload = ValidatedPayload {
                instrument_id: format!("SYM{i}"),
                forecast: Forecast::Direction { direction: Direction::Up },
                timeframe: Timeframe::OneDay,
                reasoning: None,
            };
            let draft = PredictionDraft::new("heavy", payload, 10.0, now);
            let p = app.store.create(draft).await.unwrap();
            if i < 120 {
                let at = now + chrono::Duration::days(1);
                app.store.commit_evaluation(p.id, 11.0, i % 2 == 0, at).await.unwrap();
            }
        }

        let (status, body) = app.get("/predictions/user/heavy").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions"].as_array().unwrap().len(), 100);
        assert_eq!(body["stats"]["total"], 150);
        assert_eq!(body["stats"]["evaluated"], 120);
        assert_eq!(body["stats"]["correct"], 60);
        assert_eq!(body["stats"]["accuracy"], 50.0);
    }

    #[tokio::test]
    async fn unknown_prediction_is_404() {
        let app = app();
        let (status, _) = app.get(&format!("/predictions/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_lists_top_predictors() {
        let app = app();
        app.post("gina", up("AAPL")).await;
        let hit = ScoreChange { accurate: true, delta: 10 };
        let miss = ScoreChange { accurate: false, delta: -3 };
        app.ledger.apply(Uuid::new_v4(), "gina", hit).await.unwrap();
        app.ledger.apply(Uuid::new_v4(), "hank", miss).await.unwrap();

        let (status, body) = app.get("/predictions/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalPredictions"], 1);
        assert_eq!(body["evaluatedPredictions"], 0);
        let top = body["topPredictors"].as_array().unwrap();
        assert_eq!(top[0]["userId"], "gina");
        assert_eq!(top[1]["reputationScore"], -3);
    }
}
