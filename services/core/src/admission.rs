//! Admission control for new predictions.
//!
//! Checks run in a fixed order and every rejection happens before anything
//! is written: payload shape, timeframe, one pending call per instrument,
//! the per-user hourly cap. The burst heuristic never rejects; it only marks
//! the record. The pending rule and the per-user cap are checked again by
//! the store inside `create_within`, which is what actually closes the race
//! between concurrent submissions.

use std::sync::Arc;
use std::time::Duration;

use chrono::SubsecRound;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{Rejection, SourceError, StoreError};
use crate::model::{Prediction, PredictionDraft, PredictionPayload};
use crate::price::{lookup_with_timeout, PriceSource};
use crate::store::{PredictionStore, UserQuota};

#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Max predictions per user inside `user_window`.
    pub max_per_user: u32,
    pub user_window: chrono::Duration,
    /// Submissions on one instrument inside `burst_window`, counting the
    /// incoming one, at which the new prediction gets flagged.
    pub burst_threshold: u32,
    pub burst_window: chrono::Duration,
    pub price_timeout: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_per_user: 5,
            user_window: chrono::Duration::minutes(60),
            burst_threshold: 10,
            burst_window: chrono::Duration::seconds(60),
            price_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn PredictionStore>,
    prices: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    policy: AdmissionPolicy,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn PredictionStore>,
        prices: Arc<dyn PriceSource>,
        clock: Arc<dyn Clock>,
        policy: AdmissionPolicy,
    ) -> Self {
        Self { store, prices, clock, policy }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    fn rate_limited(&self) -> Rejection {
        Rejection::RateLimited {
            limit: self.policy.max_per_user,
            window_minutes: self.policy.user_window.num_minutes(),
        }
    }

    pub async fn submit(
        &self,
        user_id: &str,
        payload: &PredictionPayload,
    ) -> Result<Prediction, Rejection> {
        let valid = payload.validate()?;

        if self.store.has_pending(user_id, &valid.instrument_id).await? {
            return Err(Rejection::Conflict);
        }

        let now = self.clock.now().trunc_subsecs(6);

        let quota = UserQuota {
            max: u64::from(self.policy.max_per_user),
            since: now - self.policy.user_window,
        };
        let recent = self.store.count_by_user_since(user_id, quota.since).await?;
        if recent >= quota.max {
            info!(user_id, recent, "prediction rate limited");
            return Err(self.rate_limited());
        }

        let burst = self
            .store
            .count_by_instrument_since(&valid.instrument_id, now - self.policy.burst_window)
            .await?
            + 1;

        let lookup = lookup_with_timeout(
            self.prices.as_ref(),
            &valid.instrument_id,
            self.policy.price_timeout,
        );
        let initial_price = match lookup.await {
            Ok(p) if p.is_finite() && p > 0.0 => p,
            Ok(p) => {
                warn!(instrument_id=%valid.instrument_id, price=p, "unusable baseline price");
                return Err(Rejection::PriceUnavailable(valid.instrument_id));
            }
            Err(SourceError::UnknownInstrument(id)) => {
                return Err(Rejection::UnknownInstrument(id));
            }
            Err(e) => {
                warn!(instrument_id=%valid.instrument_id, error=%e, "baseline price lookup failed");
                return Err(Rejection::PriceUnavailable(valid.instrument_id));
            }
        };

        let mut draft = PredictionDraft::new(user_id, valid, initial_price, now);
        if burst >= u64::from(self.policy.burst_threshold) {
            warn!(instrument_id=%draft.instrument_id, burst, "burst of predictions, flagging");
            let reason = format!(
                "potential pump activity: {burst} predictions on {} within {}s",
                draft.instrument_id,
                self.policy.burst_window.num_seconds()
            );
            draft = draft.flag(reason);
        }

        let prediction = match self.store.create_within(draft, quota).await {
            Ok(p) => p,
            Err(StoreError::QuotaExceeded) => {
                info!(user_id, "prediction rate limited at insert");
                return Err(self.rate_limited());
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            prediction_id=%prediction.id,
            user_id,
            instrument_id=%prediction.instrument_id,
            kind=prediction.kind().as_str(),
            timeframe=%prediction.timeframe,
            flagged=prediction.flagged,
            "prediction accepted"
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::price::StaticPriceSource;
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        prices: StaticPriceSource,
        clock: Arc<ManualClock>,
        admission: AdmissionController,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let prices = StaticPriceSource::new();
        for i in 0..20 {
            prices.set(&format!("SYM{i}"), 100.0);
        }
        prices.set("AAPL", 100.0);
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let admission = AdmissionController::new(
            store.clone(),
            Arc::new(prices.clone()),
            clock.clone(),
            AdmissionPolicy::default(),
        );
        Harness { store, prices, clock, admission }
    }

    fn up(instrument: &str) -> PredictionPayload {
        PredictionPayload {
            instrument_id: Some(instrument.into()),
            kind: Some("direction".into()),
            direction: Some("up".into()),
            timeframe: Some("1h".into()),
            ..PredictionPayload::default()
        }
    }

    #[tokio::test]
    async fn accepted_prediction_captures_baseline_and_target_date() {
        let h = harness();
        let p = h.admission.submit("u1", &up("AAPL")).await.unwrap();
        assert_eq!(p.initial_price, 100.0);
        assert_eq!(p.created_at, h.clock.now());
        assert_eq!(p.target_date, p.created_at + chrono::Duration::hours(1));
        assert!(p.is_pending());
        assert!(!p.flagged);
    }

    #[tokio::test]
    async fn second_active_prediction_conflicts() {
        let h = harness();
        h.admission.submit("u1", &up("AAPL")).await.unwrap();
        let err = h.admission.submit("u1", &up("AAPL")).await.unwrap_err();
        assert!(matches!(err, Rejection::Conflict));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn sixth_in_an_hour_is_rate_limited_until_window_slides() {
        let h = harness();
        for i in 0..5 {
            h.admission.submit("u1", &up(&format!("SYM{i}"))).await.unwrap();
            h.clock.advance(chrono::Duration::minutes(1));
        }
        let err = h.admission.submit("u1", &up("SYM5")).await.unwrap_err();
        assert!(matches!(err, Rejection::RateLimited { limit: 5, window_minutes: 60 }));
        assert_eq!(h.store.len().await, 5);

        // first submission was at t0; at t0 + 60m it is no longer inside the window
        h.clock.advance(chrono::Duration::minutes(55));
        h.admission.submit("u1", &up("SYM5")).await.unwrap();
    }

    #[tokio::test]
    async fn tenth_submission_on_an_instrument_in_a_minute_is_flagged() {
        let h = harness();
        for i in 0..9 {
            let p = h.admission.submit(&format!("user{i}"), &up("AAPL")).await.unwrap();
            assert!(!p.flagged, "submission {} should not be flagged", i + 1);
            h.clock.advance(chrono::Duration::seconds(2));
        }
        let tenth = h.admission.submit("user9", &up("AAPL")).await.unwrap();
        assert!(tenth.flagged);
        assert!(tenth.flag_reason.unwrap().contains("10 predictions"));
    }

    #[tokio::test]
    async fn burst_window_is_trailing_sixty_seconds() {
        let h = harness();
        for i in 0..9 {
            h.admission.submit(&format!("user{i}"), &up("AAPL")).await.unwrap();
        }
        h.clock.advance(chrono::Duration::seconds(61));
        let p = h.admission.submit("late", &up("AAPL")).await.unwrap();
        assert!(!p.flagged);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_anything_else() {
        let h = harness();
        let mut bad = up("AAPL");
        bad.timeframe = Some("5m".into());
        assert!(matches!(h.admission.submit("u1", &bad).await, Err(Rejection::Invalid(_))));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_or_unpriced_instrument_leaves_no_trace() {
        let h = harness();
        let err = h.admission.submit("u1", &up("ZZZZ")).await.unwrap_err();
        assert!(matches!(err, Rejection::UnknownInstrument(ref id) if id == "ZZZZ"));

        h.prices.set("BAD", f64::NAN);
        let err = h.admission.submit("u1", &up("BAD")).await.unwrap_err();
        assert!(matches!(err, Rejection::PriceUnavailable(_)));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn rejected_submissions_do_not_count_toward_the_cap() {
        let h = harness();
        for _ in 0..10 {
            let _ = h.admission.submit("u1", &up("ZZZZ")).await;
        }
        let at: DateTime<Utc> = h.clock.now();
        let since = at - chrono::Duration::hours(1);
        assert_eq!(h.store.count_by_user_since("u1", since).await.unwrap(), 0);
        h.admission.submit("u1", &up("AAPL")).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_cannot_overshoot_the_cap() {
        let h = harness();
        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let admission = h.admission.clone();
                tokio::spawn(async move { admission.submit("u1", &up(&format!("SYM{i}"))).await })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(e, Rejection::RateLimited { limit: 5, .. })),
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(h.store.len().await, 5);
    }
}
