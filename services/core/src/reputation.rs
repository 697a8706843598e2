//! Reputation scoring.
//!
//! Fixed weight table, identical for every user:
//!
//! | timeframe | correct | incorrect |
//! |-----------|---------|-----------|
//! | 1h        | +5      | -2        |
//! | 1d        | +10     | -3        |
//! | 1w        | +20     | -5        |
//! | 1m        | +30     | -8        |
//!
//! Flagged predictions keep [`FLAGGED_REWARD_PERCENT`] of the reward (zero)
//! and take the full penalty.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ReputationError;
use crate::model::{Prediction, Timeframe};
use crate::store::{ReputationLedger, ScoreChange};

pub const FLAGGED_REWARD_PERCENT: i64 = 0;

pub fn reward(timeframe: Timeframe) -> i64 {
    match timeframe {
        Timeframe::OneHour => 5,
        Timeframe::OneDay => 10,
        Timeframe::OneWeek => 20,
        Timeframe::OneMonth => 30,
    }
}

pub fn penalty(timeframe: Timeframe) -> i64 {
    match timeframe {
        Timeframe::OneHour => -2,
        Timeframe::OneDay => -3,
        Timeframe::OneWeek => -5,
        Timeframe::OneMonth => -8,
    }
}

pub fn score_delta(is_correct: bool, timeframe: Timeframe, flagged: bool) -> i64 {
    match (is_correct, flagged) {
        (true, false) => reward(timeframe),
        (true, true) => reward(timeframe) * FLAGGED_REWARD_PERCENT / 100,
        (false, _) => penalty(timeframe),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { delta: i64 },
    AlreadyApplied,
}

#[derive(Clone)]
pub struct ReputationEngine {
    ledger: Arc<dyn ReputationLedger>,
}

impl ReputationEngine {
    pub fn new(ledger: Arc<dyn ReputationLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn ReputationLedger> {
        &self.ledger
    }

    /// Applies the score change for an evaluated prediction. Safe to call any
    /// number of times; the prediction id is the idempotency key.
    pub async fn apply(&self, prediction: &Prediction) -> Result<ApplyOutcome, ReputationError> {
        let is_correct = prediction.is_correct.ok_or(ReputationError::NotEvaluated(prediction.id))?;
        if prediction.is_pending() {
            return Err(ReputationError::NotEvaluated(prediction.id));
        }
        let delta = score_delta(is_correct, prediction.timeframe, prediction.flagged);
        let change = ScoreChange { accurate: is_correct, delta };

        if self.ledger.apply(prediction.id, &prediction.user_id, change).await? {
            info!(
                prediction_id=%prediction.id,
                user_id=%prediction.user_id,
                delta,
                is_correct,
                "reputation applied"
            );
            Ok(ApplyOutcome::Applied { delta })
        } else {
            debug!(prediction_id=%prediction.id, "reputation already applied");
            Ok(ApplyOutcome::AlreadyApplied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Forecast, PredictionDraft, ValidatedPayload};
    use crate::store::MemoryLedger;
    use chrono::Utc;
    use uuid::Uuid;

    fn evaluated(timeframe: Timeframe, correct: bool, flagged: bool) -> Prediction {
        let v = ValidatedPayload {
            instrument_id: "AAPL".into(),
            forecast: Forecast::Direction { direction: Direction::Up },
            timeframe,
            reasoning: None,
        };
        let mut draft = PredictionDraft::new("u1", v, 100.0, Utc::now());
        if flagged {
            draft = draft.flag("burst");
        }
        let mut p = draft.into_prediction(Uuid::new_v4());
        p.evaluate(if correct { 101.0 } else { 99.0 }, correct, Utc::now());
        p
    }

    #[test]
    fn table_is_positive_for_hits_and_negative_for_misses() {
        for tf in Timeframe::ALL {
            assert!(score_delta(true, tf, false) > 0);
            assert!(score_delta(false, tf, false) < 0);
        }
        assert_eq!(score_delta(true, Timeframe::OneWeek, false), 20);
        assert_eq!(score_delta(false, Timeframe::OneMonth, false), -8);
    }

    #[test]
    fn flagged_hits_earn_nothing_but_misses_still_cost() {
        for tf in Timeframe::ALL {
            assert_eq!(score_delta(true, tf, true), 0);
            assert_eq!(score_delta(false, tf, true), penalty(tf));
        }
    }

    #[tokio::test]
    async fn apply_is_idempotent_per_prediction() {
        let ledger = Arc::new(MemoryLedger::new());
        let engine = ReputationEngine::new(ledger.clone());
        let p = evaluated(Timeframe::OneDay, true, false);

        assert_eq!(engine.apply(&p).await.unwrap(), ApplyOutcome::Applied { delta: 10 });
        assert_eq!(engine.apply(&p).await.unwrap(), ApplyOutcome::AlreadyApplied);

        let s = ledger.standing("u1").await.unwrap();
        assert_eq!((s.total_predictions, s.accurate_predictions, s.reputation_score), (1, 1, 10));
    }

    #[tokio::test]
    async fn miss_counts_toward_total_only() {
        let ledger = Arc::new(MemoryLedger::new());
        let engine = ReputationEngine::new(ledger.clone());
        engine.apply(&evaluated(Timeframe::OneHour, false, false)).await.unwrap();
        let s = ledger.standing("u1").await.unwrap();
        assert_eq!((s.total_predictions, s.accurate_predictions, s.reputation_score), (1, 0, -2));
    }

    #[tokio::test]
    async fn pending_prediction_is_refused() {
        let engine = ReputationEngine::new(Arc::new(MemoryLedger::new()));
        let v = ValidatedPayload {
            instrument_id: "AAPL".into(),
            forecast: Forecast::Price { target_price: 120.0 },
            timeframe: Timeframe::OneHour,
            reasoning: None,
        };
        let p = PredictionDraft::new("u1", v, 100.0, Utc::now()).into_prediction(Uuid::new_v4());
        assert!(matches!(engine.apply(&p).await, Err(ReputationError::NotEvaluated(_))));
    }
}
