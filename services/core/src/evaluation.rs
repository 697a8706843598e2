//! Time-triggered evaluation of due predictions.
//!
//! Any number of schedulers may run against one store. Each tick loads the
//! due set, resolves prices per item under a timeout and commits through the
//! store's compare-and-set; only the winner of that commit applies
//! reputation and emits the outcome event. An item whose price cannot be
//! resolved is deferred by `retry_backoff` so it cannot hold the head of
//! later batches.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{ReputationError, StoreError};
use crate::events::{NotificationDispatcher, OutcomeEvent};
use crate::judge::judge;
use crate::model::Prediction;
use crate::price::{lookup_with_timeout, PriceSource};
use crate::reputation::{ApplyOutcome, ReputationEngine};
use crate::store::{CommitOutcome, PredictionStore};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Per-item price lookup bound.
    pub price_timeout: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
    /// How long a prediction whose price lookup failed stays out of the due set.
    pub retry_backoff: chrono::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            price_timeout: Duration::from_secs(5),
            batch_size: 500,
            concurrency: 16,
            retry_backoff: chrono::Duration::minutes(5),
        }
    }
}

/// What happened to one due prediction in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Committed { is_correct: bool, reputation_applied: bool, notified: bool },
    LostRace,
    PriceUnavailable,
    StoreFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub committed: usize,
    pub correct: usize,
    pub lost_races: usize,
    pub price_failures: usize,
    pub store_failures: usize,
    pub reputation_failures: usize,
    pub notify_failures: usize,
}

impl TickReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Committed { is_correct, reputation_applied, notified } => {
                self.committed += 1;
                self.correct += usize::from(is_correct);
                self.reputation_failures += usize::from(!reputation_applied);
                self.notify_failures += usize::from(!notified);
            }
            ItemOutcome::LostRace => self.lost_races += 1,
            ItemOutcome::PriceUnavailable => self.price_failures += 1,
            ItemOutcome::StoreFailed => self.store_failures += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub applied: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct EvaluationScheduler {
    store: Arc<dyn PredictionStore>,
    prices: Arc<dyn PriceSource>,
    reputation: ReputationEngine,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl EvaluationScheduler {
    pub fn new(
        store: Arc<dyn PredictionStore>,
        prices: Arc<dyn PriceSource>,
        reputation: ReputationEngine,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self { store, prices, reputation, dispatcher, clock, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// One polling pass. Only a failure to load the due set is an error;
    /// per-item failures are counted in the report and retried next tick.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let now = self.clock.now();
        let due = self.store.find_due(now, self.config.batch_size).await?;
        let mut report = TickReport { due: due.len(), ..TickReport::default() };
        if due.is_empty() {
            return Ok(report);
        }
        debug!(due = due.len(), "evaluating due predictions");

        let outcomes: Vec<ItemOutcome> = stream::iter(due)
            .map(|p| self.evaluate_one(p))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }
        Ok(report)
    }

    async fn evaluate_one(&self, prediction: Prediction) -> ItemOutcome {
        let lookup = lookup_with_timeout(
            self.prices.as_ref(),
            &prediction.instrument_id,
            self.config.price_timeout,
        );
        let actual_price = match lookup.await {
            Ok(p) if p.is_finite() && p > 0.0 => p,
            Ok(p) => {
                warn!(
                    prediction_id=%prediction.id,
                    instrument_id=%prediction.instrument_id,
                    price=p,
                    "unusable price, deferring"
                );
                self.defer(&prediction).await;
                return ItemOutcome::PriceUnavailable;
            }
            Err(e) => {
                warn!(
                    prediction_id=%prediction.id,
                    instrument_id=%prediction.instrument_id,
                    error=%e,
                    "price lookup failed, deferring"
                );
                self.defer(&prediction).await;
                return ItemOutcome::PriceUnavailable;
            }
        };

        match self.commit_judgment(&prediction, actual_price).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(prediction_id=%prediction.id, error=%e, "commit failed, retrying next tick");
                ItemOutcome::StoreFailed
            }
        }
    }

    async fn defer(&self, prediction: &Prediction) {
        let retry_at = self.clock.now() + self.config.retry_backoff;
        if let Err(e) = self.store.defer(prediction.id, retry_at).await {
            warn!(prediction_id=%prediction.id, error=%e, "could not defer prediction");
        }
    }

    /// Judges `prediction` against `actual_price` and commits the result.
    /// Reputation and the outcome event follow only when this call won the
    /// compare-and-set, so calling it twice for one prediction has the
    /// effects of calling it once.
    pub async fn commit_judgment(
        &self,
        prediction: &Prediction,
        actual_price: f64,
    ) -> Result<ItemOutcome, StoreError> {
        let is_correct = judge(&prediction.forecast, prediction.initial_price, actual_price);
        let evaluated_at = self.clock.now();

        let evaluated = match self
            .store
            .commit_evaluation(prediction.id, actual_price, is_correct, evaluated_at)
            .await?
        {
            CommitOutcome::Committed(p) => p,
            CommitOutcome::AlreadyEvaluated => {
                debug!(prediction_id=%prediction.id, "already evaluated elsewhere");
                return Ok(ItemOutcome::LostRace);
            }
        };
        info!(
            prediction_id=%evaluated.id,
            user_id=%evaluated.user_id,
            instrument_id=%evaluated.instrument_id,
            initial_price=evaluated.initial_price,
            actual_price,
            is_correct,
            "prediction evaluated"
        );

        // The evaluation is final from here on. A reputation failure is left
        // for `reconcile`; it must not roll back or re-judge the prediction.
        let reputation_applied = match self.score(&evaluated).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    prediction_id=%evaluated.id,
                    error=%e,
                    "reputation update failed, left for reconcile"
                );
                false
            }
        };

        let notified = match OutcomeEvent::from_prediction(&evaluated) {
            Some(event) => match self.dispatcher.emit(&event).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(prediction_id=%evaluated.id, error=%e, "outcome event not delivered");
                    false
                }
            },
            None => false,
        };

        Ok(ItemOutcome::Committed { is_correct, reputation_applied, notified })
    }

    /// Applies reputation and records it against the prediction.
    async fn score(&self, prediction: &Prediction) -> Result<ApplyOutcome, ReputationError> {
        let outcome = self.reputation.apply(prediction).await?;
        self.store.mark_scored(prediction.id).await?;
        Ok(outcome)
    }

    /// Applies reputation for every evaluated prediction that has none yet,
    /// however old, in batches of `batch_size`. Stops early when a batch
    /// fails so a down ledger is not hammered; the next pass resumes.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let limit = self.config.batch_size.max(1);
        let mut report = ReconcileReport::default();
        loop {
            let batch = self.store.find_unscored(limit).await?;
            report.scanned += batch.len();
            let mut failed = false;
            for p in &batch {
                match self.score(p).await {
                    Ok(ApplyOutcome::Applied { .. }) => report.applied += 1,
                    Ok(ApplyOutcome::AlreadyApplied) => {}
                    Err(e) => {
                        warn!(prediction_id=%p.id, error=%e, "reputation reconcile failed");
                        report.failures += 1;
                        failed = true;
                    }
                }
            }
            if failed || batch.len() < limit {
                break;
            }
        }
        if report.applied > 0 {
            info!(applied = report.applied, "reconciled missing reputation updates");
        }
        Ok(report)
    }
}
