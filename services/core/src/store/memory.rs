use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CommitOutcome, PredictionStore, ReputationLedger, ScoreChange, UserQuota};
use crate::error::StoreError;
use crate::model::{Prediction, PredictionDraft, PredictionFilter, PredictionTotals, UserStanding};

#[derive(Debug, Default)]
struct StoreState {
    // insertion order == creation order
    rows: Vec<Prediction>,
    retry_at: HashMap<Uuid, DateTime<Utc>>,
    scored: HashSet<Uuid>,
}

impl StoreState {
    fn insert(&mut self, draft: PredictionDraft) -> Result<Prediction, StoreError> {
        let clash = self
            .rows
            .iter()
            .any(|p| {
                p.is_pending()
                    && p.user_id == draft.user_id
                    && p.instrument_id == draft.instrument_id
            });
        if clash {
            return Err(StoreError::DuplicateActive);
        }
        let prediction = draft.into_prediction(Uuid::new_v4());
        self.rows.push(prediction.clone());
        Ok(prediction)
    }

    fn count_by_user_since(&self, user_id: &str, since: DateTime<Utc>) -> u64 {
        self.rows
            .iter()
            .filter(|p| p.user_id == user_id && p.created_at > since)
            .count() as u64
    }
}

/// In-process store. Every operation runs inside one critical section, which
/// gives the same atomicity the Postgres constraints give.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn create(&self, draft: PredictionDraft) -> Result<Prediction, StoreError> {
        self.state.lock().await.insert(draft)
    }

    async fn create_within(
        &self,
        draft: PredictionDraft,
        quota: UserQuota,
    ) -> Result<Prediction, StoreError> {
        let mut state = self.state.lock().await;
        if state.count_by_user_since(&draft.user_id, quota.since) >= quota.max {
            return Err(StoreError::QuotaExceeded);
        }
        state.insert(draft)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Prediction>, StoreError> {
        Ok(self.state.lock().await.rows.iter().find(|p| p.id == id).cloned())
    }

    async fn has_pending(&self, user_id: &str, instrument_id: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .any(|p| p.is_pending() && p.user_id == user_id && p.instrument_id == instrument_id))
    }

    async fn count_by_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.count_by_user_since(user_id, since))
    }

    async fn count_by_instrument_since(
        &self,
        instrument_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|p| p.instrument_id == instrument_id && p.created_at > since)
            .count() as u64)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<Prediction> = state
            .rows
            .iter()
            .filter(|p| p.is_due(now) && state.retry_at.get(&p.id).map_or(true, |at| *at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|p| p.target_date);
        due.truncate(limit);
        Ok(due)
    }

    async fn defer(&self, id: Uuid, retry_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.rows.iter().any(|p| p.id == id) {
            return Err(StoreError::NotFound(id));
        }
        state.retry_at.insert(id, retry_at);
        Ok(())
    }

    async fn commit_evaluation(
        &self,
        id: Uuid,
        actual_price: f64,
        is_correct: bool,
        evaluated_at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let row = state.rows.iter_mut().find(|p| p.id == id).ok_or(StoreError::NotFound(id))?;
        if row.evaluate(actual_price, is_correct, evaluated_at) {
            let committed = row.clone();
            state.retry_at.remove(&id);
            Ok(CommitOutcome::Committed(committed))
        } else {
            Ok(CommitOutcome::AlreadyEvaluated)
        }
    }

    async fn find_unscored(&self, limit: usize) -> Result<Vec<Prediction>, StoreError> {
        let state = self.state.lock().await;
        let mut out: Vec<Prediction> = state
            .rows
            .iter()
            .filter(|p| !p.is_pending() && !state.scored.contains(&p.id))
            .cloned()
            .collect();
        out.sort_by_key(|p| p.evaluated_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn mark_scored(&self, id: Uuid) -> Result<(), StoreError> {
        self.state.lock().await.scored.insert(id);
        Ok(())
    }

    async fn list(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .rev()
            .filter(|p| filter.matches(p))
            .take(filter.effective_limit())
            .cloned()
            .collect())
    }

    async fn totals(&self) -> Result<PredictionTotals, StoreError> {
        Ok(PredictionTotals::from_predictions(self.state.lock().await.rows.iter()))
    }

    async fn totals_for_user(&self, user_id: &str) -> Result<PredictionTotals, StoreError> {
        let state = self.state.lock().await;
        Ok(PredictionTotals::from_predictions(state.rows.iter().filter(|p| p.user_id == user_id)))
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    applied: HashSet<Uuid>,
    users: HashMap<String, UserStanding>,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReputationLedger for MemoryLedger {
    async fn apply(
        &self,
        prediction_id: Uuid,
        user_id: &str,
        change: ScoreChange,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.applied.insert(prediction_id) {
            return Ok(false);
        }
        let standing = state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserStanding::new(user_id));
        standing.total_predictions += 1;
        if change.accurate {
            standing.accurate_predictions += 1;
        }
        standing.reputation_score += change.delta;
        Ok(true)
    }

    async fn standing(&self, user_id: &str) -> Result<UserStanding, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.get(user_id).cloned().unwrap_or_else(|| UserStanding::new(user_id)))
    }

    async fn top(&self, n: usize) -> Result<Vec<UserStanding>, StoreError> {
        let state = self.state.lock().await;
        let mut all: Vec<UserStanding> = state.users.values().cloned().collect();
        all.sort_by(|a, b| {
            b.reputation_score
                .cmp(&a.reputation_score)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        all.truncate(n);
        Ok(all)
    }
}
