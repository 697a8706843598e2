//! Durable state for predictions and reputation.
//!
//! Both races named by the concurrency model are closed here rather than in
//! callers: `create` owns the one-pending-per-(user, instrument) rule and
//! `commit_evaluation` is a compare-and-set on status. `create_within` also
//! re-checks the per-user quota under the same guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Prediction, PredictionDraft, PredictionFilter, PredictionTotals, UserStanding};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryLedger, MemoryStore};
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// This caller performed the pending → evaluated transition.
    Committed(Prediction),
    /// Somebody else got there first; nothing was written.
    AlreadyEvaluated,
}

/// At most `max` predictions by the draft's user created after `since`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserQuota {
    pub max: u64,
    pub since: DateTime<Utc>,
}

/// One reputation application, keyed by the prediction it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreChange {
    pub accurate: bool,
    pub delta: i64,
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Persists a draft, failing with `DuplicateActive` when the user already
    /// has a pending prediction on the instrument.
    async fn create(&self, draft: PredictionDraft) -> Result<Prediction, StoreError>;

    /// `create`, failing with `QuotaExceeded` when the user already has
    /// `quota.max` predictions after `quota.since`. The count and the insert
    /// are atomic with respect to other submissions by the same user.
    async fn create_within(
        &self,
        draft: PredictionDraft,
        quota: UserQuota,
    ) -> Result<Prediction, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Prediction>, StoreError>;

    async fn has_pending(&self, user_id: &str, instrument_id: &str) -> Result<bool, StoreError>;

    /// Predictions by `user_id` created strictly after `since`.
    async fn count_by_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Predictions on `instrument_id`, any user, created strictly after `since`.
    async fn count_by_instrument_since(
        &self,
        instrument_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Pending predictions with `target_date <= now` and no retry scheduled
    /// after `now`, oldest target first.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError>;

    /// Keeps a pending prediction out of `find_due` until `retry_at`.
    async fn defer(&self, id: Uuid, retry_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn commit_evaluation(
        &self,
        id: Uuid,
        actual_price: f64,
        is_correct: bool,
        evaluated_at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError>;

    /// Evaluated predictions whose reputation change is not recorded yet,
    /// oldest evaluation first. No time bound.
    async fn find_unscored(&self, limit: usize) -> Result<Vec<Prediction>, StoreError>;

    /// Records that the reputation change for `id` has been applied.
    async fn mark_scored(&self, id: Uuid) -> Result<(), StoreError>;

    /// Filtered listing, most recent first.
    async fn list(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>, StoreError>;

    async fn totals(&self) -> Result<PredictionTotals, StoreError>;

    /// Totals over every prediction of one user, not a listing page.
    async fn totals_for_user(&self, user_id: &str) -> Result<PredictionTotals, StoreError>;
}

#[async_trait]
pub trait ReputationLedger: Send + Sync {
    /// Applies `change` to the user's aggregate unless `prediction_id` was
    /// already applied. Returns whether this call changed anything.
    async fn apply(
        &self,
        prediction_id: Uuid,
        user_id: &str,
        change: ScoreChange,
    ) -> Result<bool, StoreError>;

    async fn standing(&self, user_id: &str) -> Result<UserStanding, StoreError>;

    /// Highest reputation first.
    async fn top(&self, n: usize) -> Result<Vec<UserStanding>, StoreError>;
}
