use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::{CommitOutcome, PredictionStore, ReputationLedger, ScoreChange, UserQuota};
use crate::error::StoreError;
use crate::model::{
    Forecast, Prediction, PredictionDraft, PredictionFilter, PredictionStatus, PredictionTotals,
    Timeframe, UserStanding,
};

const PREDICTION_COLUMNS: &str = "id, user_id, instrument_id, kind, target_price, direction, \
     timeframe, created_at, target_date, initial_price, status, actual_price, is_correct, \
     evaluated_at, flagged, flag_reason, reasoning";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS predictions (
        id UUID PRIMARY KEY,
        user_id TEXT NOT NULL,
        instrument_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        target_price DOUBLE PRECISION,
        direction TEXT,
        timeframe TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        target_date TIMESTAMPTZ NOT NULL,
        initial_price DOUBLE PRECISION NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        actual_price DOUBLE PRECISION,
        is_correct BOOLEAN,
        evaluated_at TIMESTAMPTZ,
        flagged BOOLEAN NOT NULL DEFAULT FALSE,
        flag_reason TEXT,
        reasoning TEXT,
        retry_at TIMESTAMPTZ,
        CONSTRAINT predictions_kind_payload CHECK (
            (kind = 'price' AND target_price IS NOT NULL AND direction IS NULL)
            OR (kind = 'direction' AND direction IN ('up', 'down') AND target_price IS NULL)
        ),
        CONSTRAINT predictions_status_outcome CHECK (
            (status = 'pending' AND actual_price IS NULL AND is_correct IS NULL)
            OR (status = 'evaluated' AND actual_price IS NOT NULL AND is_correct IS NOT NULL)
        ),
        CONSTRAINT predictions_timeframe CHECK (timeframe IN ('1h', '1d', '1w', '1m'))
    )
    "#,
    "ALTER TABLE predictions ADD COLUMN IF NOT EXISTS retry_at TIMESTAMPTZ",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_predictions_one_pending \
     ON predictions(user_id, instrument_id) WHERE status = 'pending'",
    "CREATE INDEX IF NOT EXISTS idx_predictions_due \
     ON predictions(target_date) WHERE status = 'pending'",
    "CREATE INDEX IF NOT EXISTS idx_predictions_user_created \
     ON predictions(user_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_predictions_instrument_created \
     ON predictions(instrument_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_predictions_evaluated_at \
     ON predictions(evaluated_at) WHERE evaluated_at IS NOT NULL",
    r#"
    CREATE TABLE IF NOT EXISTS user_reputation (
        user_id TEXT PRIMARY KEY,
        total_predictions BIGINT NOT NULL DEFAULT 0,
        accurate_predictions BIGINT NOT NULL DEFAULT 0,
        reputation_score BIGINT NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_reputation_score \
     ON user_reputation(reputation_score DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS reputation_applications (
        prediction_id UUID PRIMARY KEY,
        user_id TEXT NOT NULL,
        accurate BOOLEAN NOT NULL,
        delta BIGINT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        id TEXT PRIMARY KEY,
        symbol TEXT,
        current_price DOUBLE PRECISION NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Postgres-backed predictions and reputation. The pending-uniqueness rule is
/// a partial unique index and evaluation is a conditional UPDATE, so any
/// number of gateway and job processes can share one database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        info!("prediction schema ready");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PredictionRow {
    id: Uuid,
    user_id: String,
    instrument_id: String,
    kind: String,
    target_price: Option<f64>,
    direction: Option<String>,
    timeframe: String,
    created_at: DateTime<Utc>,
    target_date: DateTime<Utc>,
    initial_price: f64,
    status: String,
    actual_price: Option<f64>,
    is_correct: Option<bool>,
    evaluated_at: Option<DateTime<Utc>>,
    flagged: bool,
    flag_reason: Option<String>,
    reasoning: Option<String>,
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = StoreError;

    fn try_from(row: PredictionRow) -> Result<Self, Self::Error> {
        let corrupt = |what: String| StoreError::Corrupt(format!("prediction {} {what}", row.id));
        let forecast =
            Forecast::from_columns(&row.kind, row.target_price, row.direction.as_deref())
                .ok_or_else(|| corrupt("has an inconsistent payload".into()))?;
        let timeframe: Timeframe = row
            .timeframe
            .parse()
            .map_err(|_| corrupt(format!("has timeframe '{}'", row.timeframe)))?;
        let status = match row.status.as_str() {
            "pending" => PredictionStatus::Pending,
            "evaluated" => PredictionStatus::Evaluated,
            other => return Err(corrupt(format!("has status '{other}'"))),
        };
        Ok(Prediction {
            id: row.id,
            user_id: row.user_id,
            instrument_id: row.instrument_id,
            forecast,
            timeframe,
            created_at: row.created_at,
            target_date: row.target_date,
            initial_price: row.initial_price,
            status,
            actual_price: row.actual_price,
            is_correct: row.is_correct,
            evaluated_at: row.evaluated_at,
            flagged: row.flagged,
            flag_reason: row.flag_reason,
            reasoning: row.reasoning,
        })
    }
}

fn into_predictions(rows: Vec<PredictionRow>) -> Result<Vec<Prediction>, StoreError> {
    rows.into_iter().map(Prediction::try_from).collect()
}

fn to_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

async fn insert_prediction(
    conn: &mut PgConnection,
    prediction: &Prediction,
) -> Result<(), StoreError> {
    let res = sqlx::query(
        r#"
        INSERT INTO predictions (
            id, user_id, instrument_id, kind, target_price, direction, timeframe,
            created_at, target_date, initial_price, status, flagged, flag_reason, reasoning
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $12, $13)
        "#,
    )
    .bind(prediction.id)
    .bind(&prediction.user_id)
    .bind(&prediction.instrument_id)
    .bind(prediction.kind().as_str())
    .bind(prediction.forecast.target_price())
    .bind(prediction.forecast.direction().map(|d| d.as_str()))
    .bind(prediction.timeframe.as_str())
    .bind(prediction.created_at)
    .bind(prediction.target_date)
    .bind(prediction.initial_price)
    .bind(prediction.flagged)
    .bind(&prediction.flag_reason)
    .bind(&prediction.reasoning)
    .execute(conn)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::DuplicateActive)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl PredictionStore for PgStore {
    async fn create(&self, draft: PredictionDraft) -> Result<Prediction, StoreError> {
        let prediction = draft.into_prediction(Uuid::new_v4());
        let mut conn = self.pool.acquire().await?;
        insert_prediction(&mut conn, &prediction).await?;
        Ok(prediction)
    }

    async fn create_within(
        &self,
        draft: PredictionDraft,
        quota: UserQuota,
    ) -> Result<Prediction, StoreError> {
        let prediction = draft.into_prediction(Uuid::new_v4());
        let mut tx = self.pool.begin().await?;

        // serializes concurrent submissions by one user until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&prediction.user_id)
            .execute(&mut *tx)
            .await?;
        let recent = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM predictions WHERE user_id = $1 AND created_at > $2",
        )
        .bind(&prediction.user_id)
        .bind(quota.since)
        .fetch_one(&mut *tx)
        .await?;
        if (recent.max(0) as u64) >= quota.max {
            tx.rollback().await?;
            return Err(StoreError::QuotaExceeded);
        }

        insert_prediction(&mut tx, &prediction).await?;
        tx.commit().await?;
        Ok(prediction)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Prediction>, StoreError> {
        let sql = format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE id = $1");
        let row = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Prediction::try_from).transpose()
    }

    async fn has_pending(&self, user_id: &str, instrument_id: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM predictions \
             WHERE user_id = $1 AND instrument_id = $2 AND status = 'pending')",
        )
        .bind(user_id)
        .bind(instrument_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn count_by_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM predictions WHERE user_id = $1 AND created_at > $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn count_by_instrument_since(
        &self,
        instrument_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM predictions WHERE instrument_id = $1 AND created_at > $2",
        )
        .bind(instrument_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions \
             WHERE status = 'pending' AND target_date <= $1 \
               AND (retry_at IS NULL OR retry_at <= $1) \
             ORDER BY target_date ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(now)
            .bind(to_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        into_predictions(rows)
    }

    async fn defer(&self, id: Uuid, retry_at: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE predictions SET retry_at = $2 WHERE id = $1")
            .bind(id)
            .bind(retry_at)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn commit_evaluation(
        &self,
        id: Uuid,
        actual_price: f64,
        is_correct: bool,
        evaluated_at: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError> {
        let sql = format!(
            "UPDATE predictions \
             SET status = 'evaluated', actual_price = $2, is_correct = $3, evaluated_at = $4, \
                 retry_at = NULL \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {PREDICTION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(id)
            .bind(actual_price)
            .bind(is_correct)
            .bind(evaluated_at)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return Ok(CommitOutcome::Committed(row.try_into()?));
        }

        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM predictions WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(CommitOutcome::AlreadyEvaluated)
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    // The ledger's application rows live in the same database, so the
    // reconcile backlog is an anti-join and `mark_scored` has nothing to add.
    async fn find_unscored(&self, limit: usize) -> Result<Vec<Prediction>, StoreError> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions \
             WHERE status = 'evaluated' AND NOT EXISTS ( \
                 SELECT 1 FROM reputation_applications ra WHERE ra.prediction_id = predictions.id \
             ) \
             ORDER BY evaluated_at ASC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(to_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        into_predictions(rows)
    }

    async fn mark_scored(&self, _id: Uuid) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE TRUE"));
        if let Some(instrument_id) = &filter.instrument_id {
            qb.push(" AND instrument_id = ").push_bind(instrument_id.clone());
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        match filter.evaluated {
            Some(true) => {
                qb.push(" AND status = 'evaluated'");
            }
            Some(false) => {
                qb.push(" AND status = 'pending'");
            }
            None => {}
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(to_limit(filter.effective_limit()));

        let rows = qb.build_query_as::<PredictionRow>().fetch_all(&self.pool).await?;
        into_predictions(rows)
    }

    async fn totals(&self) -> Result<PredictionTotals, StoreError> {
        let row = sqlx::query_as::<_, (i64, i64, i64)>(&format!("{TOTALS_SELECT} FROM predictions"))
            .fetch_one(&self.pool)
            .await?;
        Ok(totals_from_row(row))
    }

    async fn totals_for_user(&self, user_id: &str) -> Result<PredictionTotals, StoreError> {
        let sql = format!("{TOTALS_SELECT} FROM predictions WHERE user_id = $1");
        let row = sqlx::query_as::<_, (i64, i64, i64)>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(totals_from_row(row))
    }
}

const TOTALS_SELECT: &str = "SELECT COUNT(*), \
     COUNT(*) FILTER (WHERE status = 'evaluated'), \
     COUNT(*) FILTER (WHERE is_correct)";

fn totals_from_row((total, evaluated, correct): (i64, i64, i64)) -> PredictionTotals {
    PredictionTotals {
        total: total.max(0) as u64,
        evaluated: evaluated.max(0) as u64,
        correct: correct.max(0) as u64,
    }
}

#[derive(sqlx::FromRow)]
struct StandingRow {
    user_id: String,
    total_predictions: i64,
    accurate_predictions: i64,
    reputation_score: i64,
}

impl From<StandingRow> for UserStanding {
    fn from(r: StandingRow) -> Self {
        Self {
            user_id: r.user_id,
            total_predictions: r.total_predictions.max(0) as u64,
            accurate_predictions: r.accurate_predictions.max(0) as u64,
            reputation_score: r.reputation_score,
        }
    }
}

#[async_trait]
impl ReputationLedger for PgStore {
    async fn apply(
        &self,
        prediction_id: Uuid,
        user_id: &str,
        change: ScoreChange,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT INTO reputation_applications (prediction_id, user_id, accurate, delta) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (prediction_id) DO NOTHING",
        )
        .bind(prediction_id)
        .bind(user_id)
        .bind(change.accurate)
        .bind(change.delta)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO user_reputation
                (user_id, total_predictions, accurate_predictions, reputation_score)
            VALUES ($1, 1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                total_predictions = user_reputation.total_predictions + 1,
                accurate_predictions =
                    user_reputation.accurate_predictions + EXCLUDED.accurate_predictions,
                reputation_score = user_reputation.reputation_score + EXCLUDED.reputation_score,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(i64::from(change.accurate))
        .bind(change.delta)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn standing(&self, user_id: &str) -> Result<UserStanding, StoreError> {
        let row = sqlx::query_as::<_, StandingRow>(
            "SELECT user_id, total_predictions, accurate_predictions, reputation_score \
             FROM user_reputation WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserStanding::from).unwrap_or_else(|| UserStanding::new(user_id)))
    }

    async fn top(&self, n: usize) -> Result<Vec<UserStanding>, StoreError> {
        let rows = sqlx::query_as::<_, StandingRow>(
            "SELECT user_id, total_predictions, accurate_predictions, reputation_score \
             FROM user_reputation ORDER BY reputation_score DESC, user_id ASC LIMIT $1",
        )
        .bind(to_limit(n))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserStanding::from).collect())
    }
}
