use thiserror::Error;
use uuid::Uuid;

/// Synchronous admission outcomes other than acceptance. None of them leave
/// anything behind in the store.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("invalid payload: {0}")]
    Invalid(String),
    #[error("an active prediction already exists for this instrument")]
    Conflict,
    #[error("rate limit exceeded: max {limit} predictions per {window_minutes} minutes")]
    RateLimited { limit: u32, window_minutes: i64 },
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),
    #[error("price for {0} is unavailable, try again later")]
    PriceUnavailable(String),
    #[error("storage error: {0}")]
    Store(StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a pending prediction already exists for this user and instrument")]
    DuplicateActive,
    #[error("prediction {0} not found")]
    NotFound(Uuid),
    #[error("user prediction quota exhausted for the current window")]
    QuotaExceeded,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for Rejection {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateActive => Rejection::Conflict,
            other => Rejection::Store(other),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),
    #[error("price source unavailable: {0}")]
    Unavailable(String),
    #[error("price lookup timed out")]
    Timeout,
}

impl From<sqlx::Error> for SourceError {
    fn from(e: sqlx::Error) -> Self {
        SourceError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("prediction {0} has not been evaluated")]
    NotEvaluated(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}
