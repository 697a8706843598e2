use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;

use crate::error::SourceError;

/// Current price of an instrument. Treated as unreliable: callers bound every
/// lookup with their own timeout.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn current_price(&self, instrument_id: &str) -> Result<f64, SourceError>;
}

/// Settable in-memory prices.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    prices: Arc<DashMap<String, f64>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices<'a>(prices: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        let source = Self::new();
        for (id, price) in prices {
            source.set(id, price);
        }
        source
    }

    pub fn set(&self, instrument_id: &str, price: f64) {
        self.prices.insert(instrument_id.to_string(), price);
    }

    pub fn remove(&self, instrument_id: &str) {
        self.prices.remove(instrument_id);
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn current_price(&self, instrument_id: &str) -> Result<f64, SourceError> {
        self.prices
            .get(instrument_id)
            .map(|p| *p)
            .ok_or_else(|| SourceError::UnknownInstrument(instrument_id.to_string()))
    }
}

/// Reads the last price written to `instruments` by the price updater.
#[derive(Clone)]
pub struct PgPriceSource {
    pool: PgPool,
}

impl PgPriceSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceSource for PgPriceSource {
    async fn current_price(&self, instrument_id: &str) -> Result<f64, SourceError> {
        let price =
            sqlx::query_scalar::<_, f64>("SELECT current_price FROM instruments WHERE id = $1")
                .bind(instrument_id)
                .fetch_optional(&self.pool)
                .await?;
        match price {
            Some(p) if p.is_finite() && p > 0.0 => Ok(p),
            Some(p) => {
                Err(SourceError::Unavailable(format!("{instrument_id} has unusable price {p}")))
            }
            None => Err(SourceError::UnknownInstrument(instrument_id.to_string())),
        }
    }
}

/// Runs a lookup under `timeout`, folding elapsed time into `SourceError::Timeout`.
pub async fn lookup_with_timeout(
    source: &dyn PriceSource,
    instrument_id: &str,
    timeout: std::time::Duration,
) -> Result<f64, SourceError> {
    match tokio::time::timeout(timeout, source.current_price(instrument_id)).await {
        Ok(res) => res,
        Err(_) => Err(SourceError::Timeout),
    }
}
