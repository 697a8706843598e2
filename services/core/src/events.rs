use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::connection::RedisConnector;
use crate::model::{Prediction, PredictionKind, Timeframe};

/// Redis channel the job runner publishes outcomes on.
pub const OUTCOME_CHANNEL: &str = "forecast:outcomes";

/// Emitted once per evaluation, for delivery to the prediction's owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEvent {
    pub prediction_id: Uuid,
    pub user_id: String,
    pub instrument_id: String,
    pub is_correct: bool,
    pub kind: PredictionKind,
    pub timeframe: Timeframe,
    pub actual_price: f64,
}

impl OutcomeEvent {
    /// `None` while the prediction is still pending.
    pub fn from_prediction(p: &Prediction) -> Option<Self> {
        Some(Self {
            prediction_id: p.id,
            user_id: p.user_id.clone(),
            instrument_id: p.instrument_id.clone(),
            is_correct: p.is_correct?,
            kind: p.kind(),
            timeframe: p.timeframe,
            actual_price: p.actual_price?,
        })
    }

    /// Realtime topic for the owning user.
    pub fn topic(&self) -> String {
        user_topic(&self.user_id)
    }
}

pub fn user_topic(user_id: &str) -> String {
    format!("user:{user_id}")
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn emit(&self, event: &OutcomeEvent) -> anyhow::Result<()>;
}

/// In-process fan-out. Emitting with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    tx: broadcast::Sender<OutcomeEvent>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastDispatcher {
    async fn emit(&self, event: &OutcomeEvent) -> anyhow::Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Writes each outcome to the log. Used when no fan-out is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn emit(&self, event: &OutcomeEvent) -> anyhow::Result<()> {
        info!(
            prediction_id=%event.prediction_id,
            user_id=%event.user_id,
            instrument_id=%event.instrument_id,
            is_correct=event.is_correct,
            actual_price=event.actual_price,
            "prediction outcome"
        );
        Ok(())
    }
}

/// Publishes outcome JSON on [`OUTCOME_CHANNEL`] for the realtime service
/// over one shared connection.
#[derive(Clone)]
pub struct RedisDispatcher {
    redis: RedisConnector,
    channel: String,
}

impl RedisDispatcher {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self { redis: RedisConnector::open(url)?, channel: OUTCOME_CHANNEL.to_string() })
    }
}

#[async_trait]
impl NotificationDispatcher for RedisDispatcher {
    async fn emit(&self, event: &OutcomeEvent) -> anyhow::Result<()> {
        let json = serde_json::to_string(event)?;
        let channel = self.channel.clone();
        let _receivers: i64 = self
            .redis
            .run(|mut conn| async move { conn.publish(channel, json).await })
            .await?;
        Ok(())
    }
}
