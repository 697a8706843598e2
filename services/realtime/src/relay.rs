use forecast_core::events::{OutcomeEvent, OUTCOME_CHANNEL};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::pubsub::Hub;

/// Routes one raw outcome payload to its owner's topic.
pub fn route(hub: &Hub, payload: &str) -> anyhow::Result<usize> {
    let event: OutcomeEvent = serde_json::from_str(payload)?;
    let delivered = hub.publish(&event.topic(), serde_json::to_string(&event)?);
    debug!(
        prediction_id=%event.prediction_id,
        user_id=%event.user_id,
        delivered,
        "outcome relayed"
    );
    Ok(delivered)
}

/// Forwards outcome events from Redis pub/sub until the connection drops.
pub async fn run(redis_url: &str, hub: Hub) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(OUTCOME_CHANNEL).await?;
    info!(channel = OUTCOME_CHANNEL, "relaying outcome events");

    let mut messages = std::pin::pin!(pubsub.on_message());
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error=%e, "unreadable pubsub payload");
                continue;
            }
        };
        if let Err(e) = route(&hub, &payload) {
            warn!(error=%e, "malformed outcome event");
        }
    }
    anyhow::bail!("redis pubsub stream ended")
}
