pub mod redis;
pub mod ttl;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use self::redis::RedisCache;
use self::ttl::Ttl;

const STATS_KEY: &str = "forecast:stats";

/// Short-lived cache for the aggregate stats document: process-local first,
/// then Redis when configured so gateway replicas share one computation.
#[derive(Clone)]
pub struct StatsCache {
    local: Arc<Mutex<Option<Ttl<serde_json::Value>>>>,
    shared: Option<RedisCache>,
    ttl: Duration,
}

impl StatsCache {
    pub fn new(ttl: Duration, shared: Option<RedisCache>) -> Self {
        Self { local: Arc::new(Mutex::new(None)), shared, ttl }
    }

    pub async fn get(&self) -> Option<serde_json::Value> {
        if let Some(v) = self.local.lock().await.as_ref().and_then(|t| t.fresh().cloned()) {
            return Some(v);
        }
        let shared = self.shared.as_ref()?;
        match shared.get_json(STATS_KEY).await {
            Ok(Some(raw)) => {
                let v: serde_json::Value = serde_json::from_str(&raw).ok()?;
                *self.local.lock().await = Some(Ttl::new(v.clone(), self.ttl));
                Some(v)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error=%e, "stats cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, value: &serde_json::Value) {
        *self.local.lock().await = Some(Ttl::new(value.clone(), self.ttl));
        if let Some(shared) = &self.shared {
            let json = value.to_string();
            if let Err(e) = shared.set_json_ex(STATS_KEY, &json, self.ttl.as_secs().max(1)).await {
                warn!(error=%e, "stats cache write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_entry_expires() {
        let cache = StatsCache::new(Duration::from_millis(30), None);
        assert!(cache.get().await.is_none());
        cache.put(&serde_json::json!({"total": 1})).await;
        assert_eq!(cache.get().await, Some(serde_json::json!({"total": 1})));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get().await.is_none());
    }
}
