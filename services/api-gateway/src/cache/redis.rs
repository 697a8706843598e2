use forecast_core::connection::RedisConnector;
use redis::AsyncCommands;

/// Shared stats cache across gateway replicas, on one reused connection.
#[derive(Clone)]
pub struct RedisCache {
    redis: RedisConnector,
}

impl RedisCache {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self { redis: RedisConnector::open(url)? })
    }

    pub async fn get_json(&self, key: &str) -> anyhow::Result<Option<String>> {
        let key = key.to_string();
        self.redis.run(|mut conn| async move { conn.get(key).await }).await
    }

    pub async fn set_json_ex(&self, key: &str, json: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let (key, json) = (key.to_string(), json.to_string());
        self.redis
            .run(|mut conn| async move { conn.set_ex(key, json, ttl_secs).await })
            .await
    }
}
