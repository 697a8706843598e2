//! Shared Redis connection for publishers and caches.
//!
//! A multiplexed connection is cheap to clone and safe to use from many
//! tasks, so one is opened lazily and handed out until a command on it
//! fails; the next caller then reconnects.

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RedisConnector {
    client: redis::Client,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisConnector {
    /// Parses `url` without connecting.
    pub fn open(url: &str) -> anyhow::Result<Self> {
        Ok(Self { client: redis::Client::open(url)?, conn: Arc::new(Mutex::new(None)) })
    }

    pub async fn connection(&self) -> anyhow::Result<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("redis connection established");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection after a command error.
    pub async fn reset(&self) {
        if self.conn.lock().await.take().is_some() {
            warn!("redis connection dropped, reconnecting on next use");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Runs `f` on the shared connection and resets it if `f` fails.
    pub async fn run<T, F, Fut>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match f(conn).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.reset().await;
                Err(e.into())
            }
        }
    }
}
