use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Spaces out sends on one socket by at least `min_interval`.
#[derive(Debug, Clone)]
pub struct Throttle {
    pub min_interval: Duration,
    last: Arc<Mutex<Option<Instant>>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: Arc::new(Mutex::new(None)) }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
