use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Per-topic fan-out to connected sockets.
#[derive(Clone, Default)]
pub struct Hub {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<String> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(512).0)
            .subscribe()
    }

    /// Delivers to current subscribers of `name`; returns how many got it.
    /// Topics nobody listens to any more are dropped.
    pub fn publish(&self, name: &str, msg: String) -> usize {
        let delivered = match self.topics.get(name) {
            Some(tx) => tx.send(msg).unwrap_or(0),
            None => return 0,
        };
        if delivered == 0 {
            self.topics.remove_if(name, |_, tx| tx.receiver_count() == 0);
        }
        delivered
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_subscribers_of_a_topic_receive() {
        let hub = Hub::new();
        let mut a = hub.subscribe("user:a");
        let mut b = hub.subscribe("user:b");
        assert_eq!(hub.publish("user:a", "hello".into()), 1);
        assert_eq!(a.recv().await.unwrap(), "hello");
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn abandoned_topics_are_pruned() {
        let hub = Hub::new();
        drop(hub.subscribe("user:gone"));
        assert_eq!(hub.topic_count(), 1);
        assert_eq!(hub.publish("user:gone", "x".into()), 0);
        assert_eq!(hub.topic_count(), 0);
        assert_eq!(hub.publish("user:never", "x".into()), 0);
    }
}
