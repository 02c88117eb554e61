//! In-process cache backend.
//!
//! Same keyed-storage and pub/sub semantics as the Redis backend without
//! an external service, for tests and embedded use.

use crate::backend::{CacheBackend, Subscription, NOTIFICATION_QUEUE_DEPTH};
use async_trait::async_trait;
use courier_core::CourierResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// Per-channel fan-out buffer between publisher and forwarding tasks.
const CHANNEL_BUFFER: usize = 64;

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, String>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// In-memory cache store.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryCacheStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.state
            .lock()
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER).0)
            .clone()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheStore {
    fn is_connected(&self) -> bool {
        true
    }

    async fn get_raw(&self, key: &str) -> CourierResult<Option<String>> {
        Ok(self.state.lock().entries.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str) -> CourierResult<()> {
        self.state
            .lock()
            .entries
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CourierResult<bool> {
        Ok(self.state.lock().entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> CourierResult<bool> {
        Ok(self.state.lock().entries.contains_key(key))
    }

    async fn publish(&self, channel: &str, message: &str) -> CourierResult<()> {
        // A send error just means nobody is subscribed
        let _ = self.sender(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CourierResult<Subscription> {
        let mut source = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);
        let channel_name = channel.to_string();

        let forwarder = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel_name, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx, forwarder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryCacheStore::new();
        assert!(store.get_raw("a").await.unwrap().is_none());

        store.set_raw("a", "1").await.unwrap();
        assert_eq!(store.get_raw("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.exists("a").await.unwrap());

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let store = MemoryCacheStore::new();
        store.publish("events", "nobody listening").await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_receives_published_messages() {
        let store = MemoryCacheStore::new();
        let mut subscription = store.subscribe("events").await.unwrap();

        store.publish("events", "first").await.unwrap();
        store.publish("events", "second").await.unwrap();

        assert_eq!(subscription.recv().await.as_deref(), Some("first"));
        assert_eq!(subscription.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_its_channel() {
        let store = MemoryCacheStore::new();
        let mut subscription = store.subscribe("events").await.unwrap();

        store.publish("other", "wrong channel").await.unwrap();
        store.publish("events", "right channel").await.unwrap();

        assert_eq!(subscription.recv().await.as_deref(), Some("right channel"));
    }

    #[tokio::test]
    async fn test_closed_subscription_stops_receiving() {
        let store = MemoryCacheStore::new();
        let subscription = store.subscribe("events").await.unwrap();
        subscription.close();

        // Publishing after close must not panic or block
        store.publish("events", "late").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
