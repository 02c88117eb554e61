//! Typed cache client harness.

use crate::backend::CacheBackend;
use crate::notify::{change_notification, EVENT_LOG_CHANNEL};
use courier_core::{CourierError, CourierResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback invoked for each change notification.
pub type NotificationHandler = Box<dyn Fn(String) + Send + Sync>;

/// Typed client over a cache backend.
///
/// Values are stored as JSON. Every successful `set` publishes a change
/// notification on [`EVENT_LOG_CHANNEL`]; store and notification are two
/// independent steps, so a subscriber may observe a notification whose
/// value was already overwritten.
///
/// Each client is an explicit handle; create as many as needed, there is
/// no shared global instance.
pub struct CacheClient<B: CacheBackend> {
    backend: Arc<B>,

    /// Live subscription task, at most one per client.
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl<B: CacheBackend + 'static> CacheClient<B> {
    /// Create a client over a backend handle.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            subscription: Mutex::new(None),
        }
    }

    /// Check if a key exists.
    pub async fn exists(&self, key: &str) -> CourierResult<bool> {
        self.backend.exists(key).await
    }

    /// Store a value under a key, then notify subscribers.
    ///
    /// The notification is best-effort: a publish failure is logged at
    /// warn level and never surfaced, the value is already stored.
    pub async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T) -> CourierResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.set_raw(key, &json).await?;

        let message = change_notification(key, &json);
        if let Err(e) = self.backend.publish(EVENT_LOG_CHANNEL, &message).await {
            warn!(key = %key, error = %e, "Change notification failed");
        }

        Ok(())
    }

    /// Get a value, falling back to the type's default when the key is
    /// absent.
    ///
    /// A stored value that does not decode as `T` is a serialization
    /// error, not a default.
    pub async fn get<T: DeserializeOwned + Default + Send>(&self, key: &str) -> CourierResult<T> {
        match self.get_opt(key).await? {
            Some(value) => Ok(value),
            None => Ok(T::default()),
        }
    }

    /// Get a value, `None` when the key is absent.
    pub async fn get_opt<T: DeserializeOwned + Send>(&self, key: &str) -> CourierResult<Option<T>> {
        match self.backend.get_raw(key).await? {
            Some(json) => {
                let value: T = serde_json::from_str(&json)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete a key. Idempotent: removing an absent key succeeds.
    pub async fn remove(&self, key: &str) -> CourierResult<()> {
        let deleted = self.backend.delete(key).await?;
        debug!(key = %key, deleted, "Removed key");
        Ok(())
    }

    /// Subscribe to change notifications, invoking `callback` for each.
    ///
    /// At most one subscription per client; a second call fails until
    /// [`CacheClient::unsubscribe`] is called. The callback runs on a
    /// spawned task fed by a bounded queue, so a slow callback delays
    /// its own notifications, not the publisher.
    pub async fn subscribe<F>(&self, callback: F) -> CourierResult<()>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        if self.subscription.lock().is_some() {
            return Err(CourierError::subscription(
                "client is already subscribed; unsubscribe first",
            ));
        }

        let mut subscription = self.backend.subscribe(EVENT_LOG_CHANNEL).await?;
        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                callback(message);
            }
        });

        let mut guard = self.subscription.lock();
        if guard.is_some() {
            // Lost the race to a concurrent subscribe
            task.abort();
            return Err(CourierError::subscription(
                "client is already subscribed; unsubscribe first",
            ));
        }
        *guard = Some(task);
        drop(guard);
        info!(channel = EVENT_LOG_CHANNEL, "Subscribed to change notifications");
        Ok(())
    }

    /// Stop the live subscription, if any. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(task) = self.subscription.lock().take() {
            task.abort();
            info!(channel = EVENT_LOG_CHANNEL, "Unsubscribed from change notifications");
        }
    }

    /// Check if a subscription is live.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Tear the client down. Idempotent and safe on a client that never
    /// subscribed or connected.
    pub fn close(&self) {
        self.unsubscribe();
        debug!("Cache client closed");
    }
}

impl<B: CacheBackend> Drop for CacheClient<B> {
    fn drop(&mut self) {
        if let Some(task) = self.subscription.lock().take() {
            task.abort();
        }
    }
}
