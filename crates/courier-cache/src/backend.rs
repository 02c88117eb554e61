//! Cache backend trait for abstracted keyed storage and notifications.

use courier_core::{CourierResult, Interface};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of the per-subscription notification queue.
///
/// A slow callback backs up its own bounded queue instead of the
/// backend's pub/sub connection.
pub const NOTIFICATION_QUEUE_DEPTH: usize = 64;

/// A live pub/sub subscription.
///
/// Messages arrive through a bounded queue fed by a backend-owned
/// forwarding task. Dropping the subscription aborts that task and ends
/// the stream.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
    forwarder: JoinHandle<()>,
}

impl Subscription {
    /// Create a subscription from its queue and forwarding task.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<String>, forwarder: JoinHandle<()>) -> Self {
        Self { rx, forwarder }
    }

    /// Receive the next message. Returns `None` once the subscription
    /// is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Stop receiving and tear down the forwarding task.
    pub fn close(mut self) {
        self.rx.close();
        self.forwarder.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Cache backend for keyed storage plus change-notification pub/sub.
///
/// Values are JSON strings for type-erased storage; typed access lives
/// in the client harness.
#[async_trait]
pub trait CacheBackend: Interface + Send + Sync {
    /// Get a raw JSON value.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn get_raw(&self, key: &str) -> CourierResult<Option<String>>;

    /// Set a raw JSON value.
    async fn set_raw(&self, key: &str, value: &str) -> CourierResult<()>;

    /// Delete a value.
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> CourierResult<bool>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> CourierResult<bool>;

    /// Publish a message on a pub/sub channel. Fire-and-forget: delivery
    /// to zero subscribers is still a success.
    async fn publish(&self, channel: &str, message: &str) -> CourierResult<()>;

    /// Subscribe to a pub/sub channel.
    async fn subscribe(&self, channel: &str) -> CourierResult<Subscription>;

    /// Check if the backend holds a live connection.
    fn is_connected(&self) -> bool;
}
