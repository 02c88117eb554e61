//! Broker transport abstraction.
//!
//! The broker itself (queue storage, routing, durability) is an external
//! system. This trait captures the capability surface the harness needs
//! from it, so backends can be swapped without touching the producer and
//! consumer loops.

use crate::error::QueueResult;
use async_trait::async_trait;
use courier_core::Interface;

/// A single message pulled from a queue, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message was fetched from.
    pub queue: String,

    /// Opaque message payload.
    pub payload: Vec<u8>,

    /// Unique tag identifying this delivery for ack/requeue.
    pub delivery_tag: String,

    /// Tag of the consumer holding this delivery.
    pub consumer_tag: String,

    /// True if this message was requeued at least once.
    pub redelivered: bool,
}

impl Delivery {
    /// Returns the payload decoded as UTF-8, lossily.
    #[must_use]
    pub fn payload_utf8(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Broker transport for different backends.
///
/// Fetched messages sit in an unacked holding area until `ack` removes
/// them or `requeue` makes them eligible for redelivery. Each fetch takes
/// a lease scoped to the consumer tag; deliveries whose lease expired
/// (the consumer died without acking) are reclaimed into their queue, so
/// a message is never silently lost (at-least-once).
#[async_trait]
pub trait BrokerTransport: Interface + Send + Sync {
    /// Declare a durable, non-exclusive queue. Idempotent.
    async fn declare_queue(&self, queue: &str) -> QueueResult<()>;

    /// Publish one message to a queue. Fire-and-forget: returns once the
    /// broker accepted the send, without waiting for consumer-side
    /// confirmation.
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()>;

    /// Pull the next message from a queue, moving it to the unacked
    /// holding area under a lease owned by `consumer_tag`. Returns
    /// `None` when the queue is empty. Expired leases held by other
    /// consumers are reclaimed first.
    async fn fetch(&self, queue: &str, consumer_tag: &str) -> QueueResult<Option<Delivery>>;

    /// Acknowledge a delivery, removing it from the unacked area.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Return an unacked delivery to its queue for redelivery.
    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Declare a fanout exchange. Idempotent.
    async fn declare_fanout(&self, exchange: &str) -> QueueResult<()>;

    /// Copy a message to every queue currently bound to the exchange.
    /// With no bound queues the message is dropped.
    async fn broadcast(&self, exchange: &str, payload: &[u8]) -> QueueResult<()>;

    /// Create an exclusive, auto-deleting queue for one subscriber and
    /// bind it to the exchange. Returns the generated queue name.
    async fn bind_private_queue(&self, exchange: &str, subscriber_tag: &str)
        -> QueueResult<String>;

    /// Unbind and delete a private subscriber queue.
    async fn drop_private_queue(&self, exchange: &str, queue: &str) -> QueueResult<()>;

    /// Check broker reachability.
    async fn health_check(&self) -> QueueResult<()>;
}
