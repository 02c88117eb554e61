//! In-process broker backend.
//!
//! Implements the same queue, unacked-holding, and fanout semantics as the
//! Redis backend without any external service, for tests and embedded use.

use crate::error::{QueueError, QueueResult};
use crate::transport::{BrokerTransport, Delivery};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

/// Default lease on a fetched delivery before it is reclaimed.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Clone)]
struct UnackedMessage {
    queue: String,
    payload: Vec<u8>,
    leased_at: Instant,
}

#[derive(Default)]
struct BrokerState {
    /// Declared queues and their pending messages, oldest first.
    queues: HashMap<String, VecDeque<StoredMessage>>,

    /// Fetched-but-unacked deliveries by delivery tag, each under a lease.
    unacked: HashMap<String, UnackedMessage>,

    /// Fanout exchanges and the queue names bound to them.
    exchanges: HashMap<String, HashSet<String>>,
}

impl BrokerState {
    /// Return expired unacked deliveries to their queues.
    ///
    /// Runs on declare and fetch, so a consumer that died holding a
    /// delivery never strands it past the visibility timeout.
    fn reclaim_expired(&mut self, visibility_timeout: Duration) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .unacked
            .iter()
            .filter(|(_, unacked)| now.duration_since(unacked.leased_at) >= visibility_timeout)
            .map(|(tag, _)| tag.clone())
            .collect();

        for tag in expired {
            if let Some(unacked) = self.unacked.remove(&tag) {
                warn!(queue = %unacked.queue, delivery_tag = %tag, "Reclaiming expired delivery");
                self.queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(StoredMessage {
                        payload: unacked.payload,
                        redelivered: true,
                    });
            }
        }
    }
}

/// In-memory broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    fail_publishes: Arc<AtomicBool>,
    visibility_timeout: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            fail_publishes: Arc::new(AtomicBool::new(false)),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

impl MemoryBroker {
    /// Create a new empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lease duration on fetched deliveries.
    #[must_use]
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Make every subsequent publish/broadcast fail with a publish error.
    ///
    /// Simulates a severed channel for failure-policy tests.
    pub fn sever_publishes(&self, severed: bool) {
        self.fail_publishes.store(severed, Ordering::SeqCst);
    }

    /// Number of pending messages in a queue.
    #[must_use]
    pub fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Number of fetched-but-unacked deliveries.
    #[must_use]
    pub fn unacked_len(&self) -> usize {
        self.state.lock().unacked.len()
    }
}

#[async_trait]
impl BrokerTransport for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.reclaim_expired(self.visibility_timeout);
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(QueueError::Publish("channel severed".to_string()));
        }

        self.state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                payload: payload.to_vec(),
                redelivered: false,
            });
        Ok(())
    }

    async fn fetch(&self, queue: &str, consumer_tag: &str) -> QueueResult<Option<Delivery>> {
        let mut state = self.state.lock();
        state.reclaim_expired(self.visibility_timeout);

        let Some(messages) = state.queues.get_mut(queue) else {
            return Ok(None);
        };

        let Some(message) = messages.pop_front() else {
            return Ok(None);
        };

        let delivery_tag = Uuid::new_v4().to_string();
        state.unacked.insert(
            delivery_tag.clone(),
            UnackedMessage {
                queue: queue.to_string(),
                payload: message.payload.clone(),
                leased_at: Instant::now(),
            },
        );

        Ok(Some(Delivery {
            queue: queue.to_string(),
            payload: message.payload,
            delivery_tag,
            consumer_tag: consumer_tag.to_string(),
            redelivered: message.redelivered,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock();
        if state.unacked.remove(&delivery.delivery_tag).is_none() {
            return Err(QueueError::Consume(format!(
                "unknown delivery tag: {}",
                delivery.delivery_tag
            )));
        }
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock();
        let Some(unacked) = state.unacked.remove(&delivery.delivery_tag) else {
            return Err(QueueError::Consume(format!(
                "unknown delivery tag: {}",
                delivery.delivery_tag
            )));
        };

        state
            .queues
            .entry(unacked.queue)
            .or_default()
            .push_front(StoredMessage {
                payload: unacked.payload,
                redelivered: true,
            });
        Ok(())
    }

    async fn declare_fanout(&self, exchange: &str) -> QueueResult<()> {
        self.state
            .lock()
            .exchanges
            .entry(exchange.to_string())
            .or_default();
        Ok(())
    }

    async fn broadcast(&self, exchange: &str, payload: &[u8]) -> QueueResult<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(QueueError::Publish("channel severed".to_string()));
        }

        let mut state = self.state.lock();
        let bound: Vec<String> = state
            .exchanges
            .get(exchange)
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default();

        // No bound queues: the message is dropped, late joiners never see it.
        for queue in bound {
            state
                .queues
                .entry(queue)
                .or_default()
                .push_back(StoredMessage {
                    payload: payload.to_vec(),
                    redelivered: false,
                });
        }
        Ok(())
    }

    async fn bind_private_queue(
        &self,
        exchange: &str,
        subscriber_tag: &str,
    ) -> QueueResult<String> {
        let queue = format!("{}:sub:{}", exchange, subscriber_tag);
        let mut state = self.state.lock();
        state.queues.entry(queue.clone()).or_default();
        state
            .exchanges
            .entry(exchange.to_string())
            .or_default()
            .insert(queue.clone());
        Ok(queue)
    }

    async fn drop_private_queue(&self, exchange: &str, queue: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        if let Some(bound) = state.exchanges.get_mut(exchange) {
            bound.remove(queue);
        }
        state.queues.remove(queue);
        state.unacked.retain(|_, unacked| unacked.queue != queue);
        Ok(())
    }

    async fn health_check(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let broker = MemoryBroker::new();
        broker.declare_queue("test-queue").await.unwrap();
        broker.publish("test-queue", b"msg").await.unwrap();
        // Re-declaring an existing queue keeps its contents
        broker.declare_queue("test-queue").await.unwrap();
        assert_eq!(broker.queue_len("test-queue"), 1);
    }

    #[tokio::test]
    async fn test_fetch_ack_removes_message() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"one").await.unwrap();

        let delivery = broker.fetch("q", "c1").await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"one");
        assert_eq!(delivery.consumer_tag, "c1");
        assert_eq!(broker.queue_len("q"), 0);
        assert_eq!(broker.unacked_len(), 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.unacked_len(), 0);
    }

    #[tokio::test]
    async fn test_requeue_marks_redelivered() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"one").await.unwrap();

        let delivery = broker.fetch("q", "c1").await.unwrap().unwrap();
        assert!(!delivery.redelivered);
        broker.requeue(&delivery).await.unwrap();

        let redelivery = broker.fetch("q", "c2").await.unwrap().unwrap();
        assert!(redelivery.redelivered);
        assert_eq!(redelivery.payload, b"one");
    }

    #[tokio::test]
    async fn test_requeued_message_goes_first() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"first").await.unwrap();
        broker.publish("q", b"second").await.unwrap();

        let delivery = broker.fetch("q", "c1").await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"first");
        broker.requeue(&delivery).await.unwrap();

        // The requeued message is redelivered before newer ones
        let next = broker.fetch("q", "c1").await.unwrap().unwrap();
        assert_eq!(next.payload, b"first");
    }

    #[tokio::test]
    async fn test_expired_lease_reclaimed_on_fetch() {
        let broker =
            MemoryBroker::new().with_visibility_timeout(Duration::from_millis(10));
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"orphaned").await.unwrap();

        // c1 fetches and then disappears without ack or requeue
        let _abandoned = broker.fetch("q", "c1").await.unwrap().unwrap();
        assert_eq!(broker.queue_len("q"), 0);
        assert_eq!(broker.unacked_len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let reclaimed = broker.fetch("q", "c2").await.unwrap().unwrap();
        assert_eq!(reclaimed.payload, b"orphaned");
        assert!(reclaimed.redelivered);
        assert_eq!(broker.unacked_len(), 1);
    }

    #[tokio::test]
    async fn test_live_lease_not_reclaimed() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"held").await.unwrap();

        let held = broker.fetch("q", "c1").await.unwrap().unwrap();
        // Within the visibility timeout the delivery stays with c1
        assert!(broker.fetch("q", "c2").await.unwrap().is_none());
        broker.ack(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_reclaimed_on_declare() {
        let broker =
            MemoryBroker::new().with_visibility_timeout(Duration::from_millis(10));
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"orphaned").await.unwrap();
        let _abandoned = broker.fetch("q", "c1").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        broker.declare_queue("q").await.unwrap();
        assert_eq!(broker.queue_len("q"), 1);
        assert_eq!(broker.unacked_len(), 0);
    }

    #[tokio::test]
    async fn test_ack_unknown_tag_fails() {
        let broker = MemoryBroker::new();
        let ghost = Delivery {
            queue: "q".to_string(),
            payload: vec![],
            delivery_tag: "no-such-tag".to_string(),
            consumer_tag: "c1".to_string(),
            redelivered: false,
        };
        assert!(broker.ack(&ghost).await.is_err());
    }

    #[tokio::test]
    async fn test_each_message_fetched_once() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        for i in 0..3u8 {
            broker.publish("q", &[i]).await.unwrap();
        }

        // Two consumers pulling from the same queue partition the messages
        let d1 = broker.fetch("q", "consumer-1").await.unwrap().unwrap();
        let d2 = broker.fetch("q", "consumer-2").await.unwrap().unwrap();
        let d3 = broker.fetch("q", "consumer-1").await.unwrap().unwrap();
        assert!(broker.fetch("q", "consumer-2").await.unwrap().is_none());

        let mut seen = vec![d1.payload[0], d2.payload[0], d3.payload[0]];
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_bound_queues() {
        let broker = MemoryBroker::new();
        broker.declare_fanout("global").await.unwrap();
        let q1 = broker.bind_private_queue("global", "sub-1").await.unwrap();
        let q2 = broker.bind_private_queue("global", "sub-2").await.unwrap();

        broker.broadcast("global", b"Hello World!").await.unwrap();

        assert_eq!(broker.queue_len(&q1), 1);
        assert_eq!(broker.queue_len(&q2), 1);
    }

    #[tokio::test]
    async fn test_late_joiner_misses_earlier_broadcasts() {
        let broker = MemoryBroker::new();
        broker.declare_fanout("global").await.unwrap();

        // Broadcast before anyone is bound: dropped
        broker.broadcast("global", b"early").await.unwrap();

        let q = broker.bind_private_queue("global", "late").await.unwrap();
        assert_eq!(broker.queue_len(&q), 0);

        broker.broadcast("global", b"later").await.unwrap();
        assert_eq!(broker.queue_len(&q), 1);
    }

    #[tokio::test]
    async fn test_drop_private_queue_unbinds() {
        let broker = MemoryBroker::new();
        broker.declare_fanout("global").await.unwrap();
        let q = broker.bind_private_queue("global", "sub").await.unwrap();
        broker.drop_private_queue("global", &q).await.unwrap();

        broker.broadcast("global", b"after").await.unwrap();
        assert_eq!(broker.queue_len(&q), 0);
    }

    #[tokio::test]
    async fn test_severed_publish_fails() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q").await.unwrap();
        broker.sever_publishes(true);
        let err = broker.publish("q", b"x").await.unwrap_err();
        assert!(err.is_transient());

        broker.sever_publishes(false);
        assert!(broker.publish("q", b"x").await.is_ok());
    }
}
