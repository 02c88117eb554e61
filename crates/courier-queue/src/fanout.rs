//! Fanout (broadcast) messaging over a broker transport.
//!
//! A fanout exchange copies every message to all currently bound
//! subscriber queues. Subscribers that join later never see earlier
//! messages, and a broadcast with no subscribers is silently dropped.

use crate::config::ConsumerConfig;
use crate::consumer::MessageHandler;
use crate::error::QueueResult;
use crate::transport::BrokerTransport;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Broadcasts messages to all subscribers of a fanout exchange.
pub struct FanoutProducer<T: BrokerTransport> {
    transport: Arc<T>,
    sent: AtomicU64,
}

impl<T: BrokerTransport + 'static> FanoutProducer<T> {
    /// Create a new fanout producer.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            sent: AtomicU64::new(0),
        }
    }

    /// Broadcast one message to every bound subscriber queue.
    ///
    /// Declares the exchange first (idempotent). Succeeds even when no
    /// subscriber is bound; the message is then dropped by the broker.
    pub async fn broadcast(&self, exchange: &str, payload: &[u8]) -> QueueResult<()> {
        self.transport.declare_fanout(exchange).await?;
        self.transport.broadcast(exchange, payload).await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(exchange = %exchange, bytes = payload.len(), "Broadcast message");
        Ok(())
    }

    /// Messages broadcast so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// Receives broadcasts through a private, per-subscriber queue.
///
/// The private queue exists only while the subscriber runs; it is
/// created on `run` and dropped on every exit path, so an offline
/// subscriber accumulates nothing.
pub struct FanoutSubscriber<T: BrokerTransport> {
    /// Unique subscriber tag, used to name the private queue.
    tag: String,

    transport: Arc<T>,
    config: ConsumerConfig,
    shutdown_tx: broadcast::Sender<()>,
    received: Arc<AtomicU64>,

    /// Name of the bound private queue while running.
    queue: Arc<RwLock<Option<String>>>,
}

impl<T: BrokerTransport + 'static> FanoutSubscriber<T> {
    /// Create a new fanout subscriber.
    pub fn new(transport: Arc<T>, config: ConsumerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            tag: format!("subscriber-{}", Uuid::new_v4()),
            transport,
            config,
            shutdown_tx,
            received: Arc::new(AtomicU64::new(0)),
            queue: Arc::new(RwLock::new(None)),
        }
    }

    /// Subscribe to an exchange and handle broadcasts until stopped.
    ///
    /// Binds a private queue, then fetches and acks each broadcast
    /// immediately. Handler failures are logged but never requeue the
    /// message: a private queue dies with its subscriber, so redelivery
    /// buys nothing.
    pub async fn run(&self, exchange: &str, handler: MessageHandler) -> QueueResult<()> {
        self.transport.declare_fanout(exchange).await?;
        let queue = self.transport.bind_private_queue(exchange, &self.tag).await?;
        *self.queue.write() = Some(queue.clone());

        info!(subscriber = %self.tag, exchange = %exchange, queue = %queue, "Waiting for broadcasts");

        let result = self.receive_loop(&queue, &handler).await;

        // Teardown on every exit path
        if let Err(e) = self.transport.drop_private_queue(exchange, &queue).await {
            error!(subscriber = %self.tag, error = %e, "Failed to drop private queue");
        }
        *self.queue.write() = None;

        result
    }

    async fn receive_loop(&self, queue: &str, handler: &MessageHandler) -> QueueResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(subscriber = %self.tag, "Fanout subscription cancelled");
                    return Ok(());
                }

                fetched = self.transport.fetch(queue, &self.tag) => {
                    match fetched {
                        Ok(Some(delivery)) => {
                            // Ack before handling: broadcasts are not redelivered
                            self.transport.ack(&delivery).await?;
                            self.received.fetch_add(1, Ordering::Relaxed);

                            if let Err(e) = handler(delivery).await {
                                error!(subscriber = %self.tag, error = %e, "Broadcast handler failed");
                            }
                        }
                        Ok(None) => {
                            tokio::time::sleep(self.config.poll_interval()).await;
                        }
                        Err(e) if e.is_connection() => {
                            error!(subscriber = %self.tag, error = %e, "Broker connection lost");
                            return Err(e);
                        }
                        Err(e) => {
                            error!(subscriber = %self.tag, error = %e, "Fetch failed");
                            tokio::time::sleep(self.config.poll_interval()).await;
                        }
                    }
                }
            }
        }
    }

    /// Signal the subscription loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Broadcasts received so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Name of the bound private queue, if currently subscribed.
    pub fn queue_name(&self) -> Option<String> {
        self.queue.read().clone()
    }

    /// The unique subscriber tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}
