//! Message consumer over a broker transport.

use crate::config::ConsumerConfig;
use crate::error::{QueueError, QueueResult};
use crate::transport::{BrokerTransport, Delivery};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Consumer lifecycle state.
///
/// `ConnectionLost` is terminal: the loop returns the connection error and
/// a full reconnect (a new run) is required. There is no automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No broker connection.
    Disconnected,
    /// Connection verified, queue not yet declared.
    Connected,
    /// Queue declared and bound.
    QueueBound,
    /// Actively pulling messages.
    Consuming,
    /// Stopped cooperatively.
    Cancelled,
    /// The broker connection was severed mid-loop.
    ConnectionLost,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::QueueBound => "queue_bound",
            Self::Consuming => "consuming",
            Self::Cancelled => "cancelled",
            Self::ConnectionLost => "connection_lost",
        };
        f.write_str(name)
    }
}

/// Boxed async handler invoked once per delivered message.
///
/// Runs on the consume loop's task, concurrently with the rest of the
/// program; it must not assume mutual exclusion with the caller.
pub type MessageHandler =
    Box<dyn Fn(Delivery) -> BoxFuture<'static, Result<(), QueueError>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), QueueError>> + Send + 'static,
{
    Box::new(move |delivery| Box::pin(f(delivery)))
}

/// Pulls messages from a durable queue with explicit acknowledgement.
///
/// Each delivery is acked only after the handler returns `Ok`, so a
/// consumer that crashes mid-handling never loses the message
/// (at-least-once). Handler failures requeue the message for redelivery.
pub struct Consumer<T: BrokerTransport> {
    /// Unique consumer tag.
    tag: String,

    /// Broker transport handle.
    transport: Arc<T>,

    /// Loop configuration.
    config: ConsumerConfig,

    /// Lifecycle state.
    state: Arc<RwLock<ConsumerState>>,

    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,

    /// Loop-running flag.
    running: Arc<AtomicBool>,

    /// Messages handled and acked.
    processed: Arc<AtomicU64>,

    /// Messages whose handler failed (requeued).
    failed: Arc<AtomicU64>,
}

impl<T: BrokerTransport + 'static> Consumer<T> {
    /// Create a new consumer.
    pub fn new(transport: Arc<T>, config: ConsumerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            tag: format!("consumer-{}", Uuid::new_v4()),
            transport,
            config,
            state: Arc::new(RwLock::new(ConsumerState::Disconnected)),
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run the consume loop until cancelled or the connection is lost.
    ///
    /// Declares the queue, then repeatedly fetches, handles, and acks.
    /// A lost connection terminates the loop with the error and leaves
    /// the consumer in `ConnectionLost`.
    pub async fn run(&self, queue: &str, handler: MessageHandler) -> QueueResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Internal(
                "consume loop already running".to_string(),
            ));
        }

        let result = self.consume(queue, &handler).await;

        match &result {
            Ok(()) => self.set_state(ConsumerState::Disconnected),
            Err(e) if e.is_connection() => self.set_state(ConsumerState::ConnectionLost),
            Err(_) => self.set_state(ConsumerState::Disconnected),
        }

        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn consume(&self, queue: &str, handler: &MessageHandler) -> QueueResult<()> {
        // Subscribe before the first await so a stop() sent right after
        // run() started is not missed.
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.transport.health_check().await?;
        self.set_state(ConsumerState::Connected);

        self.transport.declare_queue(queue).await?;
        self.set_state(ConsumerState::QueueBound);

        info!(consumer = %self.tag, queue = %queue, "Waiting for messages");

        self.set_state(ConsumerState::Consuming);

        // Shutdown is observed only between iterations, never mid-fetch:
        // a fetch that completed is always handled and acked or requeued
        // before the loop can exit, so no delivery is stranded.
        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    info!(consumer = %self.tag, queue = %queue, "Consume loop cancelled");
                    self.set_state(ConsumerState::Cancelled);
                    return Ok(());
                }
                Err(_) => {}
            }

            match self.transport.fetch(queue, &self.tag).await {
                Ok(Some(delivery)) => self.handle_delivery(delivery, handler).await?,
                Ok(None) => {
                    // Queue empty, wait before polling again
                    if self.idle_or_shutdown(&mut shutdown_rx).await {
                        info!(consumer = %self.tag, queue = %queue, "Consume loop cancelled");
                        self.set_state(ConsumerState::Cancelled);
                        return Ok(());
                    }
                }
                Err(e) if e.is_connection() => {
                    error!(consumer = %self.tag, error = %e, "Broker connection lost");
                    return Err(e);
                }
                Err(e) => {
                    error!(consumer = %self.tag, error = %e, "Fetch failed");
                    if self.idle_or_shutdown(&mut shutdown_rx).await {
                        info!(consumer = %self.tag, queue = %queue, "Consume loop cancelled");
                        self.set_state(ConsumerState::Cancelled);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep one poll interval; returns true if shutdown arrived first.
    async fn idle_or_shutdown(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = shutdown_rx.recv() => true,
            () = tokio::time::sleep(self.config.poll_interval()) => false,
        }
    }

    async fn handle_delivery(
        &self,
        delivery: Delivery,
        handler: &MessageHandler,
    ) -> QueueResult<()> {
        debug!(
            consumer = %self.tag,
            delivery_tag = %delivery.delivery_tag,
            redelivered = delivery.redelivered,
            "Received message"
        );

        match handler(delivery.clone()).await {
            Ok(()) => {
                // Explicit ack only after the handler succeeded
                self.transport.ack(&delivery).await?;
                self.processed.fetch_add(1, Ordering::Relaxed);
                debug!(delivery_tag = %delivery.delivery_tag, "Acknowledged message");
            }
            Err(e) => {
                warn!(
                    delivery_tag = %delivery.delivery_tag,
                    error = %e,
                    "Handler failed, requeueing message"
                );
                self.transport.requeue(&delivery).await?;
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.write() = state;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        *self.state.read()
    }

    /// Signal the consume loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Stop the consume loop and wait for it to exit.
    ///
    /// Gives the loop up to the configured shutdown timeout to finish the
    /// delivery in flight; a loop still running past that returns an
    /// error and the unacked delivery is left to lease reclaim.
    pub async fn shutdown(&self) -> QueueResult<()> {
        self.stop();

        let wait = async {
            while self.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, wait).await.is_err() {
            warn!(consumer = %self.tag, timeout_secs = timeout.as_secs(), "Shutdown timed out");
            return Err(QueueError::Internal(format!(
                "consumer {} did not stop within {}s",
                self.tag,
                timeout.as_secs()
            )));
        }
        Ok(())
    }

    /// Check if a consume loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Messages handled and acked.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages whose handler failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// The unique consumer tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn fast_config() -> ConsumerConfig {
        ConsumerConfig {
            poll_interval_ms: 1,
            shutdown_timeout_secs: 1,
        }
    }

    async fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_consume_acks_messages() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("test-queue").await.unwrap();
        broker.publish("test-queue", b"one").await.unwrap();
        broker.publish("test-queue", b"two").await.unwrap();

        let consumer = Arc::new(Consumer::new(broker.clone(), fast_config()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let consumer = consumer.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                consumer
                    .run(
                        "test-queue",
                        message_handler(move |delivery: Delivery| {
                            let seen = seen.clone();
                            async move {
                                seen.lock().push(delivery.payload_utf8());
                                Ok(())
                            }
                        }),
                    )
                    .await
            })
        };

        assert!(wait_until(500, || consumer.processed() == 2).await);
        consumer.stop();
        task.await.unwrap().unwrap();

        assert_eq!(seen.lock().as_slice(), ["one", "two"]);
        assert_eq!(broker.unacked_len(), 0);
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn test_handler_failure_requeues() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"poison-then-fine").await.unwrap();

        let consumer = Arc::new(Consumer::new(broker.clone(), fast_config()));

        let task = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                consumer
                    .run(
                        "q",
                        message_handler(|delivery: Delivery| async move {
                            if !delivery.redelivered {
                                return Err(QueueError::Internal("first attempt fails".into()));
                            }
                            Ok(())
                        }),
                    )
                    .await
            })
        };

        // Fails once, is redelivered, then succeeds
        assert!(wait_until(500, || consumer.processed() == 1).await);
        assert_eq!(consumer.failed(), 1);

        consumer.stop();
        task.await.unwrap().unwrap();
        assert_eq!(broker.unacked_len(), 0);
    }

    #[tokio::test]
    async fn test_dead_consumer_delivery_reclaimed() {
        let broker = Arc::new(
            MemoryBroker::new().with_visibility_timeout(Duration::from_millis(10)),
        );
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"important").await.unwrap();

        // First consumer is killed mid-handler, holding the delivery
        let stalled = Arc::new(Consumer::new(broker.clone(), fast_config()));
        let task = {
            let stalled = stalled.clone();
            tokio::spawn(async move {
                stalled
                    .run(
                        "q",
                        message_handler(|_| async {
                            std::future::pending::<Result<(), QueueError>>().await
                        }),
                    )
                    .await
            })
        };
        assert!(wait_until(500, || broker.unacked_len() == 1).await);
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        // Past the visibility timeout the lease is expired
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A second consumer gets the message back, marked redelivered
        let consumer = Arc::new(Consumer::new(broker.clone(), fast_config()));
        let redelivered = Arc::new(AtomicBool::new(false));
        let task = {
            let consumer = consumer.clone();
            let redelivered = redelivered.clone();
            tokio::spawn(async move {
                consumer
                    .run(
                        "q",
                        message_handler(move |delivery: Delivery| {
                            let redelivered = redelivered.clone();
                            async move {
                                redelivered.store(delivery.redelivered, Ordering::SeqCst);
                                Ok(())
                            }
                        }),
                    )
                    .await
            })
        };

        assert!(wait_until(500, || consumer.processed() == 1).await);
        assert!(redelivered.load(Ordering::SeqCst));
        consumer.stop();
        task.await.unwrap().unwrap();
        assert_eq!(broker.unacked_len(), 0);
        assert_eq!(broker.queue_len("q"), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_loop_exit() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = Arc::new(Consumer::new(broker, fast_config()));

        let task = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                consumer
                    .run("q", message_handler(|_| async { Ok(()) }))
                    .await
            })
        };

        assert!(wait_until(500, || consumer.is_running()).await);
        consumer.shutdown().await.unwrap();
        assert!(!consumer.is_running());
        task.await.unwrap().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_handler() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("q").await.unwrap();
        broker.publish("q", b"stuck").await.unwrap();

        let config = ConsumerConfig {
            poll_interval_ms: 1,
            shutdown_timeout_secs: 0,
        };
        let consumer = Arc::new(Consumer::new(broker.clone(), config));

        let task = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                consumer
                    .run(
                        "q",
                        message_handler(|_| async {
                            std::future::pending::<Result<(), QueueError>>().await
                        }),
                    )
                    .await
            })
        };

        assert!(wait_until(500, || broker.unacked_len() == 1).await);
        let err = consumer.shutdown().await.unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_messages_partitioned_across_consumers() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue("q").await.unwrap();
        for i in 0..3u8 {
            broker.publish("q", format!("message-{}", i).as_bytes()).await.unwrap();
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumers: Vec<Arc<Consumer<MemoryBroker>>> = (0..2)
            .map(|_| Arc::new(Consumer::new(broker.clone(), fast_config())))
            .collect();

        let tasks: Vec<_> = consumers
            .iter()
            .map(|consumer| {
                let consumer = consumer.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    consumer
                        .run(
                            "q",
                            message_handler(move |delivery: Delivery| {
                                let seen = seen.clone();
                                async move {
                                    seen.lock().push(delivery.payload_utf8());
                                    Ok(())
                                }
                            }),
                        )
                        .await
                })
            })
            .collect();

        let total =
            || consumers.iter().map(|c| c.processed()).sum::<u64>();
        assert!(wait_until(500, || total() == 3).await);

        for consumer in &consumers {
            consumer.stop();
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Each message delivered to exactly one consumer
        let mut payloads = seen.lock().clone();
        payloads.sort();
        assert_eq!(payloads, ["message-0", "message-1", "message-2"]);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = Arc::new(Consumer::new(broker, fast_config()));
        assert_eq!(consumer.state(), ConsumerState::Disconnected);

        let task = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                consumer
                    .run("q", message_handler(|_| async { Ok(()) }))
                    .await
            })
        };

        assert!(
            wait_until(500, || consumer.state() == ConsumerState::Consuming).await
        );
        consumer.stop();
        task.await.unwrap().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_loop_rejected_while_running() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = Arc::new(Consumer::new(broker, fast_config()));

        let task = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                consumer
                    .run("q", message_handler(|_| async { Ok(()) }))
                    .await
            })
        };

        assert!(wait_until(500, || consumer.is_running()).await);
        let err = consumer
            .run("q", message_handler(|_| async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));

        consumer.stop();
        task.await.unwrap().unwrap();
        assert!(!consumer.is_running());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConsumerState::Consuming.to_string(), "consuming");
        assert_eq!(ConsumerState::ConnectionLost.to_string(), "connection_lost");
    }
}
