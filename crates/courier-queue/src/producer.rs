//! Message producer over a broker transport.

use crate::config::ProducerConfig;
use crate::error::{QueueError, QueueResult};
use crate::transport::BrokerTransport;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Producer statistics.
#[derive(Debug, Clone)]
pub struct ProducerStats {
    /// Messages published successfully.
    pub sent: u64,

    /// Publish attempts that failed.
    pub failed: u64,

    /// Is a publish loop currently running.
    pub running: bool,
}

/// Publishes messages to a durable queue.
///
/// Supports single-shot sends and a throttled loop that runs until the
/// message factory signals the stop sentinel or [`Producer::stop`] is
/// called.
pub struct Producer<T: BrokerTransport> {
    /// Broker transport handle.
    transport: Arc<T>,

    /// Loop configuration.
    config: ProducerConfig,

    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,

    /// Loop-running flag.
    running: Arc<AtomicBool>,

    /// Sent counter.
    sent: Arc<AtomicU64>,

    /// Failed counter.
    failed: Arc<AtomicU64>,
}

impl<T: BrokerTransport + 'static> Producer<T> {
    /// Create a new producer.
    pub fn new(transport: Arc<T>, config: ProducerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            transport,
            config,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            sent: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish exactly one message and return.
    ///
    /// Declares the queue first (idempotent), then sends fire-and-forget.
    pub async fn publish_one(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        self.transport.declare_queue(queue).await?;

        match self.transport.publish(queue, payload).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                debug!(queue = %queue, bytes = payload.len(), "Sent message");
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Publish messages in a loop, one per configured interval.
    ///
    /// `factory` produces the next payload; returning `None` is the stop
    /// sentinel (the interactive samples' `exit` token). The loop also
    /// stops on [`Producer::stop`]. Transient publish failures are logged
    /// and counted; the loop aborts with a publish error once
    /// `max_consecutive_failures` is reached. Returns the number of
    /// messages sent by this invocation.
    pub async fn run_loop<F>(&self, queue: &str, mut factory: F) -> QueueResult<u64>
    where
        F: FnMut() -> Option<Vec<u8>> + Send,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Internal(
                "publish loop already running".to_string(),
            ));
        }

        let result = async {
            self.transport.declare_queue(queue).await?;

            info!(queue = %queue, interval_ms = self.config.interval_ms, "Starting publish loop");

            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let mut consecutive_failures = 0u32;
            let mut sent_this_run = 0u64;

            loop {
                let Some(payload) = factory() else {
                    debug!(queue = %queue, "Stop sentinel from message factory");
                    break;
                };

                match self.transport.publish(queue, &payload).await {
                    Ok(()) => {
                        consecutive_failures = 0;
                        sent_this_run += 1;
                        self.sent.fetch_add(1, Ordering::Relaxed);
                        debug!(queue = %queue, bytes = payload.len(), "Sent message");
                    }
                    Err(e) if e.is_transient() => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        consecutive_failures += 1;
                        warn!(
                            queue = %queue,
                            consecutive_failures,
                            error = %e,
                            "Publish failed, continuing"
                        );

                        if consecutive_failures >= self.config.max_consecutive_failures {
                            return Err(QueueError::Publish(format!(
                                "aborting after {} consecutive failures: {}",
                                consecutive_failures, e
                            )));
                        }
                    }
                    Err(e) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }

                // Deliberate throttling between iterations
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(queue = %queue, "Publish loop cancelled");
                        break;
                    }
                    () = tokio::time::sleep(self.config.interval()) => {}
                }
            }

            info!(queue = %queue, sent = sent_this_run, "Publish loop stopped");
            Ok(sent_this_run)
        }
        .await;

        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Signal the running publish loop to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Check if a publish loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get producer statistics.
    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}

/// A message factory producing `"<prefix> - <millis>"` payloads forever,
/// like the continuous-producer sample.
pub fn timestamp_factory(prefix: impl Into<String>) -> impl FnMut() -> Option<Vec<u8>> + Send {
    let prefix = prefix.into();
    move || {
        Some(
            format!("{} - {}", prefix, Utc::now().timestamp_millis())
                .into_bytes(),
        )
    }
}
