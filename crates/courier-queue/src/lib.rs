//! Courier Queue - Durable Queue Client Harness
//!
//! A broker-backed work-queue client with:
//! - Fire-and-forget publishing, single-shot or throttled loop
//! - Pull consumers with explicit acknowledgement (at-least-once)
//! - Handler-failure requeue and redelivery
//! - Fanout exchanges with private per-subscriber queues
//! - Cooperative cancellation of every long-running loop
//! - Injectable retry policies for broker connection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Courier Queue Harness                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                           │
//! │  Producer ──publish──►  ┌───────────────────────────┐    │
//! │                         │     BrokerTransport        │    │
//! │  Consumer ◄──fetch────  │  (Redis / in-memory)       │    │
//! │     │                   │                            │    │
//! │     └──ack / requeue──► │  queue ──► pending (unacked)│   │
//! │                         └───────────────────────────┘    │
//! │                                                           │
//! │  FanoutProducer ──broadcast──► exchange ──┬──► sub queue  │
//! │                                           └──► sub queue  │
//! │  FanoutSubscriber ◄──fetch── private queue (per tag)      │
//! │                                                           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_queue::{Consumer, Producer, message_handler, MemoryBroker};
//! use std::sync::Arc;
//!
//! let broker = Arc::new(MemoryBroker::new());
//!
//! let producer = Producer::new(broker.clone(), Default::default());
//! producer.publish_one("test-queue", b"Hello World").await?;
//!
//! let consumer = Consumer::new(broker, Default::default());
//! consumer.run("test-queue", message_handler(|delivery| async move {
//!     println!("received: {}", delivery.payload_utf8());
//!     Ok(())
//! })).await?;
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod fanout;
pub mod memory;
pub mod producer;
pub mod redis;
pub mod retry;
pub mod transport;

pub use config::{ConsumerConfig, ProducerConfig, QueueConfig};
pub use consumer::{message_handler, Consumer, ConsumerState, MessageHandler};
pub use error::{QueueError, QueueResult};
pub use fanout::{FanoutProducer, FanoutSubscriber};
pub use memory::MemoryBroker;
pub use producer::{timestamp_factory, Producer, ProducerStats};
pub use redis::{connect_with_retry, create_pool, BrokerKeys, RedisBroker};
pub use retry::{RetryPolicy, RetryStrategy};
pub use transport::{BrokerTransport, Delivery};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::consumer::{message_handler, Consumer, ConsumerState};
    pub use crate::producer::Producer;
    pub use crate::transport::{BrokerTransport, Delivery};
    pub use crate::{QueueError, QueueResult};
}
