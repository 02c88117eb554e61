//! Courier Cache - Keyed Cache Client Harness
//!
//! A typed client over an external keyed store with:
//! - JSON-encoded set/get with default-on-missing semantics
//! - Idempotent delete and existence checks
//! - Best-effort change notifications over pub/sub
//! - At most one notification subscription per client, fed through a
//!   bounded queue so slow callbacks never stall the publisher
//! - Swappable backends (Redis or in-memory)
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_cache::{CacheClient, MemoryCacheStore};
//! use std::sync::Arc;
//!
//! let client = CacheClient::new(Arc::new(MemoryCacheStore::new()));
//!
//! client.subscribe(|message| println!("{}", message)).await?;
//! client.set("a", &1i64).await?;
//!
//! let value: i64 = client.get("a").await?;
//! assert_eq!(value, 1);
//! ```

pub mod backend;
pub mod client;
pub mod memory_store;
pub mod notify;
pub mod redis_store;

pub use backend::{CacheBackend, Subscription, NOTIFICATION_QUEUE_DEPTH};
pub use client::{CacheClient, NotificationHandler};
pub use memory_store::MemoryCacheStore;
pub use notify::{change_notification, EVENT_LOG_CHANNEL};
pub use redis_store::RedisCacheStore;
