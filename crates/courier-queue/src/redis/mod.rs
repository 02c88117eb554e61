//! Redis-backed broker transport.

mod broker;

pub use broker::RedisBroker;

use crate::error::{QueueError, QueueResult};
use crate::retry::RetryPolicy;
use courier_config::BrokerEndpoint;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::{info, warn};

/// Create a Redis connection pool for the broker.
pub async fn create_pool(endpoint: &BrokerEndpoint) -> QueueResult<Pool> {
    info!("Creating Redis connection pool for broker...");

    let cfg = Config::from_url(&endpoint.url);

    let pool = cfg
        .builder()
        .map_err(|e| QueueError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(endpoint.pool_size)
        .create_timeout(Some(endpoint.connect_timeout()))
        .wait_timeout(Some(endpoint.connect_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Create a Redis connection pool, retrying connection failures per the
/// given policy.
///
/// Only connection errors are retried; configuration errors fail
/// immediately. Attempt numbers and delays are logged at warn level.
pub async fn connect_with_retry(
    endpoint: &BrokerEndpoint,
    policy: &RetryPolicy,
) -> QueueResult<Pool> {
    let mut attempt = 0u32;

    loop {
        match create_pool(endpoint).await {
            Ok(pool) => return Ok(pool),
            Err(e) if e.is_connection() => {
                attempt += 1;
                if !policy.should_retry(attempt) {
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Broker connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Redis key builder for broker queues and exchanges.
pub struct BrokerKeys {
    prefix: String,
}

impl BrokerKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Pending-messages list for a queue (oldest at the right).
    pub fn queue(&self, queue_name: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue_name)
    }

    /// Unacked-holding list for one consumer on a queue.
    pub fn pending(&self, queue_name: &str, consumer_tag: &str) -> String {
        format!("{}:pending:{}:{}", self.prefix, queue_name, consumer_tag)
    }

    /// Registry set of consumer tags holding pending lists on a queue.
    pub fn consumers(&self, queue_name: &str) -> String {
        format!("{}:consumers:{}", self.prefix, queue_name)
    }

    /// Lease key for one consumer on a queue; expiry marks the consumer
    /// dead and its pending list reclaimable.
    pub fn lease(&self, queue_name: &str, consumer_tag: &str) -> String {
        format!("{}:lease:{}:{}", self.prefix, queue_name, consumer_tag)
    }

    /// Registry set of declared queue names.
    pub fn queues(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    /// Bindings set for a fanout exchange (member = bound queue name).
    pub fn exchange(&self, exchange: &str) -> String {
        format!("{}:exchange:{}", self.prefix, exchange)
    }
}

impl Default for BrokerKeys {
    fn default() -> Self {
        Self::new("courier:queue")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_keys() {
        let keys = BrokerKeys::new("test");

        assert_eq!(keys.queue("default"), "test:queue:default");
        assert_eq!(keys.pending("default", "c1"), "test:pending:default:c1");
        assert_eq!(keys.consumers("default"), "test:consumers:default");
        assert_eq!(keys.lease("default", "c1"), "test:lease:default:c1");
        assert_eq!(keys.queues(), "test:queues");
        assert_eq!(keys.exchange("global"), "test:exchange:global");
    }

    #[test]
    fn test_default_prefix() {
        let keys = BrokerKeys::default();
        assert_eq!(keys.queue("q"), "courier:queue:queue:q");
    }
}
