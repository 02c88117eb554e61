//! Redis broker transport implementation.
//!
//! Queues are Redis lists: `publish` pushes on the left, `fetch` moves
//! the rightmost (oldest) element into a per-consumer pending list, `ack`
//! removes it from there and `requeue` moves it back to the right end of
//! the queue so it is redelivered first. Each fetch refreshes a lease key
//! with a TTL; once a consumer's lease expires its pending list is moved
//! back onto the queue, so a consumer crash never strands a delivery.
//! Fanout exchanges are sets of bound queue names written to with a
//! pipeline.

use super::BrokerKeys;
use crate::error::{QueueError, QueueResult};
use crate::transport::{BrokerTransport, Delivery};
use async_trait::async_trait;
use courier_config::BrokerEndpoint;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Redis-backed broker.
pub struct RedisBroker {
    pool: Pool,
    keys: BrokerKeys,
    visibility_timeout: Duration,
}

impl RedisBroker {
    /// Create a new Redis broker over an existing pool.
    pub fn new(pool: Pool, endpoint: &BrokerEndpoint) -> Self {
        let keys = BrokerKeys::new(&endpoint.key_prefix);
        Self {
            pool,
            keys,
            visibility_timeout: endpoint.visibility_timeout(),
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> QueueResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Move pending lists of consumers with expired leases back onto the
    /// queue. `own_tag` is skipped; its lease is refreshed by the caller.
    async fn reclaim_expired(
        &self,
        conn: &mut deadpool_redis::Connection,
        queue: &str,
        own_tag: Option<&str>,
    ) -> QueueResult<()> {
        let tags: Vec<String> = conn.smembers(self.keys.consumers(queue)).await?;

        for tag in tags {
            if Some(tag.as_str()) == own_tag {
                continue;
            }

            let alive: bool = conn.exists(self.keys.lease(queue, &tag)).await?;
            if alive {
                continue;
            }

            // Oldest-first back onto the fetch end, so reclaimed
            // deliveries go before newer messages.
            let pending_key = self.keys.pending(queue, &tag);
            let mut reclaimed = 0u64;
            loop {
                let moved: Option<Vec<u8>> = conn
                    .lmove(
                        &pending_key,
                        self.keys.queue(queue),
                        redis::Direction::Right,
                        redis::Direction::Right,
                    )
                    .await?;
                if moved.is_none() {
                    break;
                }
                reclaimed += 1;
            }

            let _: () = conn.srem(self.keys.consumers(queue), &tag).await?;
            if reclaimed > 0 {
                warn!(queue = %queue, consumer = %tag, reclaimed, "Reclaimed expired deliveries");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BrokerTransport for RedisBroker {
    async fn declare_queue(&self, queue: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(self.keys.queues(), queue).await?;
        self.reclaim_expired(&mut conn, queue, None).await?;
        debug!(queue = %queue, "Declared queue");
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(self.keys.queue(queue), payload).await?;
        Ok(())
    }

    async fn fetch(&self, queue: &str, consumer_tag: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.conn().await?;
        self.reclaim_expired(&mut conn, queue, Some(consumer_tag)).await?;

        // Register this consumer and refresh its lease before taking a
        // message, so a crash right after LMOVE is still reclaimable.
        let lease_ms = self.visibility_timeout.as_millis() as u64;
        let _: () = redis::pipe()
            .sadd(self.keys.consumers(queue), consumer_tag)
            .ignore()
            .cmd("SET")
            .arg(self.keys.lease(queue, consumer_tag))
            .arg(1)
            .arg("PX")
            .arg(lease_ms)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        // Atomically move the oldest message into this consumer's
        // pending list.
        let payload: Option<Vec<u8>> = conn
            .lmove(
                self.keys.queue(queue),
                self.keys.pending(queue, consumer_tag),
                redis::Direction::Right,
                redis::Direction::Left,
            )
            .await?;

        Ok(payload.map(|payload| Delivery {
            queue: queue.to_string(),
            payload,
            delivery_tag: Uuid::new_v4().to_string(),
            consumer_tag: consumer_tag.to_string(),
            // A list element carries no delivery history
            redelivered: false,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        // Removes one occurrence of the payload from the owner's pending
        // list. Identical payloads are interchangeable under
        // at-least-once.
        let removed: u64 = conn
            .lrem(
                self.keys.pending(&delivery.queue, &delivery.consumer_tag),
                1,
                delivery.payload.as_slice(),
            )
            .await?;

        if removed == 0 {
            return Err(QueueError::Consume(format!(
                "delivery not in pending list: {}",
                delivery.delivery_tag
            )));
        }
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        // RPUSH puts the message at the fetch end, so it is redelivered
        // before newer messages.
        let _: () = redis::pipe()
            .lrem(
                self.keys.pending(&delivery.queue, &delivery.consumer_tag),
                1,
                delivery.payload.as_slice(),
            )
            .rpush(self.keys.queue(&delivery.queue), delivery.payload.as_slice())
            .query_async(&mut *conn)
            .await?;

        debug!(queue = %delivery.queue, delivery_tag = %delivery.delivery_tag, "Requeued message");
        Ok(())
    }

    async fn declare_fanout(&self, exchange: &str) -> QueueResult<()> {
        // Bindings sets are created lazily on first bind; declaring is a
        // no-op beyond verifying the connection.
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("PING").query_async(&mut *conn).await?;
        debug!(exchange = %exchange, "Declared fanout exchange");
        Ok(())
    }

    async fn broadcast(&self, exchange: &str, payload: &[u8]) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let bound: Vec<String> = conn.smembers(self.keys.exchange(exchange)).await?;
        if bound.is_empty() {
            // No subscribers: drop the message
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for queue in &bound {
            pipe.lpush(self.keys.queue(queue), payload);
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!(exchange = %exchange, subscribers = bound.len(), "Broadcast message");
        Ok(())
    }

    async fn bind_private_queue(
        &self,
        exchange: &str,
        subscriber_tag: &str,
    ) -> QueueResult<String> {
        let queue = format!("{}:sub:{}", exchange, subscriber_tag);
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(self.keys.exchange(exchange), &queue).await?;
        debug!(exchange = %exchange, queue = %queue, "Bound private queue");
        Ok(queue)
    }

    async fn drop_private_queue(&self, exchange: &str, queue: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        // Pending lists and leases of whoever consumed the private queue
        // die with it.
        let tags: Vec<String> = conn.smembers(self.keys.consumers(queue)).await?;

        let mut pipe = redis::pipe();
        pipe.srem(self.keys.exchange(exchange), queue)
            .del(self.keys.queue(queue))
            .del(self.keys.consumers(queue));
        for tag in &tags {
            pipe.del(self.keys.pending(queue, tag))
                .del(self.keys.lease(queue, tag));
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!(exchange = %exchange, queue = %queue, "Dropped private queue");
        Ok(())
    }

    async fn health_check(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await?;

        if pong != "PONG" {
            warn!(response = %pong, "Unexpected PING response");
            return Err(QueueError::Connection(format!(
                "unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }
}
