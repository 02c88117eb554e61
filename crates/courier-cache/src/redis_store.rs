//! Redis-based cache backend.

use crate::backend::{CacheBackend, Subscription, NOTIFICATION_QUEUE_DEPTH};
use async_trait::async_trait;
use courier_config::CacheEndpoint;
use courier_core::{CourierError, CourierResult};
use deadpool_redis::{redis::AsyncCommands, Pool, Runtime};
use futures::StreamExt;
use shaku::Component;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Redis-backed cache store.
///
/// Key/value operations run over a pooled connection; `subscribe` opens
/// a dedicated pub/sub connection from the client, since a subscribed
/// Redis connection cannot serve regular commands.
#[derive(Component)]
#[shaku(interface = CacheBackend)]
pub struct RedisCacheStore {
    /// Pooled connections for KV operations.
    pool: Option<Arc<Pool>>,

    /// Client handle for dedicated pub/sub connections.
    client: Option<redis::Client>,
}

impl RedisCacheStore {
    /// Create a store over an existing pool and client.
    #[must_use]
    pub fn new(pool: Arc<Pool>, client: redis::Client) -> Self {
        Self {
            pool: Some(pool),
            client: Some(client),
        }
    }

    /// Connect to the cache endpoint, verifying reachability with a PING.
    pub async fn connect(endpoint: &CacheEndpoint) -> CourierResult<Self> {
        let url = endpoint.url();
        info!(host = %endpoint.host, port = endpoint.port, "Connecting cache store...");

        let cfg = deadpool_redis::Config::from_url(&url);
        let pool = cfg
            .builder()
            .map_err(|e| CourierError::configuration(format!("Invalid cache config: {}", e)))?
            .max_size(endpoint.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CourierError::configuration(format!("Failed to create pool: {}", e)))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CourierError::connection(format!("Cache unreachable: {}", e)))?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| CourierError::connection(format!("Cache PING failed: {}", e)))?;

        let client = redis::Client::open(url)
            .map_err(|e| CourierError::configuration(format!("Invalid cache URL: {}", e)))?;

        info!("Cache store connected");
        Ok(Self::new(Arc::new(pool), client))
    }

    /// Create a disconnected store (for when the cache is disabled).
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            pool: None,
            client: None,
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> CourierResult<deadpool_redis::Connection> {
        match &self.pool {
            Some(pool) => pool
                .get()
                .await
                .map_err(|e| CourierError::connection(format!("Failed to get connection: {}", e))),
            None => Err(CourierError::connection("cache store is not connected")),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheStore {
    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn get_raw(&self, key: &str) -> CourierResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CourierError::internal(format!("Failed to get key '{}': {}", key, e)))?;

        match &value {
            Some(_) => debug!(key = %key, "Cache hit"),
            None => debug!(key = %key, "Cache miss"),
        }

        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: &str) -> CourierResult<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| CourierError::internal(format!("Failed to set key '{}': {}", key, e)))?;

        debug!(key = %key, bytes = value.len(), "Cached value");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CourierResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| CourierError::internal(format!("Failed to delete key '{}': {}", key, e)))?;

        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> CourierResult<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| CourierError::internal(format!("Failed to check key '{}': {}", key, e)))?;

        Ok(exists)
    }

    async fn publish(&self, channel: &str, message: &str) -> CourierResult<()> {
        let mut conn = self.conn().await?;
        let receivers: i64 = conn.publish(channel, message).await.map_err(|e| {
            CourierError::publish(format!("Failed to publish on '{}': {}", channel, e))
        })?;

        debug!(channel = %channel, receivers, "Published notification");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CourierResult<Subscription> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CourierError::connection("cache store is not connected"))?;

        let mut pubsub = client.get_async_pubsub().await.map_err(|e| {
            CourierError::subscription(format!("Failed to open pub/sub connection: {}", e))
        })?;
        pubsub.subscribe(channel).await.map_err(|e| {
            CourierError::subscription(format!("Failed to subscribe to '{}': {}", channel, e))
        })?;

        debug!(channel = %channel, "Subscribed");

        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);
        let channel_name = channel.to_string();

        let forwarder = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel_name, error = %e, "Dropping undecodable message");
                        continue;
                    }
                };

                // Receiver gone: subscription was closed
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, forwarder))
    }
}
