//! Application configuration structures.

use courier_core::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the client harnesses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Broker endpoint configuration (queue harness).
    #[serde(default)]
    pub broker: BrokerEndpoint,

    /// Cache endpoint configuration (cache harness).
    #[serde(default)]
    pub cache: CacheEndpoint,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Broker endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    /// Broker URL.
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix namespacing everything the harness touches.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Lease on fetched deliveries in seconds; a consumer that dies
    /// without acking has its deliveries reclaimed after this long.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl BrokerEndpoint {
    /// Returns the connection timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the delivery lease as a Duration.
    #[must_use]
    pub const fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

fn default_broker_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "courier:queue".to_string()
}

fn default_visibility_timeout() -> u64 {
    30
}

/// Cache endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEndpoint {
    /// Cache host.
    #[serde(default = "default_cache_host")]
    pub host: String,

    /// Cache port.
    #[serde(default = "default_cache_port")]
    pub port: u16,

    /// Allow administrative commands on the connection.
    #[serde(default)]
    pub allow_admin: bool,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for CacheEndpoint {
    fn default() -> Self {
        Self {
            host: default_cache_host(),
            port: default_cache_port(),
            allow_admin: false,
            pool_size: default_pool_size(),
        }
    }
}

impl CacheEndpoint {
    /// Returns the cache connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

fn default_cache_host() -> String {
    "localhost".to_string()
}

fn default_cache_port() -> u16 {
    6379
}
