//! Queue harness configuration.

use courier_config::BrokerEndpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the queue client harness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Broker endpoint configuration.
    #[serde(default)]
    pub endpoint: BrokerEndpoint,

    /// Producer loop configuration.
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Consumer loop configuration.
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Producer loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Delay between publish iterations in milliseconds.
    ///
    /// This is deliberate throttling between sends, not a timeout.
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Abort the loop after this many consecutive publish failures.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl ProducerConfig {
    /// Returns the publish interval as a Duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval() -> u64 {
    1000 // 1 second
}

fn default_max_consecutive_failures() -> u32 {
    5
}

/// Consumer loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Polling interval between empty fetches in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ConsumerConfig {
    /// Returns the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the shutdown timeout as a Duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_poll_interval() -> u64 {
    100 // 100ms
}

fn default_shutdown_timeout() -> u64 {
    30
}
