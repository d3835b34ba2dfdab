// src/config.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::cache::RoutingCacheOptions;
use crate::health::HealthLimits;

pub const DEFAULT_CONFIG_FILENAME: &str = "iot-router.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub routing: RoutingConfig,
    pub queues: QueueConfig,
    pub health: HealthConfig,
    pub cache: CacheConfig,
    pub reload: ReloadConfig,
    pub server: ServerConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Messages taken from the input queue per routing pass.
    pub dequeue_batch_size: usize,
    /// Sleep between passes when the input queue is empty.
    pub idle_interval_ms: u64,
    /// Measurements with more data points than this are rejected.
    pub max_data_points: usize,
    /// Republish measurements and messages on the public topic template.
    pub public_republish: bool,
    /// `$id` is replaced by the sensor id.
    pub actuator_topic_template: String,
    /// `$type` and `$id` are replaced.
    pub public_topic_template: String,
    pub command_channel_capacity: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            dequeue_batch_size: 1000,
            idle_interval_ms: 25,
            max_data_points: 25,
            public_republish: false,
            actuator_topic_template: "sensate/actuators/$id".to_string(),
            public_topic_template: "sensate/public/$type/$id".to_string(),
            command_channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub flush_interval_ms: u64,
    /// Upper bound on the final flush at shutdown.
    pub shutdown_grace_ms: u64,
    /// `$type` is `measurements` or `messages`.
    pub trigger_topic_template: String,
    /// `$type` is `measurements`, `messages` or `control`; `$target` the consumer name.
    pub live_data_topic_template: String,
    pub measurement_storage_topic: String,
    pub message_storage_topic: String,
    pub network_event_topic: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            shutdown_grace_ms: 5000,
            trigger_topic_template: "sensate/trigger/$type".to_string(),
            live_data_topic_template: "sensate/live/$type/$target".to_string(),
            measurement_storage_topic: "sensate/storage/measurements".to_string(),
            message_storage_topic: "sensate/storage/messages".to_string(),
            network_event_topic: "sensate/network/events".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub default_queue_limit: usize,
    pub input_queue_limit: Option<usize>,
    pub public_queue_limit: Option<usize>,
    pub live_data_queue_limit: Option<usize>,
    pub trigger_queue_limit: Option<usize>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_queue_limit: 10_000,
            input_queue_limit: None,
            public_queue_limit: None,
            live_data_queue_limit: None,
            trigger_queue_limit: None,
        }
    }
}

impl HealthConfig {
    pub fn limits(&self) -> HealthLimits {
        let limit = |value: Option<usize>| value.unwrap_or(self.default_queue_limit);
        HealthLimits {
            input: limit(self.input_queue_limit),
            public: limit(self.public_queue_limit),
            live_data: limit(self.live_data_queue_limit),
            trigger: limit(self.trigger_queue_limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Idle time before an entry expires. 0 keeps entries until the next reload.
    pub entry_timeout_secs: u64,
    pub sliding_expiration: bool,
    pub sweep_interval_ms: u64,
    pub presize: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_timeout_secs: 0,
            sliding_expiration: true,
            sweep_interval_ms: 60_000,
            presize: 1024,
        }
    }
}

impl CacheConfig {
    pub fn options(&self) -> RoutingCacheOptions {
        RoutingCacheOptions {
            entry_timeout: (self.entry_timeout_secs > 0)
                .then(|| Duration::from_secs(self.entry_timeout_secs)),
            sliding: self.sliding_expiration,
            presize: self.presize,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Fill the cache from the repository before routing starts.
    pub initial_load: bool,
    /// Repeat the full reload on an interval.
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            initial_load: true,
            enabled: false,
            interval_secs: 300,
        }
    }
}

impl ReloadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub kind: PublisherKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    /// How long a transport failure marks the publisher disconnected.
    pub reconnect_after_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: PublisherKind::Log,
            base_url: None,
            timeout_ms: 5000,
            reconnect_after_ms: 30_000,
        }
    }
}

impl PublisherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_after(&self) -> Duration {
        Duration::from_millis(self.reconnect_after_ms)
    }
}

impl RouterConfig {
    /// Reject settings the router cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.routing.dequeue_batch_size == 0 {
            bail!("routing.dequeue_batch_size must be greater than 0");
        }
        if self.routing.command_channel_capacity == 0 {
            bail!("routing.command_channel_capacity must be greater than 0");
        }
        if self.queues.flush_interval_ms == 0 {
            bail!("queues.flush_interval_ms must be greater than 0");
        }
        if self.cache.sweep_interval_ms == 0 {
            bail!("cache.sweep_interval_ms must be greater than 0");
        }
        if self.reload.enabled && self.reload.interval_secs == 0 {
            bail!("reload.interval_secs must be greater than 0 when reload is enabled");
        }
        if self.publisher.kind == PublisherKind::Http && self.publisher.base_url.is_none() {
            bail!("publisher.base_url is required for the http publisher");
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", self.server.listen))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<RouterConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: RouterConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}
