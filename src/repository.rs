// src/repository.rs
//! Systems-of-record lookups the cache is filled from.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use crate::model::{Account, ApiKey, LiveDataHandler, LiveDataRoute, Sensor, SensorTrigger, TriggerInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    Unavailable(String),
    Decode(String),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::Unavailable(e) => write!(f, "repository unavailable: {}", e),
            RepositoryError::Decode(e) => write!(f, "repository decode error: {}", e),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Bulk and single-entity lookups used at cold start and on command replay.
/// Single lookups return `Ok(None)` when the entity no longer exists.
#[async_trait::async_trait]
pub trait RoutingRepository: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Account>, RepositoryError>;
    async fn account(&self, id: &str) -> Result<Option<Account>, RepositoryError>;

    async fn api_keys(&self) -> Result<Vec<ApiKey>, RepositoryError>;
    async fn api_key(&self, key: &str) -> Result<Option<ApiKey>, RepositoryError>;

    async fn sensors(&self) -> Result<Vec<Sensor>, RepositoryError>;
    async fn sensor(&self, id: &str) -> Result<Option<Sensor>, RepositoryError>;

    /// Trigger rows for every sensor, including sensors that may have been deleted.
    async fn trigger_info(&self) -> Result<Vec<TriggerInfo>, RepositoryError>;
    async fn trigger_info_for(&self, sensor_id: &str) -> Result<Vec<SensorTrigger>, RepositoryError>;

    async fn live_data_handlers(&self) -> Result<Vec<LiveDataHandler>, RepositoryError>;

    /// Standing subscriptions known to the store, if it tracks any.
    async fn live_data_routes(&self) -> Result<Vec<LiveDataRoute>, RepositoryError> {
        Ok(Vec::new())
    }
}

/// Contents of a seed file for [`MemoryRepository`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepositorySeed {
    pub accounts: Vec<Account>,
    pub api_keys: Vec<ApiKey>,
    pub sensors: Vec<Sensor>,
    pub triggers: Vec<TriggerInfo>,
    pub live_data_handlers: Vec<LiveDataHandler>,
    pub live_data_routes: Vec<LiveDataRoute>,
}

#[derive(Default)]
struct Store {
    accounts: HashMap<String, Account>,
    api_keys: HashMap<String, ApiKey>,
    sensors: HashMap<String, Sensor>,
    triggers: HashMap<String, Vec<SensorTrigger>>,
    handlers: Vec<LiveDataHandler>,
    routes: Vec<LiveDataRoute>,
}

/// In-process repository backed by plain maps.
#[derive(Default)]
pub struct MemoryRepository {
    store: RwLock<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: RepositorySeed) -> Self {
        let store = Store {
            accounts: seed.accounts.into_iter().map(|a| (a.id.clone(), a)).collect(),
            api_keys: seed.api_keys.into_iter().map(|k| (k.key.clone(), k)).collect(),
            sensors: seed.sensors.into_iter().map(|s| (s.id.clone(), s)).collect(),
            triggers: seed
                .triggers
                .into_iter()
                .map(|t| (t.sensor_id, t.triggers))
                .collect(),
            handlers: seed.live_data_handlers,
            routes: seed.live_data_routes,
        };
        Self {
            store: RwLock::new(store),
        }
    }

    /// Load a JSON seed file.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        let seed: RepositorySeed = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed {}", path.as_ref().display()))?;
        Ok(Self::from_seed(seed))
    }

    fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        f(&self.store.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Store) -> T) -> T {
        f(&mut self.store.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn upsert_account(&self, account: Account) {
        self.write(|s| s.accounts.insert(account.id.clone(), account));
    }

    pub fn remove_account(&self, id: &str) {
        self.write(|s| s.accounts.remove(id));
    }

    pub fn upsert_api_key(&self, key: ApiKey) {
        self.write(|s| s.api_keys.insert(key.key.clone(), key));
    }

    pub fn remove_api_key(&self, key: &str) {
        self.write(|s| s.api_keys.remove(key));
    }

    pub fn upsert_sensor(&self, sensor: Sensor) {
        self.write(|s| s.sensors.insert(sensor.id.clone(), sensor));
    }

    pub fn remove_sensor(&self, id: &str) {
        self.write(|s| s.sensors.remove(id));
    }

    pub fn set_triggers(&self, sensor_id: &str, triggers: Vec<SensorTrigger>) {
        self.write(|s| s.triggers.insert(sensor_id.to_string(), triggers));
    }

    pub fn set_live_data_handlers(&self, handlers: Vec<LiveDataHandler>) {
        self.write(|s| s.handlers = handlers);
    }
}

#[async_trait::async_trait]
impl RoutingRepository for MemoryRepository {
    async fn accounts(&self) -> Result<Vec<Account>, RepositoryError> {
        Ok(self.read(|s| s.accounts.values().cloned().collect()))
    }

    async fn account(&self, id: &str) -> Result<Option<Account>, RepositoryError> {
        Ok(self.read(|s| s.accounts.get(id).cloned()))
    }

    async fn api_keys(&self) -> Result<Vec<ApiKey>, RepositoryError> {
        Ok(self.read(|s| s.api_keys.values().cloned().collect()))
    }

    async fn api_key(&self, key: &str) -> Result<Option<ApiKey>, RepositoryError> {
        Ok(self.read(|s| s.api_keys.get(key).cloned()))
    }

    async fn sensors(&self) -> Result<Vec<Sensor>, RepositoryError> {
        Ok(self.read(|s| s.sensors.values().cloned().collect()))
    }

    async fn sensor(&self, id: &str) -> Result<Option<Sensor>, RepositoryError> {
        Ok(self.read(|s| s.sensors.get(id).cloned()))
    }

    async fn trigger_info(&self) -> Result<Vec<TriggerInfo>, RepositoryError> {
        Ok(self.read(|s| {
            s.triggers
                .iter()
                .map(|(sensor_id, triggers)| TriggerInfo {
                    sensor_id: sensor_id.clone(),
                    triggers: triggers.clone(),
                })
                .collect()
        }))
    }

    async fn trigger_info_for(&self, sensor_id: &str) -> Result<Vec<SensorTrigger>, RepositoryError> {
        Ok(self.read(|s| s.triggers.get(sensor_id).cloned().unwrap_or_default()))
    }

    async fn live_data_handlers(&self) -> Result<Vec<LiveDataHandler>, RepositoryError> {
        Ok(self.read(|s| s.handlers.clone()))
    }

    async fn live_data_routes(&self) -> Result<Vec<LiveDataRoute>, RepositoryError> {
        Ok(self.read(|s| s.routes.clone()))
    }
}
