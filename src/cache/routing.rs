//! Process-wide snapshot of everything a routing decision needs.
//!
//! Sensors, accounts and API keys live in sharded [`MemoryCache`]s so writers
//! only contend per bucket. Live-data routes are a sensor -> targets index kept
//! apart from the sensor entries: flushing a sensor leaves its subscriptions in
//! place so a later reload picks them back up.

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::memory::{MemoryCache, MemoryCacheOptions};
use super::types::{CacheEntryOptions, CacheError, SweepStats};
use crate::command::LiveDataSync;
use crate::model::{Account, ApiKey, LiveDataHandler, LiveDataRoute, Sensor};

#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingCacheOptions {
    pub entry_timeout: Option<Duration>,
    pub sliding: bool,
    pub presize: usize,
}

impl RoutingCacheOptions {
    fn memory(&self) -> MemoryCacheOptions {
        MemoryCacheOptions {
            default_timeout: self.entry_timeout,
            sliding: self.sliding,
            capacity: None,
            presize: self.presize,
        }
    }
}

/// Entity counts for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RoutingCacheCounts {
    pub sensors: usize,
    pub accounts: usize,
    pub api_keys: usize,
    pub live_data_routes: usize,
    pub live_data_remotes: usize,
}

pub struct RoutingCache {
    sensors: MemoryCache<String, Arc<Sensor>>,
    accounts: MemoryCache<String, Arc<Account>>,
    api_keys: MemoryCache<String, Arc<ApiKey>>,
    live_routes: RwLock<HashMap<String, BTreeSet<String>>>,
    remotes: DashMap<String, LiveDataHandler>,
}

impl Default for RoutingCache {
    fn default() -> Self {
        Self::new(RoutingCacheOptions::default())
    }
}

impl RoutingCache {
    pub fn new(options: RoutingCacheOptions) -> Self {
        let memory = options.memory();
        Self {
            sensors: MemoryCache::new(memory),
            accounts: MemoryCache::new(memory),
            api_keys: MemoryCache::new(memory),
            live_routes: RwLock::new(HashMap::new()),
            remotes: DashMap::new(),
        }
    }

    /// Build on caches constructed elsewhere, e.g. with a manual clock.
    pub fn from_caches(
        sensors: MemoryCache<String, Arc<Sensor>>,
        accounts: MemoryCache<String, Arc<Account>>,
        api_keys: MemoryCache<String, Arc<ApiKey>>,
    ) -> Self {
        Self {
            sensors,
            accounts,
            api_keys,
            live_routes: RwLock::new(HashMap::new()),
            remotes: DashMap::new(),
        }
    }

    // Lookups

    pub fn sensor(&self, id: &str) -> Result<Arc<Sensor>, CacheError> {
        self.sensors.try_get(id)
    }

    pub fn account(&self, id: &str) -> Result<Arc<Account>, CacheError> {
        self.accounts.try_get(id)
    }

    pub fn api_key(&self, key: &str) -> Result<Arc<ApiKey>, CacheError> {
        self.api_keys.try_get(key)
    }

    /// Distinct targets subscribed to a sensor whose handler is known and enabled.
    pub fn live_data_targets(&self, sensor_id: &str) -> Vec<String> {
        let routes = self
            .live_routes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        routes
            .get(sensor_id)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|target| self.is_remote_enabled(target))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_remote_enabled(&self, name: &str) -> bool {
        self.remotes
            .get(name)
            .map(|handler| handler.enabled)
            .unwrap_or(false)
    }

    pub fn counts(&self) -> RoutingCacheCounts {
        let routes = self
            .live_routes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        RoutingCacheCounts {
            sensors: self.sensors.len(),
            accounts: self.accounts.len(),
            api_keys: self.api_keys.len(),
            live_data_routes: routes.values().map(BTreeSet::len).sum(),
            live_data_remotes: self.remotes.len(),
        }
    }

    // Bulk loads replace the whole index.

    pub fn load_sensors<I>(&self, sensors: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = Sensor>,
    {
        self.sensors.clear();
        self.sensors.add_or_update_range(
            sensors
                .into_iter()
                .map(|s| (s.id.clone(), Arc::new(s), CacheEntryOptions::default())),
        )
    }

    pub fn load_accounts<I>(&self, accounts: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = Account>,
    {
        self.accounts.clear();
        self.accounts.add_or_update_range(
            accounts
                .into_iter()
                .map(|a| (a.id.clone(), Arc::new(a), CacheEntryOptions::default())),
        )
    }

    pub fn load_api_keys<I>(&self, keys: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = ApiKey>,
    {
        self.api_keys.clear();
        self.api_keys.add_or_update_range(
            keys.into_iter()
                .map(|k| (k.key.clone(), Arc::new(k), CacheEntryOptions::default())),
        )
    }

    // Single-entity mutation

    pub fn append_sensor(&self, sensor: Sensor) -> Result<(), CacheError> {
        self.sensors.add_or_update(sensor.id.clone(), Arc::new(sensor))
    }

    pub fn append_account(&self, account: Account) -> Result<(), CacheError> {
        self.accounts
            .add_or_update(account.id.clone(), Arc::new(account))
    }

    pub fn append_api_key(&self, key: ApiKey) -> Result<(), CacheError> {
        self.api_keys.add_or_update(key.key.clone(), Arc::new(key))
    }

    pub fn remove_sensor(&self, id: &str) -> bool {
        self.sensors.try_remove(id)
    }

    pub fn remove_account(&self, id: &str) -> bool {
        self.accounts.try_remove(id)
    }

    pub fn remove_api_key(&self, key: &str) -> bool {
        self.api_keys.try_remove(key)
    }

    // Live data

    /// Subscribe a sensor to a target. Ignored unless the target is known and enabled.
    pub fn add_live_data_route(&self, route: &LiveDataRoute) -> bool {
        if !self.is_remote_enabled(&route.target) {
            debug!(target_name = %route.target, "ignoring route to unknown or disabled live data target");
            return false;
        }
        let mut routes = self
            .live_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        routes
            .entry(route.sensor_id.clone())
            .or_default()
            .insert(route.target.clone())
    }

    pub fn remove_live_data_route(&self, route: &LiveDataRoute) -> bool {
        let mut routes = self
            .live_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(targets) = routes.get_mut(&route.sensor_id) else {
            return false;
        };
        let removed = targets.remove(&route.target);
        if targets.is_empty() {
            routes.remove(&route.sensor_id);
        }
        removed
    }

    /// Replace every route of `sync.target` with exactly the listed sensors.
    /// An unknown or disabled target ends up with no routes.
    pub fn sync_live_data_routes(&self, sync: &LiveDataSync) -> usize {
        let enabled = self.is_remote_enabled(&sync.target);
        if !enabled {
            warn!(target_name = %sync.target, "sync for unknown or disabled live data target");
        }

        let mut routes = self
            .live_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        routes.retain(|_, targets| {
            targets.remove(&sync.target);
            !targets.is_empty()
        });
        if !enabled {
            return 0;
        }

        let mut added = 0;
        for sensor_id in &sync.sensors {
            if routes
                .entry(sensor_id.clone())
                .or_default()
                .insert(sync.target.clone())
            {
                added += 1;
            }
        }
        added
    }

    /// Replace the set of known live-data handlers.
    pub fn set_live_data_remotes<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = LiveDataHandler>,
    {
        let handlers: Vec<LiveDataHandler> = handlers.into_iter().collect();
        self.remotes
            .retain(|name, _| handlers.iter().any(|handler| &handler.name == name));
        for handler in handlers {
            self.remotes.insert(handler.name.clone(), handler);
        }
    }

    pub fn flush_live_data_routes(&self) {
        self.live_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop every cached entity and route ahead of a full resync.
    pub fn flush(&self) {
        self.sensors.clear();
        self.accounts.clear();
        self.api_keys.clear();
        self.flush_live_data_routes();
    }

    pub fn scan_for_expired_items(&self) -> SweepStats {
        [
            self.sensors.scan_for_expired_items(),
            self.accounts.scan_for_expired_items(),
            self.api_keys.scan_for_expired_items(),
        ]
        .into_iter()
        .fold(SweepStats::default(), |acc, s| SweepStats {
            expired: acc.expired + s.expired,
            scheduled: acc.scheduled + s.scheduled,
            removed: acc.removed + s.removed,
        })
    }
}
