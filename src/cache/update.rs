//! Single writer path into the routing cache.
//!
//! Commands are applied strictly in arrival order by one task draining an
//! mpsc channel, so an `AddSensor` that waits on the repository can never land
//! after a `FlushSensor` that arrived later.

use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Span};

use super::routing::RoutingCache;
use super::types::CacheError;
use crate::command::{Command, CommandError};
use crate::model::Sensor;
use crate::repository::{RepositoryError, RoutingRepository};

#[derive(Debug)]
pub enum UpdateError {
    Command(CommandError),
    Repository(RepositoryError),
    Cache(CacheError),
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateError::Command(e) => write!(f, "{}", e),
            UpdateError::Repository(e) => write!(f, "{}", e),
            UpdateError::Cache(e) => write!(f, "cache update failed: {}", e),
        }
    }
}

impl std::error::Error for UpdateError {}

impl From<CommandError> for UpdateError {
    fn from(e: CommandError) -> Self {
        UpdateError::Command(e)
    }
}

impl From<RepositoryError> for UpdateError {
    fn from(e: RepositoryError) -> Self {
        UpdateError::Repository(e)
    }
}

impl From<CacheError> for UpdateError {
    fn from(e: CacheError) -> Self {
        UpdateError::Cache(e)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CommandStats {
    pub applied: u64,
    pub failed: u64,
    pub reloads: u64,
}

/// What one full reload put into the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReloadSummary {
    pub live_data_handlers: usize,
    pub accounts: usize,
    pub sensors: usize,
    pub orphan_triggers: usize,
    pub api_keys: usize,
    pub live_data_routes: usize,
}

pub struct CacheUpdateHandler {
    cache: Arc<RoutingCache>,
    repository: Arc<dyn RoutingRepository>,
    applied: AtomicU64,
    failed: AtomicU64,
    reloads: AtomicU64,
}

impl CacheUpdateHandler {
    pub fn new(cache: Arc<RoutingCache>, repository: Arc<dyn RoutingRepository>) -> Self {
        Self {
            cache,
            repository,
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CommandStats {
        CommandStats {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }

    /// Parse and apply one wire command. Failures are counted and logged; the
    /// caller moves on to the next command.
    pub async fn handle_raw(&self, payload: &[u8]) -> Result<(), UpdateError> {
        let result = match Command::parse(payload) {
            Ok(cmd) => self.apply(cmd).await,
            Err(e) => Err(e.into()),
        };
        match &result {
            Ok(()) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "cache update command failed");
            }
        }
        result
    }

    /// Apply one command to the cache.
    pub async fn apply(&self, cmd: Command) -> Result<(), UpdateError> {
        debug!(cmd = %cmd.command_type(), "applying cache update");
        match cmd {
            Command::FlushUser(id) | Command::DeleteUser(id) => {
                self.cache.remove_account(&id);
            }
            Command::FlushSensor(id) => {
                self.cache.remove_sensor(&id);
            }
            Command::FlushKey(key) => {
                self.cache.remove_api_key(&key);
            }
            Command::AddUser(id) => match self.repository.account(&id).await? {
                Some(account) => self.cache.append_account(account)?,
                None => {
                    warn!(account_id = %id, "account vanished from repository, evicting");
                    self.cache.remove_account(&id);
                }
            },
            Command::AddSensor(id) => self.reload_sensor(&id).await?,
            Command::AddKey(key) => match self.repository.api_key(&key).await? {
                Some(api_key) => self.cache.append_api_key(api_key)?,
                None => {
                    warn!("api key vanished from repository, evicting");
                    self.cache.remove_api_key(&key);
                }
            },
            Command::AddLiveDataSensor(route) => {
                if !self.cache.add_live_data_route(&route) {
                    debug!(sensor_id = %route.sensor_id, target_name = %route.target, "live data route not added");
                }
            }
            Command::RemoveLiveDataSensor(route) => {
                self.cache.remove_live_data_route(&route);
            }
            Command::SyncLiveDataSensors(sets) => {
                for set in &sets {
                    let added = self.cache.sync_live_data_routes(set);
                    info!(target_name = %set.target, added, "live data routes synced");
                }
            }
        }
        Ok(())
    }

    async fn reload_sensor(&self, id: &str) -> Result<(), UpdateError> {
        let (sensor, triggers) = futures::future::join(
            self.repository.sensor(id),
            self.repository.trigger_info_for(id),
        )
        .await;

        match sensor? {
            Some(mut sensor) => {
                let triggers = triggers?;
                if !triggers.is_empty() {
                    sensor.trigger_information = Some(triggers);
                }
                self.cache.append_sensor(sensor)?;
            }
            None => {
                warn!(sensor_id = %id, "sensor vanished from repository, evicting");
                self.cache.remove_sensor(id);
            }
        }
        Ok(())
    }

    /// Reload every index from the repository.
    #[tracing::instrument(
        name = "cache_reload",
        skip(self),
        fields(sensors = tracing::field::Empty, accounts = tracing::field::Empty)
    )]
    pub async fn reload(&self) -> Result<ReloadSummary, UpdateError> {
        let mut summary = ReloadSummary::default();

        let handlers = self.repository.live_data_handlers().await?;
        summary.live_data_handlers = handlers.len();
        self.cache.set_live_data_remotes(handlers);

        let accounts = self.repository.accounts().await?;
        summary.accounts = self.cache.load_accounts(accounts)?;

        let (sensors, triggers) = futures::future::join(
            self.repository.sensors(),
            self.repository.trigger_info(),
        )
        .await;
        let (sensors, orphans) = merge_triggers(sensors?, triggers?);
        summary.orphan_triggers = orphans;
        summary.sensors = self.cache.load_sensors(sensors)?;

        let keys = self.repository.api_keys().await?;
        summary.api_keys = self.cache.load_api_keys(keys)?;

        for route in self.repository.live_data_routes().await? {
            if self.cache.add_live_data_route(&route) {
                summary.live_data_routes += 1;
            }
        }

        self.reloads.fetch_add(1, Ordering::Relaxed);
        Span::current().record("sensors", summary.sensors);
        Span::current().record("accounts", summary.accounts);
        info!(
            sensors = summary.sensors,
            accounts = summary.accounts,
            api_keys = summary.api_keys,
            handlers = summary.live_data_handlers,
            "routing cache reloaded"
        );
        Ok(summary)
    }

    /// Apply raw commands in arrival order until the channel closes or the
    /// token is cancelled.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => break,
                next = commands.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };
            let _ = self.handle_raw(&payload).await;
        }
        debug!("command processor stopped");
    }
}

/// Attach trigger rows to their sensors. Rows for unknown sensors are skipped.
fn merge_triggers(
    sensors: Vec<Sensor>,
    triggers: Vec<crate::model::TriggerInfo>,
) -> (Vec<Sensor>, usize) {
    let known: HashSet<&str> = sensors.iter().map(|s| s.id.as_str()).collect();
    let mut by_sensor = std::collections::HashMap::new();
    let mut orphans = 0;
    for info in triggers {
        if !known.contains(info.sensor_id.as_str()) {
            warn!(sensor_id = %info.sensor_id, "trigger info for unknown sensor, skipping");
            orphans += 1;
            continue;
        }
        by_sensor
            .entry(info.sensor_id)
            .or_insert_with(Vec::new)
            .extend(info.triggers);
    }
    drop(known);

    let sensors = sensors
        .into_iter()
        .map(|mut sensor| {
            if let Some(triggers) = by_sensor.remove(&sensor.id) {
                sensor.trigger_information = Some(triggers);
            }
            sensor
        })
        .collect();
    (sensors, orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Account, ApiKey, LiveDataHandler, LiveDataRoute, SensorTrigger, TriggerInfo};
    use crate::repository::{MemoryRepository, RepositorySeed};

    fn seed() -> RepositorySeed {
        RepositorySeed {
            accounts: vec![Account {
                id: "a1".into(),
                billing_lockout: false,
                banned: false,
            }],
            api_keys: vec![ApiKey {
                key: "k1".into(),
                account_id: "a1".into(),
                revoked: false,
                read_only: false,
            }],
            sensors: vec![Sensor {
                id: "s1".into(),
                secret: "x".into(),
                account_id: "a1".into(),
                storage_enabled: true,
                trigger_information: None,
            }],
            triggers: vec![
                TriggerInfo {
                    sensor_id: "s1".into(),
                    triggers: vec![SensorTrigger {
                        has_actions: true,
                        is_text_trigger: false,
                    }],
                },
                TriggerInfo {
                    sensor_id: "ghost".into(),
                    triggers: vec![],
                },
            ],
            live_data_handlers: vec![LiveDataHandler {
                name: "dash".into(),
                enabled: true,
            }],
            live_data_routes: vec![LiveDataRoute::new("s1", "dash")],
        }
    }

    fn handler() -> (CacheUpdateHandler, Arc<RoutingCache>, Arc<MemoryRepository>) {
        let cache = Arc::new(RoutingCache::default());
        let repo = Arc::new(MemoryRepository::from_seed(seed()));
        (
            CacheUpdateHandler::new(cache.clone(), repo.clone()),
            cache,
            repo,
        )
    }

    #[tokio::test]
    async fn reload_merges_triggers_and_skips_orphans() {
        let (handler, cache, _) = handler();
        let summary = handler.reload().await.unwrap();

        assert_eq!(summary.sensors, 1);
        assert_eq!(summary.orphan_triggers, 1);
        assert_eq!(summary.live_data_routes, 1);
        assert!(cache.sensor("s1").unwrap().has_trigger(false));
        assert!(cache.api_key("k1").is_ok());
        assert_eq!(cache.live_data_targets("s1"), vec!["dash".to_string()]);
        assert_eq!(handler.stats().reloads, 1);
    }

    #[tokio::test]
    async fn flush_then_add_sensor_restores_entry() {
        let (handler, cache, _) = handler();
        handler.reload().await.unwrap();

        handler
            .handle_raw(br#"{"cmd":"FlushSensor","arguments":"s1"}"#)
            .await
            .unwrap();
        assert!(cache.sensor("s1").is_err());

        handler
            .handle_raw(br#"{"cmd":"AddSensor","arguments":"s1"}"#)
            .await
            .unwrap();
        let sensor = cache.sensor("s1").unwrap();
        assert!(sensor.has_trigger(false));
        assert_eq!(handler.stats().applied, 2);
    }

    #[tokio::test]
    async fn add_sensor_twice_is_idempotent() {
        let (handler, cache, _) = handler();
        handler.apply(Command::AddSensor("s1".into())).await.unwrap();
        let once = (cache.counts(), cache.sensor("s1").unwrap());
        handler.apply(Command::AddSensor("s1".into())).await.unwrap();
        assert_eq!((cache.counts(), cache.sensor("s1").unwrap()), once);
    }

    #[tokio::test]
    async fn add_for_vanished_entity_evicts() {
        let (handler, cache, repo) = handler();
        handler.reload().await.unwrap();
        repo.remove_account("a1");

        handler.apply(Command::AddUser("a1".into())).await.unwrap();
        assert!(cache.account("a1").is_err());
    }

    #[tokio::test]
    async fn delete_user_and_flush_key_remove_entries() {
        let (handler, cache, _) = handler();
        handler.reload().await.unwrap();

        handler.apply(Command::DeleteUser("a1".into())).await.unwrap();
        handler.apply(Command::FlushKey("k1".into())).await.unwrap();
        assert!(cache.account("a1").is_err());
        assert!(cache.api_key("k1").is_err());
    }

    #[tokio::test]
    async fn unknown_command_fails_alone() {
        let (handler, cache, _) = handler();
        let err = handler
            .handle_raw(br#"{"cmd":"Explode","arguments":"s1"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Command(CommandError::UnknownCommand(_))));

        handler
            .handle_raw(br#"{"cmd":"AddUser","arguments":"a1"}"#)
            .await
            .unwrap();
        assert!(cache.account("a1").is_ok());
        assert_eq!(handler.stats(), CommandStats { applied: 1, failed: 1, reloads: 0 });
    }

    #[tokio::test]
    async fn run_applies_commands_in_order() {
        let (handler, cache, _) = handler();
        let handler = Arc::new(handler);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(handler.clone().run(rx, cancel.clone()));

        tx.send(Bytes::from_static(br#"{"cmd":"AddSensor","arguments":"s1"}"#))
            .await
            .unwrap();
        tx.send(Bytes::from_static(br#"{"cmd":"FlushSensor","arguments":"s1"}"#))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(cache.sensor("s1").is_err());
        assert_eq!(handler.stats().applied, 2);
    }
}
