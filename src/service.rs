// src/service.rs
//! The message router and the background tasks that keep it running.
//!
//! Four loops share one [`CancellationToken`]: routing (drain the input queue
//! through the pipeline), flush (publish remote queues), sweep (expire cache
//! entries) and command processing. A fifth reloads the cache when enabled.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheUpdateHandler, CommandStats, RoutingCache, RoutingCacheCounts, UpdateError,
};
use crate::collections::Deque;
use crate::config::RouterConfig;
use crate::health::{HealthMonitor, HealthReport};
use crate::message::PlatformMessage;
use crate::queue::{FlushResult, Publisher, QueueDepths, RemoteQueues};
use crate::repository::RoutingRepository;
use crate::routing::{CompositeRouter, RouterStatsSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The command processor has stopped.
    ShuttingDown,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::ShuttingDown => write!(f, "router is shutting down"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Result of one routing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub routed: usize,
    pub rejected: usize,
}

impl BatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.routed == 0 && self.rejected == 0
    }
}

/// Everything the status endpoint reports.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub healthy: bool,
    pub explanations: Vec<String>,
    pub queues: QueueDepths,
    pub router: RouterStatsSnapshot,
    pub commands: CommandStats,
    pub cache: RoutingCacheCounts,
}

/// Input queue, pipeline and outbound queues.
pub struct MessageRouter {
    input: Deque<PlatformMessage>,
    pipeline: CompositeRouter,
    cache: Arc<RoutingCache>,
    queues: Arc<RemoteQueues>,
    publisher: Arc<dyn Publisher>,
    health: HealthMonitor,
    batch_size: usize,
}

impl MessageRouter {
    pub fn new(
        config: &RouterConfig,
        cache: Arc<RoutingCache>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let queues = Arc::new(RemoteQueues::new(&config.queues));
        Self {
            input: Deque::new(),
            pipeline: CompositeRouter::standard(cache.clone(), queues.clone(), &config.routing),
            cache,
            queues,
            publisher,
            health: HealthMonitor::new(config.health.limits()),
            batch_size: config.routing.dequeue_batch_size.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<RoutingCache> {
        &self.cache
    }

    pub fn queues(&self) -> &Arc<RemoteQueues> {
        &self.queues
    }

    pub fn submit(&self, message: PlatformMessage) {
        self.input.add(message);
    }

    pub fn submit_range<I>(&self, messages: I)
    where
        I: IntoIterator<Item = PlatformMessage>,
    {
        self.input.add_range(messages);
    }

    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Take up to one batch off the input queue and route it.
    pub fn try_route_batch(&self) -> BatchOutcome {
        let batch = self.input.dequeue_range(self.batch_size);
        let mut outcome = BatchOutcome::default();
        for message in &batch {
            match self.pipeline.route(message) {
                Ok(_) => outcome.routed += 1,
                Err(reason) => {
                    debug!(sensor_id = %message.sensor_id(), reason = %reason, "message rejected");
                    outcome.rejected += 1;
                }
            }
        }
        outcome
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            input: self.input.len(),
            ..self.queues.depths()
        }
    }

    pub fn health(&self) -> HealthReport {
        self.health
            .evaluate(&self.depths(), self.publisher.is_connected())
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.pipeline.stats()
    }

    /// Publish everything currently queued.
    pub async fn flush_once(&self) -> FlushResult {
        let result = self.queues.flush_all(self.publisher.as_ref()).await;
        if !result.failed.is_empty() {
            warn!(
                failed = result.failed.len(),
                delivered = result.delivered(),
                "flush completed with failures"
            );
        }
        result
    }
}

/// A running router: the [`MessageRouter`], the cache update path and the
/// tasks driving both.
pub struct RouterService {
    router: Arc<MessageRouter>,
    updates: Arc<CacheUpdateHandler>,
    commands: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl RouterService {
    /// Build the cache, optionally load it, and spawn the background tasks.
    #[tracing::instrument(name = "router_start", skip_all)]
    pub async fn start(
        config: &RouterConfig,
        repository: Arc<dyn RoutingRepository>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, UpdateError> {
        let cache = Arc::new(RoutingCache::new(config.cache.options()));
        let updates = Arc::new(CacheUpdateHandler::new(cache.clone(), repository));
        if config.reload.initial_load {
            updates.reload().await?;
        }

        let router = Arc::new(MessageRouter::new(config, cache.clone(), publisher));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(config.routing.command_channel_capacity.max(1));

        let mut tasks = vec![
            tokio::spawn(routing_loop(
                router.clone(),
                Duration::from_millis(config.routing.idle_interval_ms.max(1)),
                cancel.clone(),
            )),
            tokio::spawn(flush_loop(
                router.clone(),
                config.queues.flush_interval(),
                cancel.clone(),
            )),
            tokio::spawn(sweep_loop(cache, config.cache.sweep_interval(), cancel.clone())),
            tokio::spawn(updates.clone().run(rx, cancel.clone())),
        ];
        if config.reload.enabled {
            tasks.push(tokio::spawn(reload_loop(
                updates.clone(),
                config.reload.interval(),
                cancel.clone(),
            )));
        }

        info!(tasks = tasks.len(), "router started");
        Ok(Self {
            router,
            updates,
            commands: tx,
            cancel,
            tasks: Mutex::new(tasks),
            shutdown_grace: config.queues.shutdown_grace(),
        })
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn updates(&self) -> &Arc<CacheUpdateHandler> {
        &self.updates
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept a stamped message onto the input queue.
    pub fn submit(&self, mut message: PlatformMessage) {
        message.set_platform_timestamp(Utc::now());
        self.router.submit(message);
    }

    /// Queue a raw wire command for in-order application.
    pub async fn submit_command(&self, payload: Bytes) -> Result<(), ServiceError> {
        self.commands
            .send(payload)
            .await
            .map_err(|_| ServiceError::ShuttingDown)
    }

    pub fn health(&self) -> HealthReport {
        self.router.health()
    }

    pub fn status(&self) -> RouterStatus {
        let report = self.router.health();
        RouterStatus {
            healthy: report.healthy,
            explanations: report.explanations,
            queues: self.router.depths(),
            router: self.router.stats(),
            commands: self.updates.stats(),
            cache: self.router.cache().counts(),
        }
    }

    /// Stop every task, route what is still queued, and attempt one final
    /// flush bounded by the grace period.
    pub async fn shutdown(&self) -> Option<FlushResult> {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        while !self.router.try_route_batch().is_empty() {}

        match tokio::time::timeout(self.shutdown_grace, self.router.flush_once()).await {
            Ok(result) => {
                info!(
                    delivered = result.delivered(),
                    failed = result.failed.len(),
                    "final flush complete"
                );
                Some(result)
            }
            Err(_) => {
                warn!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "final flush did not finish within the grace period"
                );
                None
            }
        }
    }
}

async fn routing_loop(router: Arc<MessageRouter>, idle: Duration, cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        if router.try_route_batch().is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        } else {
            tokio::task::yield_now().await;
        }
    }
    debug!("routing loop stopped");
}

async fn flush_loop(router: Arc<MessageRouter>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                router.flush_once().await;
            }
        }
    }
    debug!("flush loop stopped");
}

async fn sweep_loop(cache: Arc<RoutingCache>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let stats = cache.scan_for_expired_items();
                if stats.removed > 0 || stats.expired > 0 {
                    debug!(
                        expired = stats.expired,
                        scheduled = stats.scheduled,
                        removed = stats.removed,
                        "cache sweep"
                    );
                }
            }
        }
    }
}

async fn reload_loop(updates: Arc<CacheUpdateHandler>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = updates.reload().await {
                    warn!(error = %e, "periodic cache reload failed, keeping current contents");
                }
            }
        }
    }
}
