use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::cache::RoutingCache;
use crate::config::RoutingConfig;
use crate::message::{NetworkEventAction, PlatformMessage};
use crate::queue::RemoteQueues;

use super::{
    AuthorizationRouter, LiveDataRouter, NetworkEventRouter, PublicRouter, RejectReason,
    RouteContext, RouteOutcome, Router, StorageRouter, TriggerRouter, ValidationRouter,
};

/// Counters shared between the routing loop and the status surface.
#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    validation_rejected: AtomicU64,
    authorization_rejected: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_samples: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub validation_rejected: u64,
    pub authorization_rejected: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
}

impl RouterStats {
    fn record_latency(&self, message: &PlatformMessage) {
        let elapsed = Utc::now() - message.platform_timestamp();
        // clock skew can put the ingestion stamp in the future
        let us = elapsed.num_microseconds().unwrap_or(0).max(0) as u64;
        self.latency_sum_us.fetch_add(us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self, reason: &RejectReason) {
        let counter = match reason {
            RejectReason::Validation(_) => &self.validation_rejected,
            RejectReason::Authorization(_) => &self.authorization_rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        RouterStatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            authorization_rejected: self.authorization_rejected.load(Ordering::Relaxed),
            avg_latency_ms: if samples == 0 {
                0.0
            } else {
                sum as f64 / samples as f64 / 1000.0
            },
            max_latency_ms: self.latency_max_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Ordered stages run against one message at a time.
///
/// The first stage that rejects or handles a message settles it; later stages
/// are skipped unless they are bookkeeping stages.
pub struct CompositeRouter {
    stages: Vec<Box<dyn Router>>,
    stats: RouterStats,
}

impl CompositeRouter {
    pub fn new(stages: Vec<Box<dyn Router>>) -> Self {
        Self {
            stages,
            stats: RouterStats::default(),
        }
    }

    /// Validation, authorization, the four fan-outs, then metering.
    pub fn standard(
        cache: Arc<RoutingCache>,
        queues: Arc<RemoteQueues>,
        config: &RoutingConfig,
    ) -> Self {
        Self::new(vec![
            Box::new(ValidationRouter::new(config.max_data_points)),
            Box::new(AuthorizationRouter::new(cache.clone())),
            Box::new(TriggerRouter::new(queues.clone())),
            Box::new(StorageRouter::new(queues.clone())),
            Box::new(LiveDataRouter::new(cache.clone(), queues.clone())),
            Box::new(PublicRouter::new(queues.clone(), config)),
            Box::new(NetworkEventRouter::new(cache, queues)),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Route one message. On success returns the fan-out actions taken.
    pub fn route(&self, message: &PlatformMessage) -> Result<Vec<NetworkEventAction>, RejectReason> {
        let mut ctx = RouteContext::new(message);
        let mut settled = false;

        for stage in &self.stages {
            if settled && !stage.is_bookkeeping() {
                continue;
            }
            match stage.route(&mut ctx) {
                RouteOutcome::Continue => {}
                RouteOutcome::Handled => {
                    trace!(stage = stage.name(), "message handled");
                    settled = true;
                }
                RouteOutcome::Rejected(reason) => {
                    if ctx.rejection.is_none() {
                        ctx.rejection = Some(reason);
                    }
                    settled = true;
                }
            }
        }

        self.stats.record_latency(message);
        match ctx.rejection {
            Some(reason) => {
                self.stats.record_rejection(&reason);
                Err(reason)
            }
            None => {
                self.stats.routed.fetch_add(1, Ordering::Relaxed);
                Ok(ctx.actions)
            }
        }
    }
}
