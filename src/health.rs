// src/health.rs
//! Backpressure signal. Producers are never blocked; overload only shows up
//! here so upstream traffic can be steered away.

use serde::Serialize;

use crate::queue::QueueDepths;

pub const INPUT_OUT_OF_BOUNDS: &str = "Router input queue is out of bounds";
pub const PUBLIC_OUT_OF_BOUNDS: &str = "Public queue is out of bounds";
pub const LIVE_DATA_OUT_OF_BOUNDS: &str = "Live Data Service queue out of bounds";
pub const TRIGGER_OUT_OF_BOUNDS: &str = "Trigger Service queue out of bounds";
pub const PUBLISHER_DISCONNECTED: &str = "Publisher is disconnected";

/// Largest acceptable depth per monitored queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthLimits {
    pub input: usize,
    pub public: usize,
    pub live_data: usize,
    pub trigger: usize,
}

impl HealthLimits {
    pub fn uniform(limit: usize) -> Self {
        Self {
            input: limit,
            public: limit,
            live_data: limit,
            trigger: limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub explanations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    limits: HealthLimits,
}

impl HealthMonitor {
    pub fn new(limits: HealthLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> HealthLimits {
        self.limits
    }

    pub fn evaluate(&self, depths: &QueueDepths, publisher_connected: bool) -> HealthReport {
        let checks = [
            (depths.input, self.limits.input, INPUT_OUT_OF_BOUNDS),
            (depths.public, self.limits.public, PUBLIC_OUT_OF_BOUNDS),
            (depths.live_data, self.limits.live_data, LIVE_DATA_OUT_OF_BOUNDS),
            (depths.trigger, self.limits.trigger, TRIGGER_OUT_OF_BOUNDS),
        ];

        let mut explanations: Vec<String> = checks
            .iter()
            .filter(|(depth, limit, _)| depth > limit)
            .map(|(_, _, reason)| reason.to_string())
            .collect();
        if !publisher_connected {
            explanations.push(PUBLISHER_DISCONNECTED.to_string());
        }

        HealthReport {
            healthy: explanations.is_empty(),
            explanations,
        }
    }
}
