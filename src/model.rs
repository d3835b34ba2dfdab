//! Entities the routing cache holds.

use serde::{Deserialize, Serialize};

/// One trigger definition attached to a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorTrigger {
    #[serde(default)]
    pub has_actions: bool,
    #[serde(default)]
    pub is_text_trigger: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    /// The sensor's API key. Checked on every message.
    #[serde(default)]
    pub secret: String,
    pub account_id: String,
    #[serde(default)]
    pub storage_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_information: Option<Vec<SensorTrigger>>,
}

impl Sensor {
    /// True if some trigger with actions matches the given kind.
    pub fn has_trigger(&self, text: bool) -> bool {
        self.trigger_information
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|trigger| trigger.has_actions && trigger.is_text_trigger == text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub billing_lockout: bool,
    #[serde(default)]
    pub banned: bool,
}

impl Account {
    pub fn is_usable(&self) -> bool {
        !self.billing_lockout && !self.banned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub account_id: String,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub read_only: bool,
}

/// Binding of a sensor to a named real-time consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiveDataRoute {
    #[serde(alias = "SensorID", alias = "sensorId", alias = "sensor")]
    pub sensor_id: String,
    #[serde(alias = "Target")]
    pub target: String,
}

impl LiveDataRoute {
    pub fn new(sensor_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            target: target.into(),
        }
    }
}

/// A named live-data consumer the router may publish to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDataHandler {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Trigger rows as stored: one row per sensor, possibly for sensors that no longer exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub sensor_id: String,
    #[serde(default)]
    pub triggers: Vec<SensorTrigger>,
}
