//! Inbound platform messages and the network events routing emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// The exact (0, 0) pair means the device reported no position.
    pub fn is_unset(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor_id: String,
    /// Stamped at ingestion; defaults to the time of parsing.
    #[serde(default = "Utc::now")]
    pub platform_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: BTreeMap<String, DataPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub sensor_id: String,
    #[serde(default = "Utc::now")]
    pub platform_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

/// Where a control message is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlDestination {
    /// Device transport, via the public actuator topic.
    #[default]
    Mqtt,
    /// Live-data consumers only.
    LiveData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub sensor_id: String,
    #[serde(default = "Utc::now")]
    pub platform_timestamp: DateTime<Utc>,
    pub data: String,
    #[serde(default)]
    pub destination: ControlDestination,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Measurement,
    Message,
    ControlMessage,
}

impl MessageKind {
    /// Plural form used in topic templates.
    pub fn topic_segment(&self) -> &'static str {
        match self {
            MessageKind::Measurement => "measurements",
            MessageKind::Message => "messages",
            MessageKind::ControlMessage => "control",
        }
    }
}

/// Unit routed through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformMessage {
    Measurement(Measurement),
    Message(TextMessage),
    ControlMessage(ControlMessage),
}

impl PlatformMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            PlatformMessage::Measurement(_) => MessageKind::Measurement,
            PlatformMessage::Message(_) => MessageKind::Message,
            PlatformMessage::ControlMessage(_) => MessageKind::ControlMessage,
        }
    }

    pub fn sensor_id(&self) -> &str {
        match self {
            PlatformMessage::Measurement(m) => &m.sensor_id,
            PlatformMessage::Message(m) => &m.sensor_id,
            PlatformMessage::ControlMessage(m) => &m.sensor_id,
        }
    }

    pub fn platform_timestamp(&self) -> DateTime<Utc> {
        match self {
            PlatformMessage::Measurement(m) => m.platform_timestamp,
            PlatformMessage::Message(m) => m.platform_timestamp,
            PlatformMessage::ControlMessage(m) => m.platform_timestamp,
        }
    }

    pub fn set_platform_timestamp(&mut self, at: DateTime<Utc>) {
        match self {
            PlatformMessage::Measurement(m) => m.platform_timestamp = at,
            PlatformMessage::Message(m) => m.platform_timestamp = at,
            PlatformMessage::ControlMessage(m) => m.platform_timestamp = at,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            PlatformMessage::Measurement(m) => m.api_key.as_deref(),
            PlatformMessage::Message(m) => m.api_key.as_deref(),
            PlatformMessage::ControlMessage(m) => m.api_key.as_deref(),
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            PlatformMessage::Measurement(m) => m.location,
            PlatformMessage::Message(m) => m.location,
            PlatformMessage::ControlMessage(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEventAction {
    Routed,
    Dropped,
    Triggered,
    Stored,
    LiveData,
    Published,
}

/// Usage-metering record produced once per message whose sensor resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub sensor_id: String,
    pub account_id: String,
    pub message_kind: MessageKind,
    pub actions: Vec<NetworkEventAction>,
}

impl NetworkEvent {
    pub fn record(&mut self, action: NetworkEventAction) {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }
}
