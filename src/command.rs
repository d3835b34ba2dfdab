// src/command.rs
//! Control-plane commands that mutate the routing cache.
//!
//! Wire form is `{"cmd": "<CommandType>", "arguments": "<payload>"}`. For the
//! identifier commands `arguments` is the bare id. For the live-data commands it
//! is a JSON document, either embedded as a string or inline.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::model::LiveDataRoute;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Malformed(String),
    UnknownCommand(String),
    InvalidArguments { command: CommandType, reason: String },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Malformed(e) => write!(f, "malformed command: {}", e),
            CommandError::UnknownCommand(name) => write!(f, "unknown command type: {}", name),
            CommandError::InvalidArguments { command, reason } => {
                write!(f, "invalid arguments for {}: {}", command, reason)
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Closed set of command types understood on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    FlushUser,
    FlushSensor,
    FlushKey,
    AddUser,
    AddSensor,
    AddKey,
    DeleteUser,
    AddLiveDataSensor,
    RemoveLiveDataSensor,
    SyncLiveDataSensors,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::FlushUser => "FlushUser",
            CommandType::FlushSensor => "FlushSensor",
            CommandType::FlushKey => "FlushKey",
            CommandType::AddUser => "AddUser",
            CommandType::AddSensor => "AddSensor",
            CommandType::AddKey => "AddKey",
            CommandType::DeleteUser => "DeleteUser",
            CommandType::AddLiveDataSensor => "AddLiveDataSensor",
            CommandType::RemoveLiveDataSensor => "RemoveLiveDataSensor",
            CommandType::SyncLiveDataSensors => "SyncLiveDataSensors",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FlushUser" => Ok(CommandType::FlushUser),
            "FlushSensor" => Ok(CommandType::FlushSensor),
            "FlushKey" => Ok(CommandType::FlushKey),
            "AddUser" => Ok(CommandType::AddUser),
            "AddSensor" => Ok(CommandType::AddSensor),
            "AddKey" => Ok(CommandType::AddKey),
            "DeleteUser" => Ok(CommandType::DeleteUser),
            "AddLiveDataSensor" => Ok(CommandType::AddLiveDataSensor),
            "RemoveLiveDataSensor" => Ok(CommandType::RemoveLiveDataSensor),
            "SyncLiveDataSensors" => Ok(CommandType::SyncLiveDataSensors),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

/// Full set of routes one live-data target should have after a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDataSync {
    pub target: String,
    pub sensors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FlushUser(String),
    FlushSensor(String),
    FlushKey(String),
    AddUser(String),
    AddSensor(String),
    AddKey(String),
    DeleteUser(String),
    AddLiveDataSensor(LiveDataRoute),
    RemoveLiveDataSensor(LiveDataRoute),
    /// One entry per target; each replaces that target's routes.
    SyncLiveDataSensors(Vec<LiveDataSync>),
}

#[derive(Deserialize)]
struct RawCommand {
    cmd: String,
    #[serde(default)]
    arguments: JsonValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SyncArguments {
    Target {
        #[serde(alias = "Target")]
        target: String,
        #[serde(alias = "Sensors", default)]
        sensors: Vec<String>,
    },
    Routes(Vec<LiveDataRoute>),
    Targets(Vec<SyncTarget>),
}

#[derive(Deserialize)]
struct SyncTarget {
    #[serde(alias = "Target")]
    target: String,
    #[serde(alias = "Sensors", default)]
    sensors: Vec<String>,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::FlushUser(_) => CommandType::FlushUser,
            Command::FlushSensor(_) => CommandType::FlushSensor,
            Command::FlushKey(_) => CommandType::FlushKey,
            Command::AddUser(_) => CommandType::AddUser,
            Command::AddSensor(_) => CommandType::AddSensor,
            Command::AddKey(_) => CommandType::AddKey,
            Command::DeleteUser(_) => CommandType::DeleteUser,
            Command::AddLiveDataSensor(_) => CommandType::AddLiveDataSensor,
            Command::RemoveLiveDataSensor(_) => CommandType::RemoveLiveDataSensor,
            Command::SyncLiveDataSensors(_) => CommandType::SyncLiveDataSensors,
        }
    }

    /// Parse one command from its wire form.
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let raw: RawCommand =
            serde_json::from_slice(payload).map_err(|e| CommandError::Malformed(e.to_string()))?;
        let kind: CommandType = raw.cmd.parse()?;
        Self::from_parts(kind, raw.arguments)
    }

    fn from_parts(kind: CommandType, arguments: JsonValue) -> Result<Self, CommandError> {
        let cmd = match kind {
            CommandType::FlushUser => Command::FlushUser(identifier(kind, arguments)?),
            CommandType::FlushSensor => Command::FlushSensor(identifier(kind, arguments)?),
            CommandType::FlushKey => Command::FlushKey(identifier(kind, arguments)?),
            CommandType::AddUser => Command::AddUser(identifier(kind, arguments)?),
            CommandType::AddSensor => Command::AddSensor(identifier(kind, arguments)?),
            CommandType::AddKey => Command::AddKey(identifier(kind, arguments)?),
            CommandType::DeleteUser => Command::DeleteUser(identifier(kind, arguments)?),
            CommandType::AddLiveDataSensor => Command::AddLiveDataSensor(document(kind, arguments)?),
            CommandType::RemoveLiveDataSensor => {
                Command::RemoveLiveDataSensor(document(kind, arguments)?)
            }
            CommandType::SyncLiveDataSensors => {
                let args: SyncArguments = document(kind, arguments)?;
                Command::SyncLiveDataSensors(sync_sets(kind, args)?)
            }
        };
        Ok(cmd)
    }
}

fn invalid(command: CommandType, reason: impl Into<String>) -> CommandError {
    CommandError::InvalidArguments {
        command,
        reason: reason.into(),
    }
}

fn identifier(kind: CommandType, arguments: JsonValue) -> Result<String, CommandError> {
    match arguments {
        JsonValue::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        JsonValue::String(_) => Err(invalid(kind, "empty identifier")),
        other => Err(invalid(kind, format!("expected identifier string, got {}", other))),
    }
}

/// Decode a JSON argument that may arrive either inline or string-encoded.
fn document<T: serde::de::DeserializeOwned>(
    kind: CommandType,
    arguments: JsonValue,
) -> Result<T, CommandError> {
    let parsed = match arguments {
        JsonValue::String(s) => serde_json::from_str(&s),
        other => serde_json::from_value(other),
    };
    parsed.map_err(|e| invalid(kind, e.to_string()))
}

fn sync_sets(kind: CommandType, args: SyncArguments) -> Result<Vec<LiveDataSync>, CommandError> {
    let sets = match args {
        SyncArguments::Target { target, sensors } => vec![LiveDataSync { target, sensors }],
        SyncArguments::Targets(targets) => targets
            .into_iter()
            .map(|t| LiveDataSync {
                target: t.target,
                sensors: t.sensors,
            })
            .collect(),
        SyncArguments::Routes(routes) => {
            let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for route in routes {
                grouped.entry(route.target).or_default().push(route.sensor_id);
            }
            grouped
                .into_iter()
                .map(|(target, sensors)| LiveDataSync { target, sensors })
                .collect()
        }
    };

    if sets.is_empty() {
        return Err(invalid(kind, "no live-data target named"));
    }
    if sets.iter().any(|set| set.target.is_empty()) {
        return Err(invalid(kind, "empty live-data target"));
    }
    Ok(sets)
}
