use std::sync::Arc;
use tracing::trace;

use crate::cache::RoutingCache;
use crate::config::RoutingConfig;
use crate::message::{ControlDestination, MessageKind, NetworkEventAction, PlatformMessage};
use crate::queue::RemoteQueues;

use super::{RouteContext, RouteOutcome, Router};

pub const ID_NEEDLE: &str = "$id";
const TYPE_NEEDLE: &str = "$type";

/// Forwards messages whose sensor has a matching trigger with actions.
pub struct TriggerRouter {
    queues: Arc<RemoteQueues>,
}

impl TriggerRouter {
    pub fn new(queues: Arc<RemoteQueues>) -> Self {
        Self { queues }
    }
}

impl Router for TriggerRouter {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        let Some(sensor) = ctx.sensor.as_ref() else {
            return RouteOutcome::Continue;
        };
        let text = match ctx.message.kind() {
            MessageKind::Measurement => false,
            MessageKind::Message => true,
            MessageKind::ControlMessage => return RouteOutcome::Continue,
        };
        if sensor.has_trigger(text) && self.queues.trigger.enqueue(ctx.message) {
            ctx.record(NetworkEventAction::Triggered);
        }
        RouteOutcome::Continue
    }
}

pub struct StorageRouter {
    queues: Arc<RemoteQueues>,
}

impl StorageRouter {
    pub fn new(queues: Arc<RemoteQueues>) -> Self {
        Self { queues }
    }
}

impl Router for StorageRouter {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        let storage_enabled = ctx.sensor.as_ref().is_some_and(|s| s.storage_enabled);
        if storage_enabled && self.queues.storage.enqueue(ctx.message) {
            ctx.record(NetworkEventAction::Stored);
        }
        RouteOutcome::Continue
    }
}

/// One enqueue per distinct live-data target subscribed to the sensor.
pub struct LiveDataRouter {
    cache: Arc<RoutingCache>,
    queues: Arc<RemoteQueues>,
}

impl LiveDataRouter {
    pub fn new(cache: Arc<RoutingCache>, queues: Arc<RemoteQueues>) -> Self {
        Self { cache, queues }
    }
}

impl Router for LiveDataRouter {
    fn name(&self) -> &'static str {
        "live_data"
    }

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        if ctx.sensor.is_none() {
            return RouteOutcome::Continue;
        }
        let targets = self.cache.live_data_targets(ctx.message.sensor_id());
        for target in &targets {
            self.queues.live_data.enqueue(target, ctx.message);
        }
        if !targets.is_empty() {
            trace!(sensor_id = %ctx.message.sensor_id(), targets = targets.len(), "live data fan-out");
            ctx.record(NetworkEventAction::LiveData);
        }
        RouteOutcome::Continue
    }
}

/// Actuator delivery for control messages, plus the optional public copy of
/// measurements and text messages.
pub struct PublicRouter {
    queues: Arc<RemoteQueues>,
    republish: bool,
    actuator_topic_template: String,
    public_topic_template: String,
}

impl PublicRouter {
    pub fn new(queues: Arc<RemoteQueues>, config: &RoutingConfig) -> Self {
        Self {
            queues,
            republish: config.public_republish,
            actuator_topic_template: config.actuator_topic_template.clone(),
            public_topic_template: config.public_topic_template.clone(),
        }
    }

    pub fn actuator_topic(&self, sensor_id: &str) -> String {
        self.actuator_topic_template.replace(ID_NEEDLE, sensor_id)
    }

    pub fn public_topic(&self, kind: MessageKind, sensor_id: &str) -> String {
        self.public_topic_template
            .replace(TYPE_NEEDLE, kind.topic_segment())
            .replace(ID_NEEDLE, sensor_id)
    }

    fn topic_for(&self, message: &PlatformMessage) -> Option<String> {
        match message {
            PlatformMessage::ControlMessage(control) => match control.destination {
                ControlDestination::Mqtt => Some(self.actuator_topic(&control.sensor_id)),
                ControlDestination::LiveData => None,
            },
            other if self.republish => Some(self.public_topic(other.kind(), other.sensor_id())),
            _ => None,
        }
    }
}

impl Router for PublicRouter {
    fn name(&self) -> &'static str {
        "public"
    }

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        if ctx.sensor.is_none() {
            return RouteOutcome::Continue;
        }
        if let Some(topic) = self.topic_for(ctx.message) {
            self.queues.public.enqueue(topic, ctx.message);
            ctx.record(NetworkEventAction::Published);
        }
        RouteOutcome::Continue
    }
}
