use std::sync::Arc;

use crate::cache::RoutingCache;
use crate::message::{NetworkEvent, NetworkEventAction};
use crate::queue::RemoteQueues;

use super::{RejectReason, RouteContext, RouteOutcome, Router};

/// Usage metering. Runs for every message, including rejected ones, and emits
/// an event whenever the sensor can be resolved. Messages that fail validation
/// are not metered.
pub struct NetworkEventRouter {
    cache: Arc<RoutingCache>,
    queues: Arc<RemoteQueues>,
}

impl NetworkEventRouter {
    pub fn new(cache: Arc<RoutingCache>, queues: Arc<RemoteQueues>) -> Self {
        Self { cache, queues }
    }

    pub fn event_for(&self, ctx: &RouteContext<'_>) -> Option<NetworkEvent> {
        if matches!(ctx.rejection, Some(RejectReason::Validation(_))) {
            return None;
        }
        let sensor = match &ctx.sensor {
            Some(sensor) => sensor.clone(),
            None => self.cache.sensor(ctx.message.sensor_id()).ok()?,
        };

        let mut event = NetworkEvent {
            sensor_id: sensor.id.clone(),
            account_id: sensor.account_id.clone(),
            message_kind: ctx.message.kind(),
            actions: Vec::with_capacity(ctx.actions.len() + 1),
        };
        event.record(if ctx.rejection.is_some() {
            NetworkEventAction::Dropped
        } else {
            NetworkEventAction::Routed
        });
        for action in &ctx.actions {
            event.record(*action);
        }
        Some(event)
    }
}

impl Router for NetworkEventRouter {
    fn name(&self) -> &'static str {
        "network_event"
    }

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        if let Some(event) = self.event_for(ctx) {
            self.queues.network_events.enqueue(event);
        }
        RouteOutcome::Continue
    }

    fn is_bookkeeping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::message::{Measurement, PlatformMessage};
    use crate::model::Sensor;
    use crate::queue::RemoteQueue;
    use crate::routing::{AuthorizationError, ValidationError};
    use chrono::Utc;

    fn setup() -> (NetworkEventRouter, Arc<RemoteQueues>) {
        let cache = Arc::new(RoutingCache::default());
        cache
            .append_sensor(Sensor {
                id: "s1".into(),
                secret: String::new(),
                account_id: "a1".into(),
                storage_enabled: true,
                trigger_information: None,
            })
            .unwrap();
        let queues = Arc::new(RemoteQueues::new(&QueueConfig::default()));
        (NetworkEventRouter::new(cache, queues.clone()), queues)
    }

    fn measurement(sensor: &str) -> PlatformMessage {
        PlatformMessage::Measurement(Measurement {
            sensor_id: sensor.into(),
            platform_timestamp: Utc::now(),
            timestamp: None,
            data: Default::default(),
            location: None,
            api_key: None,
        })
    }

    #[test]
    fn routed_event_carries_actions() {
        let (router, queues) = setup();
        let m = measurement("s1");
        let mut ctx = RouteContext::new(&m);
        ctx.record(NetworkEventAction::Stored);

        let event = router.event_for(&ctx).unwrap();
        assert_eq!(event.account_id, "a1");
        assert_eq!(
            event.actions,
            vec![NetworkEventAction::Routed, NetworkEventAction::Stored]
        );

        router.route(&mut ctx);
        assert_eq!(queues.network_events.len(), 1);
    }

    #[test]
    fn unauthorized_message_is_marked_dropped() {
        let (router, _) = setup();
        let m = measurement("s1");
        let mut ctx = RouteContext::new(&m);
        ctx.rejection = Some(RejectReason::Authorization(
            AuthorizationError::BillingLockout,
        ));
        let event = router.event_for(&ctx).unwrap();
        assert_eq!(event.actions, vec![NetworkEventAction::Dropped]);
    }

    #[test]
    fn invalid_message_emits_nothing() {
        let (router, queues) = setup();
        let m = measurement("s1");
        let mut ctx = RouteContext::new(&m);
        ctx.rejection = Some(RejectReason::Validation(
            ValidationError::LatitudeOutOfRange(200.0),
        ));
        assert!(router.event_for(&ctx).is_none());
        router.route(&mut ctx);
        assert_eq!(queues.network_events.len(), 0);
    }

    #[test]
    fn unknown_sensor_emits_nothing() {
        let (router, queues) = setup();
        let m = measurement("ghost");
        let mut ctx = RouteContext::new(&m);
        router.route(&mut ctx);
        assert_eq!(queues.network_events.len(), 0);
        assert!(router.is_bookkeeping());
    }
}
