mod helpers;

use helpers::*;
use iot_router::cache::{CacheError, CacheUpdateHandler, RoutingCache};
use iot_router::config::{QueueConfig, RouterConfig, RoutingConfig};
use iot_router::health::TRIGGER_OUT_OF_BOUNDS;
use iot_router::message::NetworkEventAction;
use iot_router::model::{Sensor, SensorTrigger};
use iot_router::queue::{MemoryPublisher, QueueDepths, RemoteQueue, RemoteQueues};
use iot_router::repository::MemoryRepository;
use iot_router::routing::{AuthorizationError, CompositeRouter, RejectReason, ValidationError};
use iot_router::service::MessageRouter;
use std::sync::Arc;

struct Fixture {
    cache: Arc<RoutingCache>,
    queues: Arc<RemoteQueues>,
    pipeline: CompositeRouter,
    updates: CacheUpdateHandler,
    repository: Arc<MemoryRepository>,
}

impl Fixture {
    async fn loaded() -> Self {
        let repository = repository();
        let cache = Arc::new(RoutingCache::default());
        let updates = CacheUpdateHandler::new(cache.clone(), repository.clone());
        updates.reload().await.expect("reload from seed");

        let queues = Arc::new(RemoteQueues::new(&QueueConfig::default()));
        let pipeline =
            CompositeRouter::standard(cache.clone(), queues.clone(), &RoutingConfig::default());
        Self {
            cache,
            queues,
            pipeline,
            updates,
            repository,
        }
    }

    fn fanout_depths(&self) -> (usize, usize, usize) {
        (
            self.queues.trigger.len(),
            self.queues.storage.len(),
            self.queues.live_data.len_for_target(LIVE_TARGET),
        )
    }
}

#[tokio::test]
async fn scenario_a_latitude_out_of_range_is_rejected_at_validation() {
    let fx = Fixture::loaded().await;

    let err = fx
        .pipeline
        .route(&measurement(SENSOR, 200.0, 4.0))
        .unwrap_err();

    assert_eq!(
        err,
        RejectReason::Validation(ValidationError::LatitudeOutOfRange(200.0))
    );
    assert_eq!(fx.fanout_depths(), (0, 0, 0));
    assert_eq!(fx.queues.public.len(), 0);
    assert_eq!(fx.queues.network_events.len(), 0);
    assert_eq!(fx.pipeline.stats().validation_rejected, 1);
}

#[tokio::test]
async fn scenario_b_billing_lockout_is_rejected_at_authorization() {
    let fx = Fixture::loaded().await;

    let err = fx
        .pipeline
        .route(&measurement(LOCKED_SENSOR, 52.0, 4.0))
        .unwrap_err();

    assert_eq!(
        err,
        RejectReason::Authorization(AuthorizationError::BillingLockout)
    );
    assert_eq!(fx.fanout_depths(), (0, 0, 0));
    // still metered as dropped
    assert_eq!(fx.queues.network_events.len(), 1);
    assert_eq!(fx.pipeline.stats().authorization_rejected, 1);
}

#[tokio::test]
async fn scenario_c_accepted_measurement_fans_out() {
    let fx = Fixture::loaded().await;

    let actions = fx.pipeline.route(&measurement(SENSOR, 52.0, 4.0)).unwrap();

    assert_eq!(fx.fanout_depths(), (1, 1, 1));
    assert!(actions.contains(&NetworkEventAction::Triggered));
    assert!(actions.contains(&NetworkEventAction::Stored));
    assert!(actions.contains(&NetworkEventAction::LiveData));
    assert_eq!(fx.queues.network_events.len(), 1);
}

#[tokio::test]
async fn scenario_d_flushed_sensor_is_unknown_until_added_again() {
    let fx = Fixture::loaded().await;
    let msg = measurement(SENSOR, 52.0, 4.0);

    fx.updates
        .handle_raw(format!(r#"{{"cmd":"FlushSensor","arguments":"{}"}}"#, SENSOR).as_bytes())
        .await
        .unwrap();
    assert_eq!(
        fx.pipeline.route(&msg).unwrap_err(),
        RejectReason::Authorization(AuthorizationError::UnknownSensor(SENSOR.to_string()))
    );
    assert_eq!(
        fx.pipeline.route(&msg).unwrap_err(),
        RejectReason::Authorization(AuthorizationError::UnknownSensor(SENSOR.to_string()))
    );

    fx.updates
        .handle_raw(format!(r#"{{"cmd":"AddSensor","arguments":"{}"}}"#, SENSOR).as_bytes())
        .await
        .unwrap();
    assert!(fx.pipeline.route(&msg).is_ok());
    // the live-data route survived the flush
    assert_eq!(fx.fanout_depths(), (1, 1, 1));
}

#[tokio::test]
async fn scenario_e_trigger_backlog_makes_router_unhealthy() {
    let mut config = RouterConfig::default();
    config.health.trigger_queue_limit = Some(2);

    let cache = Arc::new(RoutingCache::default());
    CacheUpdateHandler::new(cache.clone(), repository())
        .reload()
        .await
        .unwrap();
    let router = MessageRouter::new(&config, cache, Arc::new(MemoryPublisher::new()));

    router.submit_range((0..3).map(|_| measurement(SENSOR, 52.0, 4.0)));
    let outcome = router.try_route_batch();
    assert_eq!(outcome.routed, 3);

    let report = router.health();
    assert!(!report.healthy);
    assert!(report
        .explanations
        .contains(&TRIGGER_OUT_OF_BOUNDS.to_string()));

    // flushing drains the backlog and restores health
    router.flush_once().await;
    assert!(router.health().healthy);
}

#[tokio::test]
async fn flushed_sensor_key_rejects_until_added_again() {
    let fx = Fixture::loaded().await;
    let msg = measurement(SENSOR, 52.0, 4.0);

    fx.updates
        .handle_raw(format!(r#"{{"cmd":"FlushKey","arguments":"{}"}}"#, API_KEY).as_bytes())
        .await
        .unwrap();
    assert_eq!(
        fx.pipeline.route(&msg).unwrap_err(),
        RejectReason::Authorization(AuthorizationError::UnknownApiKey)
    );
    assert_eq!(fx.fanout_depths(), (0, 0, 0));

    fx.updates
        .handle_raw(format!(r#"{{"cmd":"AddKey","arguments":"{}"}}"#, API_KEY).as_bytes())
        .await
        .unwrap();
    assert!(fx.pipeline.route(&msg).is_ok());
}

#[tokio::test]
async fn revoked_sensor_key_rejects() {
    let fx = Fixture::loaded().await;
    let mut key = (*fx.cache.api_key(API_KEY).unwrap()).clone();
    key.revoked = true;
    fx.cache.append_api_key(key).unwrap();

    assert_eq!(
        fx.pipeline
            .route(&measurement(SENSOR, 52.0, 4.0))
            .unwrap_err(),
        RejectReason::Authorization(AuthorizationError::ApiKeyRevoked)
    );
}

#[tokio::test]
async fn loaded_sensor_round_trips_and_removal_is_not_found() {
    let cache = RoutingCache::default();
    let sensor = Sensor {
        id: "rt".to_string(),
        secret: "s".to_string(),
        account_id: ACCOUNT.to_string(),
        storage_enabled: false,
        trigger_information: Some(vec![SensorTrigger {
            has_actions: true,
            is_text_trigger: true,
        }]),
    };
    cache.load_sensors(vec![sensor.clone()]).unwrap();

    assert_eq!(*cache.sensor("rt").unwrap(), sensor);
    assert!(cache.remove_sensor("rt"));
    assert_eq!(cache.sensor("rt").unwrap_err(), CacheError::NotFound);
}

#[tokio::test]
async fn add_sensor_is_idempotent() {
    let fx = Fixture::loaded().await;
    let add = format!(r#"{{"cmd":"AddSensor","arguments":"{}"}}"#, SENSOR);

    fx.updates.handle_raw(add.as_bytes()).await.unwrap();
    let once = (fx.cache.counts(), fx.cache.sensor(SENSOR).unwrap());
    fx.updates.handle_raw(add.as_bytes()).await.unwrap();
    let twice = (fx.cache.counts(), fx.cache.sensor(SENSOR).unwrap());

    assert_eq!(once, twice);
}

#[tokio::test]
async fn unknown_command_fails_alone() {
    let fx = Fixture::loaded().await;

    assert!(fx
        .updates
        .handle_raw(br#"{"cmd":"ReticulateSplines","arguments":"x"}"#)
        .await
        .is_err());
    fx.updates
        .handle_raw(format!(r#"{{"cmd":"FlushSensor","arguments":"{}"}}"#, SENSOR).as_bytes())
        .await
        .unwrap();

    let stats = fx.updates.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.applied, 1);
    assert!(fx.cache.sensor(SENSOR).is_err());
}

#[tokio::test]
async fn add_sensor_missing_from_repository_evicts() {
    let fx = Fixture::loaded().await;
    fx.repository.remove_sensor(SENSOR);

    let _ = fx
        .updates
        .handle_raw(format!(r#"{{"cmd":"AddSensor","arguments":"{}"}}"#, SENSOR).as_bytes())
        .await;

    assert!(fx.cache.sensor(SENSOR).is_err());
}

#[tokio::test]
async fn flush_publishes_one_batch_per_destination() {
    let fx = Fixture::loaded().await;
    for _ in 0..3 {
        fx.pipeline.route(&measurement(SENSOR, 52.0, 4.0)).unwrap();
    }
    fx.pipeline.route(&text_message(SENSOR, "door open")).unwrap();

    let publisher = MemoryPublisher::new();
    let result = fx.queues.flush_all(&publisher).await;

    // trigger (measurements), storage x2, live data x2, network events
    assert_eq!(result.publishes(), 6);
    assert!(result.failed.is_empty());
    assert_eq!(publisher.records("sensate/storage/measurements").len(), 3);
    assert_eq!(publisher.records("sensate/storage/messages").len(), 1);
    assert_eq!(publisher.records("sensate/trigger/measurements").len(), 3);
    assert_eq!(publisher.records("sensate/live/measurements/s1").len(), 3);
    assert_eq!(publisher.records("sensate/network/events").len(), 4);
    assert_eq!(fx.queues.depths(), QueueDepths::default());
}

#[tokio::test]
async fn failed_publish_is_dropped_not_retried() {
    let fx = Fixture::loaded().await;
    fx.pipeline.route(&measurement(SENSOR, 52.0, 4.0)).unwrap();

    let publisher = MemoryPublisher::new();
    publisher.set_failing(true);
    let result = fx.queues.flush_all(&publisher).await;
    assert!(!result.failed.is_empty());
    assert_eq!(fx.queues.depths(), QueueDepths::default());

    publisher.set_failing(false);
    assert_eq!(fx.queues.flush_all(&publisher).await.publishes(), 0);
}

#[tokio::test]
async fn control_message_is_republished_to_actuator_topic() {
    let fx = Fixture::loaded().await;
    fx.pipeline
        .route(&control_message(SENSOR, "reboot"))
        .unwrap();

    assert_eq!(fx.queues.trigger.len(), 0);
    assert_eq!(fx.queues.storage.len(), 0);
    assert_eq!(fx.queues.public.len(), 1);

    let publisher = MemoryPublisher::new();
    fx.queues.flush_all(&publisher).await;
    let records = publisher.records("sensate/actuators/sensor-1");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["data"], "reboot");
}
