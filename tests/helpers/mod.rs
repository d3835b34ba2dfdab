#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use iot_router::message::{
    ControlDestination, ControlMessage, DataPoint, Location, Measurement, PlatformMessage,
    TextMessage,
};
use iot_router::model::{
    Account, ApiKey, LiveDataHandler, LiveDataRoute, Sensor, SensorTrigger, TriggerInfo,
};
use iot_router::queue::codec::decode_batch;
use iot_router::repository::{MemoryRepository, RepositorySeed};
use iot_router::service::RouterService;
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

// Fixtures

pub const ACCOUNT: &str = "acct-1";
pub const LOCKED_ACCOUNT: &str = "acct-locked";
/// Storage enabled, a numeric trigger with actions, routed to live target "s1".
pub const SENSOR: &str = "sensor-1";
pub const LOCKED_SENSOR: &str = "sensor-locked";
pub const LIVE_TARGET: &str = "s1";
/// Secret of `SENSOR`.
pub const API_KEY: &str = "key-1";
pub const LOCKED_API_KEY: &str = "key-locked";

pub fn seed() -> RepositorySeed {
    RepositorySeed {
        accounts: vec![
            Account {
                id: ACCOUNT.to_string(),
                billing_lockout: false,
                banned: false,
            },
            Account {
                id: LOCKED_ACCOUNT.to_string(),
                billing_lockout: true,
                banned: false,
            },
        ],
        api_keys: vec![
            ApiKey {
                key: API_KEY.to_string(),
                account_id: ACCOUNT.to_string(),
                revoked: false,
                read_only: false,
            },
            ApiKey {
                key: LOCKED_API_KEY.to_string(),
                account_id: LOCKED_ACCOUNT.to_string(),
                revoked: false,
                read_only: false,
            },
        ],
        sensors: vec![
            Sensor {
                id: SENSOR.to_string(),
                secret: API_KEY.to_string(),
                account_id: ACCOUNT.to_string(),
                storage_enabled: true,
                trigger_information: None,
            },
            Sensor {
                id: LOCKED_SENSOR.to_string(),
                secret: LOCKED_API_KEY.to_string(),
                account_id: LOCKED_ACCOUNT.to_string(),
                storage_enabled: true,
                trigger_information: Some(vec![SensorTrigger {
                    has_actions: true,
                    is_text_trigger: false,
                }]),
            },
        ],
        triggers: vec![TriggerInfo {
            sensor_id: SENSOR.to_string(),
            triggers: vec![SensorTrigger {
                has_actions: true,
                is_text_trigger: false,
            }],
        }],
        live_data_handlers: vec![LiveDataHandler {
            name: LIVE_TARGET.to_string(),
            enabled: true,
        }],
        live_data_routes: vec![
            LiveDataRoute::new(SENSOR, LIVE_TARGET),
            LiveDataRoute::new(LOCKED_SENSOR, LIVE_TARGET),
        ],
    }
}

pub fn repository() -> Arc<MemoryRepository> {
    Arc::new(MemoryRepository::from_seed(seed()))
}

pub fn measurement(sensor: &str, latitude: f64, longitude: f64) -> PlatformMessage {
    let mut data = std::collections::BTreeMap::new();
    data.insert(
        "temperature".to_string(),
        DataPoint {
            value: 21.5,
            unit: Some("C".to_string()),
            precision: None,
            accuracy: None,
        },
    );
    PlatformMessage::Measurement(Measurement {
        sensor_id: sensor.to_string(),
        platform_timestamp: Utc::now(),
        timestamp: None,
        data,
        location: Some(Location {
            latitude,
            longitude,
        }),
        api_key: None,
    })
}

pub fn text_message(sensor: &str, body: &str) -> PlatformMessage {
    PlatformMessage::Message(TextMessage {
        sensor_id: sensor.to_string(),
        platform_timestamp: Utc::now(),
        timestamp: None,
        data: body.to_string(),
        location: None,
        api_key: None,
    })
}

pub fn control_message(sensor: &str, body: &str) -> PlatformMessage {
    PlatformMessage::ControlMessage(ControlMessage {
        sensor_id: sensor.to_string(),
        platform_timestamp: Utc::now(),
        data: body.to_string(),
        destination: ControlDestination::Mqtt,
        api_key: None,
    })
}

// Loopback helpers

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

pub async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}

/// Wait for a server to respond to /health
pub async fn wait_for_health(client: &Client, base_url: &str) {
    poll_until(|| async {
        client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .ok()
            .map(|_| ())
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} to be healthy", base_url));
}

// Router server

pub struct RouterServer {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RouterServer {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Serve the router's HTTP surface on `port`, return (server handle, base URL)
pub async fn spawn_router_server(service: Arc<RouterService>, port: u16) -> (RouterServer, String) {
    let app = iot_router::build_router(service);
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind router listener");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("router server error: {}", err);
        }
    });

    (
        RouterServer {
            shutdown_tx,
            handle,
        },
        format!("http://127.0.0.1:{}", port),
    )
}

// Mock broker: receives the HttpPublisher's batches

#[derive(Clone, Default)]
struct BrokerState {
    records: Arc<Mutex<Vec<(String, Value)>>>,
}

pub struct MockBroker {
    state: BrokerState,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MockBroker {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }

    pub async fn records(&self, topic: &str) -> Vec<Value> {
        self.state
            .records
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Poll until at least `min_count` records arrived on `topic`
    pub async fn wait_for_records(&self, topic: &str, min_count: usize) -> Vec<Value> {
        poll_until(|| async {
            let records = self.records(topic).await;
            (records.len() >= min_count).then_some(records)
        })
        .await
        .unwrap_or_else(|| panic!("timed out waiting for {} records on {}", min_count, topic))
    }
}

/// Spawn the mock broker, return (broker, base URL)
pub async fn spawn_mock_broker(port: u16) -> (MockBroker, String) {
    let state = BrokerState::default();

    let app = Router::new()
        .route("/health", get(health))
        .route("/*topic", post(ingest))
        .with_state(state.clone());

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind mock broker listener");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock broker server error: {}", err);
        }
    });

    (
        MockBroker {
            state,
            shutdown_tx,
            handle,
        },
        format!("http://127.0.0.1:{}", port),
    )
}

async fn ingest(
    State(state): State<BrokerState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let records = decode_batch(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let mut stored = state.records.lock().await;
    stored.extend(records.into_iter().map(|record| (topic.clone(), record)));
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
