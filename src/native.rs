use axum::{
    body::Bytes as AxumBytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::message::PlatformMessage;
use crate::service::{RouterService, RouterStatus};

/// Initialize the tracing subscriber.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_ansi(true)).init();
    }
}

pub fn build_router(service: Arc<RouterService>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/health/status", get(handle_status))
        .route("/v1/commands", post(handle_command))
        .route("/v1/messages", post(handle_messages))
        .with_state(service)
}

/// Single message or a batch.
#[derive(Deserialize)]
#[serde(untagged)]
enum MessageBody {
    Batch(Vec<PlatformMessage>),
    One(PlatformMessage),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    pub accepted: usize,
}

async fn handle_health(State(service): State<Arc<RouterService>>) -> Response {
    if service.health().healthy {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy").into_response()
    }
}

async fn handle_status(State(service): State<Arc<RouterService>>) -> Json<RouterStatus> {
    Json(service.status())
}

async fn handle_command(
    State(service): State<Arc<RouterService>>,
    body: AxumBytes,
) -> Result<StatusCode, (StatusCode, String)> {
    service
        .submit_command(Bytes::from(body.to_vec()))
        .await
        .map(|()| StatusCode::ACCEPTED)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

async fn handle_messages(
    State(service): State<Arc<RouterService>>,
    body: AxumBytes,
) -> Result<(StatusCode, Json<Accepted>), (StatusCode, String)> {
    let body: MessageBody = serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid message: {}", e)))?;
    let messages = match body {
        MessageBody::Batch(messages) => messages,
        MessageBody::One(message) => vec![message],
    };

    let accepted = messages.len();
    for message in messages {
        service.submit(message);
    }
    debug!(accepted, "messages accepted");
    Ok((StatusCode::ACCEPTED, Json(Accepted { accepted })))
}
