// src/queue/publisher.rs
use anyhow::Context;
use bytes::Bytes;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::codec::decode_batch;

/// Errors that can occur when publishing a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    Timeout,
    Http { status: u16, topic: String },
    Network(String),
    Serialize(String),
    Disconnected,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Timeout => write!(f, "publish timed out"),
            PublishError::Http { status, topic } => write!(f, "HTTP {} publishing to {}", status, topic),
            PublishError::Network(msg) => write!(f, "network error: {}", msg),
            PublishError::Serialize(msg) => write!(f, "serialization error: {}", msg),
            PublishError::Disconnected => write!(f, "publisher is disconnected"),
        }
    }
}

impl std::error::Error for PublishError {}

/// Outbound transport shared by every remote queue.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), PublishError>;

    /// Whether the transport currently believes it can deliver.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Logs every publish instead of delivering it.
#[derive(Debug, Default)]
pub struct LogPublisher;

#[async_trait::async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), PublishError> {
        info!(topic, bytes = payload.len(), retain, "publish");
        Ok(())
    }
}

/// One recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

/// Keeps every publish in memory.
#[derive(Debug)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Published>>,
    connected: AtomicBool,
    failing: AtomicBool,
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Make every publish fail with a network error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.published().into_iter().map(|p| p.topic).collect()
    }

    /// Decoded records of every publish on `topic`, in publish order.
    pub fn records(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .filter_map(|p| decode_batch(&p.payload).ok())
            .flatten()
            .collect()
    }

    pub fn clear(&self) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait::async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        if self.failing.load(Ordering::Acquire) {
            return Err(PublishError::Network("injected failure".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                topic: topic.to_string(),
                payload,
                retain,
            });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

const DEFAULT_RECONNECT_AFTER: Duration = Duration::from_secs(30);

/// POSTs each batch to `{base_url}/{topic}`.
///
/// A transport failure reports the publisher disconnected until either a
/// publish succeeds or `reconnect_after` passes without another failure.
pub struct HttpPublisher {
    client: Client,
    base_url: String,
    last_failure: Mutex<Option<Instant>>,
    reconnect_after: Duration,
}

impl HttpPublisher {
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            last_failure: Mutex::new(None),
            reconnect_after: DEFAULT_RECONNECT_AFTER,
        })
    }

    pub fn with_reconnect_after(mut self, reconnect_after: Duration) -> Self {
        self.reconnect_after = reconnect_after;
        self
    }

    fn mark_failed(&self) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn mark_connected(&self) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn endpoint(&self, topic: &str) -> String {
        format!("{}/{}", self.base_url, topic.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl Publisher for HttpPublisher {
    #[tracing::instrument(name = "http_publish", skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<(), PublishError> {
        let endpoint = self.endpoint(topic);
        debug!(endpoint = %endpoint, "publishing batch");

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/x-ndjson")
            .header("Content-Encoding", "gzip")
            .header("X-Retain", if retain { "true" } else { "false" })
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                self.mark_failed();
                if e.is_timeout() {
                    PublishError::Timeout
                } else {
                    PublishError::Network(e.to_string())
                }
            })?;

        self.mark_connected();
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            error!(endpoint = %endpoint, status, response_body = %body, "publish endpoint returned error status");
            return Err(PublishError::Http {
                status,
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let last_failure = *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last_failure.map_or(true, |failed_at| failed_at.elapsed() >= self.reconnect_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::codec::encode_batch;

    #[tokio::test]
    async fn memory_publisher_records_and_decodes() {
        let publisher = MemoryPublisher::new();
        let payload = encode_batch(&[serde_json::json!({"a": 1}), serde_json::json!({"a": 2})]).unwrap();
        publisher.publish("t", payload, true).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        assert_eq!(publisher.records("t").len(), 2);
        assert!(publisher.records("other").is_empty());
    }

    #[tokio::test]
    async fn disconnected_memory_publisher_refuses() {
        let publisher = MemoryPublisher::new();
        publisher.set_connected(false);
        let err = publisher
            .publish("t", Bytes::from_static(b"x"), false)
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::Disconnected);
        assert!(publisher.published().is_empty());
    }

    #[test]
    fn http_endpoint_joins_topic() {
        let publisher = HttpPublisher::new("http://localhost:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            publisher.endpoint("sensate/trigger/measurements"),
            "http://localhost:9000/sensate/trigger/measurements"
        );
    }

    #[tokio::test]
    async fn unreachable_http_endpoint_marks_disconnected() {
        // port 9 (discard) on loopback is closed in test environments
        let publisher = HttpPublisher::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = publisher
            .publish("t", Bytes::from_static(b"x"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Network(_) | PublishError::Timeout));
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn disconnect_clears_while_idle() {
        let publisher = HttpPublisher::new("http://127.0.0.1:9", Duration::from_millis(500))
            .unwrap()
            .with_reconnect_after(Duration::from_millis(100));
        assert!(publisher
            .publish("t", Bytes::from_static(b"x"), false)
            .await
            .is_err());
        assert!(!publisher.is_connected());

        // no further publishes: the failure ages out on its own
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(publisher.is_connected());
    }
}
