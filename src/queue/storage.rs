use crate::message::{MessageKind, PlatformMessage};

use super::publisher::Publisher;
use super::remote::{FlushResult, RemoteQueue, TopicQueue};

/// Durable-storage fan-out. Measurements and text messages go to separate topics.
pub struct StorageQueue {
    inner: TopicQueue<PlatformMessage>,
    measurements_topic: String,
    messages_topic: String,
}

impl StorageQueue {
    pub fn new(measurements_topic: impl Into<String>, messages_topic: impl Into<String>) -> Self {
        Self {
            inner: TopicQueue::new(false),
            measurements_topic: measurements_topic.into(),
            messages_topic: messages_topic.into(),
        }
    }

    pub fn enqueue(&self, message: &PlatformMessage) -> bool {
        let topic = match message.kind() {
            MessageKind::Measurement => &self.measurements_topic,
            MessageKind::Message => &self.messages_topic,
            MessageKind::ControlMessage => return false,
        };
        self.inner.push(topic.clone(), message.clone());
        true
    }
}

#[async_trait::async_trait]
impl RemoteQueue for StorageQueue {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn flush(&self, publisher: &dyn Publisher) -> FlushResult {
        self.inner.flush(self.name(), publisher).await
    }
}
