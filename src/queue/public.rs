use crate::message::PlatformMessage;

use super::publisher::Publisher;
use super::remote::{FlushResult, RemoteQueue, TopicQueue};

/// Public republish: actuator commands and optional public copies of data.
pub struct PublicQueue {
    inner: TopicQueue<PlatformMessage>,
}

impl Default for PublicQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicQueue {
    pub fn new() -> Self {
        Self {
            inner: TopicQueue::new(false),
        }
    }

    pub fn enqueue(&self, topic: impl Into<String>, message: &PlatformMessage) {
        self.inner.push(topic, message.clone());
    }
}

#[async_trait::async_trait]
impl RemoteQueue for PublicQueue {
    fn name(&self) -> &'static str {
        "public"
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn flush(&self, publisher: &dyn Publisher) -> FlushResult {
        self.inner.flush(self.name(), publisher).await
    }
}
