use crate::message::NetworkEvent;

use super::publisher::Publisher;
use super::remote::{FlushResult, RemoteQueue, TopicQueue};

/// Usage-metering events, all on one topic.
pub struct NetworkEventQueue {
    inner: TopicQueue<NetworkEvent>,
    topic: String,
}

impl NetworkEventQueue {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            inner: TopicQueue::new(false),
            topic: topic.into(),
        }
    }

    pub fn enqueue(&self, event: NetworkEvent) {
        self.inner.push(self.topic.clone(), event);
    }
}

#[async_trait::async_trait]
impl RemoteQueue for NetworkEventQueue {
    fn name(&self) -> &'static str {
        "network_event"
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn flush(&self, publisher: &dyn Publisher) -> FlushResult {
        self.inner.flush(self.name(), publisher).await
    }
}
