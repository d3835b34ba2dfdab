use crate::message::{MessageKind, PlatformMessage};

use super::publisher::Publisher;
use super::remote::{FlushResult, RemoteQueue, TopicQueue};
use super::trigger::TYPE_NEEDLE;

pub const TARGET_NEEDLE: &str = "$target";

const KINDS: [MessageKind; 3] = [
    MessageKind::Measurement,
    MessageKind::Message,
    MessageKind::ControlMessage,
];

/// Real-time fan-out. One topic per (kind, target), so every flush publishes
/// at most one batch per target and kind.
pub struct LiveDataQueue {
    inner: TopicQueue<PlatformMessage>,
    template: String,
}

impl LiveDataQueue {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            inner: TopicQueue::new(false),
            template: template.into(),
        }
    }

    pub fn topic(&self, kind: MessageKind, target: &str) -> String {
        self.template
            .replace(TYPE_NEEDLE, kind.topic_segment())
            .replace(TARGET_NEEDLE, target)
    }

    pub fn enqueue(&self, target: &str, message: &PlatformMessage) {
        self.inner
            .push(self.topic(message.kind(), target), message.clone());
    }

    /// Items currently queued for one target, across all kinds.
    pub fn len_for_target(&self, target: &str) -> usize {
        let topics: Vec<String> = KINDS.iter().map(|kind| self.topic(*kind, target)).collect();
        self.inner
            .len_where(|topic| topics.iter().any(|t| t == topic))
    }
}

#[async_trait::async_trait]
impl RemoteQueue for LiveDataQueue {
    fn name(&self) -> &'static str {
        "live_data"
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn flush(&self, publisher: &dyn Publisher) -> FlushResult {
        self.inner.flush(self.name(), publisher).await
    }
}
