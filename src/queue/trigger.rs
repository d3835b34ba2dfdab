use crate::message::{MessageKind, PlatformMessage};

use super::publisher::Publisher;
use super::remote::{FlushResult, RemoteQueue, TopicQueue};

pub const TYPE_NEEDLE: &str = "$type";

/// Messages awaiting trigger evaluation, split by kind.
pub struct TriggerQueue {
    inner: TopicQueue<PlatformMessage>,
    measurements_topic: String,
    messages_topic: String,
}

impl TriggerQueue {
    pub fn new(template: &str) -> Self {
        Self {
            inner: TopicQueue::new(false),
            measurements_topic: template.replace(TYPE_NEEDLE, MessageKind::Measurement.topic_segment()),
            messages_topic: template.replace(TYPE_NEEDLE, MessageKind::Message.topic_segment()),
        }
    }

    /// Queue a measurement or text message. Control messages are not evaluated.
    pub fn enqueue(&self, message: &PlatformMessage) -> bool {
        let topic = match message.kind() {
            MessageKind::Measurement => &self.measurements_topic,
            MessageKind::Message => &self.messages_topic,
            MessageKind::ControlMessage => return false,
        };
        self.inner.push(topic.clone(), message.clone());
        true
    }

    pub fn topics(&self) -> [&str; 2] {
        [&self.measurements_topic, &self.messages_topic]
    }
}

#[async_trait::async_trait]
impl RemoteQueue for TriggerQueue {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn flush(&self, publisher: &dyn Publisher) -> FlushResult {
        self.inner.flush(self.name(), publisher).await
    }
}
