//! Batched outbound queues and the publish transport behind them.
//!
//! Enqueue is a non-blocking append onto a [`Deque`](crate::collections::Deque).
//! A timer calls [`RemoteQueues::flush_all`], which drains each queue and issues
//! one compressed publish per topic. An empty queue publishes nothing. A batch
//! whose publish fails after draining is dropped and logged, never retried.

pub mod codec;
mod live_data;
mod network_event;
mod public;
mod publisher;
mod remote;
mod storage;
mod trigger;

use futures::future::join_all;

pub use live_data::LiveDataQueue;
pub use network_event::NetworkEventQueue;
pub use public::PublicQueue;
pub use publisher::{HttpPublisher, LogPublisher, MemoryPublisher, PublishError, Published, Publisher};
pub use remote::{FlushResult, RemoteQueue, TopicQueue};
pub use storage::StorageQueue;
pub use trigger::TriggerQueue;

use crate::config::QueueConfig;

/// Every outbound queue the router fans out to.
pub struct RemoteQueues {
    pub trigger: TriggerQueue,
    pub storage: StorageQueue,
    pub live_data: LiveDataQueue,
    pub public: PublicQueue,
    pub network_events: NetworkEventQueue,
}

/// Per-queue depths for health and status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueDepths {
    pub input: usize,
    pub trigger: usize,
    pub storage: usize,
    pub live_data: usize,
    pub public: usize,
    pub network_events: usize,
}

impl RemoteQueues {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            trigger: TriggerQueue::new(&config.trigger_topic_template),
            storage: StorageQueue::new(
                config.measurement_storage_topic.clone(),
                config.message_storage_topic.clone(),
            ),
            live_data: LiveDataQueue::new(config.live_data_topic_template.clone()),
            public: PublicQueue::new(),
            network_events: NetworkEventQueue::new(config.network_event_topic.clone()),
        }
    }

    pub fn all(&self) -> [&dyn RemoteQueue; 5] {
        [
            &self.trigger,
            &self.storage,
            &self.live_data,
            &self.public,
            &self.network_events,
        ]
    }

    /// Depths of the remote queues; `input` is left for the caller to fill in.
    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            input: 0,
            trigger: self.trigger.len(),
            storage: self.storage.len(),
            live_data: self.live_data.len(),
            public: self.public.len(),
            network_events: self.network_events.len(),
        }
    }

    /// Flush every queue concurrently.
    pub async fn flush_all(&self, publisher: &dyn Publisher) -> FlushResult {
        let results = join_all(self.all().into_iter().map(|queue| queue.flush(publisher))).await;
        results
            .into_iter()
            .fold(FlushResult::default(), |mut acc, result| {
                acc.merge(result);
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        ControlDestination, ControlMessage, Measurement, MessageKind, NetworkEvent,
        PlatformMessage, TextMessage,
    };
    use chrono::Utc;

    fn measurement(sensor: &str) -> PlatformMessage {
        PlatformMessage::Measurement(Measurement {
            sensor_id: sensor.to_string(),
            platform_timestamp: Utc::now(),
            timestamp: None,
            data: Default::default(),
            location: None,
            api_key: None,
        })
    }

    fn text(sensor: &str) -> PlatformMessage {
        PlatformMessage::Message(TextMessage {
            sensor_id: sensor.to_string(),
            platform_timestamp: Utc::now(),
            timestamp: None,
            data: "hello".to_string(),
            location: None,
            api_key: None,
        })
    }

    fn control(sensor: &str) -> PlatformMessage {
        PlatformMessage::ControlMessage(ControlMessage {
            sensor_id: sensor.to_string(),
            platform_timestamp: Utc::now(),
            data: "reboot".to_string(),
            destination: ControlDestination::Mqtt,
            api_key: None,
        })
    }

    fn queues() -> RemoteQueues {
        RemoteQueues::new(&QueueConfig::default())
    }

    #[test]
    fn trigger_topics_expand_type() {
        let q = queues();
        assert_eq!(
            q.trigger.topics(),
            ["sensate/trigger/measurements", "sensate/trigger/messages"]
        );
        assert!(q.trigger.enqueue(&measurement("s1")));
        assert!(!q.trigger.enqueue(&control("s1")));
        assert_eq!(q.trigger.len(), 1);
    }

    #[test]
    fn live_data_counts_per_target() {
        let q = queues();
        q.live_data.enqueue("s1", &measurement("a"));
        q.live_data.enqueue("s1", &control("a"));
        q.live_data.enqueue("s2", &text("a"));
        assert_eq!(q.live_data.len_for_target("s1"), 2);
        assert_eq!(q.live_data.len_for_target("s2"), 1);
        assert_eq!(
            q.live_data.topic(MessageKind::Message, "s2"),
            "sensate/live/messages/s2"
        );
    }

    #[tokio::test]
    async fn flush_all_publishes_once_per_destination() {
        let q = queues();
        q.storage.enqueue(&measurement("s1"));
        q.storage.enqueue(&measurement("s2"));
        q.storage.enqueue(&text("s1"));
        q.live_data.enqueue("dash", &measurement("s1"));
        q.live_data.enqueue("dash", &measurement("s2"));
        q.live_data.enqueue("ops", &measurement("s1"));
        q.network_events.enqueue(NetworkEvent {
            sensor_id: "s1".into(),
            account_id: "a1".into(),
            message_kind: MessageKind::Measurement,
            actions: vec![],
        });

        let publisher = MemoryPublisher::new();
        let result = q.flush_all(&publisher).await;

        // storage: 2 topics, live: 2 targets, network events: 1
        assert_eq!(result.publishes(), 5);
        assert_eq!(result.delivered(), 7);
        assert_eq!(q.depths(), QueueDepths::default());
        assert_eq!(publisher.records("sensate/storage/measurements").len(), 2);
        assert_eq!(publisher.records("sensate/live/measurements/dash").len(), 2);

        // nothing queued, nothing published
        publisher.clear();
        assert_eq!(q.flush_all(&publisher).await.publishes(), 0);
        assert!(publisher.published().is_empty());
    }
}
