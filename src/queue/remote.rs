// src/queue/remote.rs
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, Span};

use super::codec::encode_batch;
use super::publisher::Publisher;
use crate::collections::Deque;

/// Result of flushing one queue
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    /// Records delivered per topic.
    pub succeeded: HashMap<String, usize>,
    /// Error per topic. Records for these topics are gone.
    pub failed: HashMap<String, String>,
}

impl FlushResult {
    pub fn delivered(&self) -> usize {
        self.succeeded.values().sum()
    }

    pub fn publishes(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn merge(&mut self, other: FlushResult) {
        for (topic, count) in other.succeeded {
            *self.succeeded.entry(topic).or_insert(0) += count;
        }
        self.failed.extend(other.failed);
    }
}

/// Batched outbound buffer for one destination family.
#[async_trait::async_trait]
pub trait RemoteQueue: Send + Sync {
    fn name(&self) -> &'static str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything queued and publish one batch per topic.
    async fn flush(&self, publisher: &dyn Publisher) -> FlushResult;
}

struct Outbound<T> {
    topic: String,
    record: T,
}

/// FIFO of `(topic, record)` pairs shared by every remote queue.
pub struct TopicQueue<T> {
    items: Deque<Outbound<T>>,
    retain: bool,
}

impl<T> TopicQueue<T>
where
    T: Serialize + Send + Sync,
{
    pub fn new(retain: bool) -> Self {
        Self {
            items: Deque::new(),
            retain,
        }
    }

    pub fn push(&self, topic: impl Into<String>, record: T) {
        self.items.add(Outbound {
            topic: topic.into(),
            record,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len_where(&self, topic: impl Fn(&str) -> bool) -> usize {
        self.items.count_where(|item| topic(&item.topic))
    }

    /// Group by topic, keeping first-seen topic order and FIFO order inside each topic.
    fn group(drained: Vec<Outbound<T>>) -> Vec<(String, Vec<T>)> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<T>)> = Vec::new();
        for item in drained {
            match index.get(&item.topic) {
                Some(&slot) => groups[slot].1.push(item.record),
                None => {
                    index.insert(item.topic.clone(), groups.len());
                    groups.push((item.topic, vec![item.record]));
                }
            }
        }
        groups
    }

    #[tracing::instrument(
        name = "queue_flush",
        skip(self, publisher),
        fields(queue = name, records = tracing::field::Empty, topics = tracing::field::Empty)
    )]
    pub async fn flush(&self, name: &'static str, publisher: &dyn Publisher) -> FlushResult {
        let drained = self.items.drain();
        let mut result = FlushResult::default();
        if drained.is_empty() {
            return result;
        }

        let records = drained.len();
        let groups = Self::group(drained);
        Span::current().record("records", records);
        Span::current().record("topics", groups.len());

        let mut publishes = Vec::with_capacity(groups.len());
        for (topic, batch) in groups {
            let count = batch.len();
            match encode_batch(&batch) {
                Ok(payload) => {
                    let retain = self.retain;
                    publishes.push(async move {
                        let outcome = publisher.publish(&topic, payload, retain).await;
                        (topic, count, outcome)
                    });
                }
                Err(e) => {
                    error!(topic = %topic, count, error = %e, "failed to encode batch, dropping");
                    result.failed.insert(topic, e.to_string());
                }
            }
        }

        for (topic, count, outcome) in join_all(publishes).await {
            match outcome {
                Ok(()) => {
                    debug!(topic = %topic, count, "batch published");
                    result.succeeded.insert(topic, count);
                }
                Err(e) => {
                    error!(topic = %topic, count, error = %e, "publish failed, batch dropped");
                    result.failed.insert(topic, e.to_string());
                }
            }
        }
        result
    }
}
