//! In-memory broker with consumer-group semantics
//!
//! Mirrors the Redis stream contract closely enough to drive workers in
//! tests: per-group delivery cursor, per-consumer pending entries, explicit
//! ack, and broadcast channels.

use crate::traits::{
    BroadcastHandler, Broker, BrokerError, BrokerResult, StreamConsumer, StreamEntry,
    Subscription,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct GroupState {
    /// Index of the next never-delivered entry
    cursor: usize,
    /// Delivered but unacknowledged entry ids, in delivery order, with their owner
    pending: IndexMap<String, String>,
}

#[derive(Default)]
struct MemoryStream {
    entries: Vec<StreamEntry>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct MemoryState {
    streams: Mutex<HashMap<String, MemoryStream>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    appended: Notify,
    unavailable: AtomicBool,
}

/// In-memory broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<MemoryState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent stream operation fail with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Ids pending for `group` on `stream`, across all consumers
    pub fn pending_ids(&self, stream: &str, group: &str) -> Vec<String> {
        let streams = self.state.streams();
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries ever appended to `stream`
    pub fn stream_len(&self, stream: &str) -> usize {
        self.state
            .streams()
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self
            .state
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl MemoryState {
    fn streams(&self) -> MutexGuard<'_, HashMap<String, MemoryStream>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> BrokerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BrokerError::Connection("memory broker marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Consumer = MemoryStreamConsumer;

    async fn open_stream(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
    ) -> BrokerResult<Self::Consumer> {
        self.state.check_available()?;
        self.state
            .streams()
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();

        Ok(MemoryStreamConsumer {
            state: Arc::clone(&self.state),
            group: group.to_string(),
            consumer: consumer.to_string(),
            stream: stream.to_string(),
        })
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn BroadcastHandler>,
    ) -> BrokerResult<Subscription> {
        let mut receiver = self.sender(channel).subscribe();
        let channel_name = channel.to_string();

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => handler.on_message(&channel_name, payload).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel_name, skipped, "Broadcast subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(channel, handle))
    }

    async fn publish_broadcast(&self, channel: &str, message: &str) -> BrokerResult<bool> {
        match self.sender(channel).send(message.to_string()) {
            Ok(receivers) => {
                debug!(channel, receivers, "Published broadcast message");
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn add_entry(&self, stream: &str, fields: &[(&str, &str)]) -> BrokerResult<String> {
        self.state.check_available()?;
        let id = {
            let mut streams = self.state.streams();
            let stream = streams.entry(stream.to_string()).or_default();
            stream.next_seq += 1;
            let id = format!("{}-0", stream.next_seq);
            stream.entries.push(StreamEntry::new(
                id.clone(),
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
            id
        };
        self.state.appended.notify_waiters();
        Ok(id)
    }
}

/// Consumer over a [`MemoryBroker`] stream
pub struct MemoryStreamConsumer {
    state: Arc<MemoryState>,
    group: String,
    consumer: String,
    stream: String,
}

impl MemoryStreamConsumer {
    fn take_new(&self, max_count: usize) -> BrokerResult<Vec<StreamEntry>> {
        self.state.check_available()?;
        let mut streams = self.state.streams();
        let stream = streams
            .get_mut(&self.stream)
            .ok_or_else(|| BrokerError::Consume(format!("no such stream: {}", self.stream)))?;
        let group = stream
            .groups
            .get_mut(&self.group)
            .ok_or_else(|| BrokerError::Consume(format!("no such group: {}", self.group)))?;

        let end = (group.cursor + max_count).min(stream.entries.len());
        let delivered: Vec<StreamEntry> = stream.entries[group.cursor..end].to_vec();
        group.cursor = end;
        for entry in &delivered {
            group.pending.insert(entry.id.clone(), self.consumer.clone());
        }
        Ok(delivered)
    }

    fn owned_pending(&self) -> BrokerResult<Vec<StreamEntry>> {
        self.state.check_available()?;
        let streams = self.state.streams();
        let Some(stream) = streams.get(&self.stream) else {
            return Ok(Vec::new());
        };
        let Some(group) = stream.groups.get(&self.group) else {
            return Ok(Vec::new());
        };
        Ok(group
            .pending
            .iter()
            .filter(|(_, owner)| **owner == self.consumer)
            .filter_map(|(id, _)| stream.entries.iter().find(|e| &e.id == id).cloned())
            .collect())
    }
}

#[async_trait]
impl StreamConsumer for MemoryStreamConsumer {
    fn consumer_name(&self) -> &str {
        &self.consumer
    }

    fn stream(&self) -> &str {
        &self.stream
    }

    async fn read_new(
        &mut self,
        max_count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let appended = self.state.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let delivered = self.take_new(max_count)?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn count_pending(&mut self) -> BrokerResult<usize> {
        Ok(self.owned_pending()?.len())
    }

    async fn read_pending(&mut self, count: usize) -> BrokerResult<Vec<StreamEntry>> {
        let mut pending = self.owned_pending()?;
        pending.truncate(count);
        Ok(pending)
    }

    async fn ack(&mut self, entry_id: &str) -> BrokerResult<bool> {
        self.state.check_available()?;
        let mut streams = self.state.streams();
        Ok(streams
            .get_mut(&self.stream)
            .and_then(|s| s.groups.get_mut(&self.group))
            .and_then(|g| g.pending.shift_remove(entry_id))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_read_new_times_out_empty() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.open_stream("g", "Worker1", "s").await.unwrap();
        let entries = consumer.read_new(1, Duration::from_millis(20)).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_read_new_wakes_on_append() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.open_stream("g", "Worker1", "s").await.unwrap();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.add_entry("s", &[("task", "x")]).await.unwrap();
        });

        let entries = consumer.read_new(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields["task"], "x");
    }

    #[tokio::test]
    async fn test_competing_consumers_and_pending() {
        let broker = MemoryBroker::new();
        let mut first = broker.open_stream("g", "Worker1", "s").await.unwrap();
        let mut second = broker.open_stream("g", "Worker2", "s").await.unwrap();

        let a = broker.add_entry("s", &[("task", "a")]).await.unwrap();
        let b = broker.add_entry("s", &[("task", "b")]).await.unwrap();

        let got_first = first.read_new(1, Duration::ZERO).await.unwrap();
        let got_second = second.read_new(1, Duration::ZERO).await.unwrap();
        assert_eq!(got_first[0].id, a);
        assert_eq!(got_second[0].id, b);

        assert_eq!(first.count_pending().await.unwrap(), 1);
        assert_eq!(second.count_pending().await.unwrap(), 1);

        // Same identity after a restart sees its own backlog only
        let mut restarted = broker.open_stream("g", "Worker1", "s").await.unwrap();
        let pending = restarted.read_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a);

        assert!(restarted.ack(&a).await.unwrap());
        assert!(!restarted.ack(&a).await.unwrap());
        assert_eq!(broker.stream_len("s"), 2);
        assert_eq!(broker.pending_ids("s", "g"), vec![b]);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let broker = MemoryBroker::new();
        broker.add_entry("s", &[("task", "a")]).await.unwrap();
        let mut one = broker.open_stream("g1", "Worker1", "s").await.unwrap();
        let mut two = broker.open_stream("g2", "Worker1", "s").await.unwrap();
        assert_eq!(one.read_new(5, Duration::ZERO).await.unwrap().len(), 1);
        assert_eq!(two.read_new(5, Duration::ZERO).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.open_stream("g", "Worker1", "s").await.unwrap();
        broker.set_unavailable(true);
        assert!(matches!(
            consumer.read_new(1, Duration::ZERO).await,
            Err(BrokerError::Connection(_))
        ));
    }

    struct Forward(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl BroadcastHandler for Forward {
        async fn on_message(&self, _channel: &str, payload: String) {
            let _ = self.0.send(payload);
        }
    }

    #[tokio::test]
    async fn test_broadcast() {
        let broker = MemoryBroker::new();
        assert!(!broker.publish_broadcast("c", "nobody").await.unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = broker.subscribe("c", Arc::new(Forward(tx))).await.unwrap();
        assert!(broker.publish_broadcast("c", "hello").await.unwrap());
        assert_eq!(rx.recv().await.unwrap(), "hello");

        subscription.stop();
        tokio::task::yield_now().await;
    }
}
