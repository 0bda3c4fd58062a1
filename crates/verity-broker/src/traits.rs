//! Broker trait definitions

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur during broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Stream or group setup error
    #[error("stream setup error: {0}")]
    Setup(String),

    /// Publish error
    #[error("publish error: {0}")]
    Publish(String),

    /// Consume error
    #[error("consume error: {0}")]
    Consume(String),

    /// Acknowledgment error
    #[error("acknowledgment error: {0}")]
    Ack(String),

    /// Subscribe error
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// Timeout error
    #[error("operation timed out")]
    Timeout,

    /// Pool error
    #[error("connection pool error: {0}")]
    Pool(String),
}

impl From<verity_core::Error> for BrokerError {
    fn from(err: verity_core::Error) -> Self {
        BrokerError::Setup(err.to_string())
    }
}

/// One delivered stream entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Entry id assigned by the server, e.g. `1700000000000-0`
    pub id: String,

    /// Field/value pairs of the entry
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// A consumer bound to one stream under one consumer group identity.
///
/// An entry is in flight for this consumer from delivery until [`ack`]. A
/// crash before the ack leaves it pending, invisible to other consumers,
/// until a consumer with the same identity reads its backlog again.
///
/// [`ack`]: StreamConsumer::ack
#[async_trait]
pub trait StreamConsumer: Send {
    /// Consumer identity within the group
    fn consumer_name(&self) -> &str;

    /// Stream being consumed
    fn stream(&self) -> &str;

    /// Read up to `max_count` never-delivered entries, waiting at most
    /// `block`. Returns an empty list on timeout.
    async fn read_new(&mut self, max_count: usize, block: Duration)
        -> BrokerResult<Vec<StreamEntry>>;

    /// Number of entries delivered to this consumer but not yet acknowledged
    async fn count_pending(&mut self) -> BrokerResult<usize>;

    /// Read up to `count` of this consumer's unacknowledged entries, oldest first
    async fn read_pending(&mut self, count: usize) -> BrokerResult<Vec<StreamEntry>>;

    /// Acknowledge an entry. Returns false if it was not pending.
    async fn ack(&mut self, entry_id: &str) -> BrokerResult<bool>;
}

/// Callback for broadcast messages
#[async_trait]
pub trait BroadcastHandler: Send + Sync + 'static {
    async fn on_message(&self, channel: &str, payload: String);
}

/// Handle to a running broadcast subscription.
///
/// Messages are delivered on a task of their own, concurrently with
/// whatever the subscriber is doing. Dropping the handle stops delivery.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            channel: channel.into(),
            handle,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop delivering messages
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Main broker trait
///
/// Connection errors are returned to the caller, the broker never reconnects
/// silently in the middle of a call.
#[async_trait]
pub trait Broker: Send + Sync + Clone + 'static {
    /// The stream consumer type produced by this broker
    type Consumer: StreamConsumer;

    /// Bind a consumer to `stream` under `group`, creating both if missing
    async fn open_stream(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
    ) -> BrokerResult<Self::Consumer>;

    /// Deliver every message published on `channel` to `handler`.
    /// The subscription is active when this returns.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn BroadcastHandler>,
    ) -> BrokerResult<Subscription>;

    /// Publish on a broadcast channel. Returns true if at least one
    /// subscriber received the message.
    async fn publish_broadcast(&self, channel: &str, message: &str) -> BrokerResult<bool>;

    /// Append an entry to a stream, returning its id
    async fn add_entry(&self, stream: &str, fields: &[(&str, &str)]) -> BrokerResult<String>;
}
