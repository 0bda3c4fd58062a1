//! Redis broker implementation using stream consumer groups
//!
//! - `XGROUP CREATE ... MKSTREAM` binds a group to a stream
//! - `XREADGROUP ... >` delivers new entries and records them as pending
//! - `XREADGROUP ... 0` replays this consumer's pending entries
//! - `XACK` removes an entry from the pending list
//! - Control channels use plain `SUBSCRIBE`/`PUBLISH`

use crate::traits::{
    BroadcastHandler, Broker, BrokerError, BrokerResult, StreamConsumer, StreamEntry,
    Subscription,
};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::streams::{StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use verity_core::BrokerConfig;

/// Upper bound on pending entries inspected by `count_pending`
const PENDING_SCAN_LIMIT: usize = 10_000;

/// Configuration for Redis broker
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    /// Connection URL
    pub url: String,

    /// Pool size
    pub pool_size: usize,

    /// Bound on establishing a connection
    pub connect_timeout: Duration,
}

impl Default for RedisBrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 4,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&BrokerConfig> for RedisBrokerConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            url: config.url(),
            pool_size: config.pool_size,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Redis broker implementation
#[derive(Clone)]
pub struct RedisBroker {
    pool: Pool,
    client: redis::Client,
    config: Arc<RedisBrokerConfig>,
}

impl RedisBroker {
    /// Connect to `host:port` with default settings
    pub async fn connect(host: &str, port: u16) -> BrokerResult<Self> {
        let config = RedisBrokerConfig {
            url: format!("redis://{}:{}", host, port),
            ..Default::default()
        };
        Self::with_config(config).await
    }

    /// Create a new Redis broker with custom config
    pub async fn with_config(config: RedisBrokerConfig) -> BrokerResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map_err(|e| BrokerError::Connection(e.to_string()))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        // Test connection
        tokio::time::timeout(config.connect_timeout, async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| BrokerError::Connection(e.to_string()))?;

            redis::cmd("PING")
                .query_async::<_, String>(&mut *conn)
                .await
                .map_err(|e| BrokerError::Connection(e.to_string()))
        })
        .await
        .map_err(|_| BrokerError::Timeout)??;

        info!("Connected to Redis broker at {}", config.url);

        Ok(Self {
            pool,
            client,
            config: Arc::new(config),
        })
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> BrokerResult<Connection> {
        get_conn(&self.pool).await
    }

    /// Check if the server answers
    pub async fn is_connected(&self) -> bool {
        if let Ok(mut conn) = self.get_conn().await {
            redis::cmd("PING")
                .query_async::<_, String>(&mut *conn)
                .await
                .is_ok()
        } else {
            false
        }
    }
}

async fn get_conn(pool: &Pool) -> BrokerResult<Connection> {
    pool.get()
        .await
        .map_err(|e| BrokerError::Pool(e.to_string()))
}

fn into_entry(id: StreamId) -> StreamEntry {
    let fields = id
        .map
        .iter()
        .filter_map(|(field, value)| match redis::from_redis_value::<String>(value) {
            Ok(text) => Some((field.clone(), text)),
            Err(e) => {
                warn!(entry = %id.id, field = %field, "Skipping non-text stream field: {}", e);
                None
            }
        })
        .collect();
    StreamEntry::new(id.id, fields)
}

fn into_entries(reply: Option<StreamReadReply>) -> Vec<StreamEntry> {
    reply
        .map(|reply| {
            reply
                .keys
                .into_iter()
                .flat_map(|key| key.ids)
                .map(into_entry)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Broker for RedisBroker {
    type Consumer = RedisStreamConsumer;

    async fn open_stream(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
    ) -> BrokerResult<Self::Consumer> {
        let mut conn = self.get_conn().await?;

        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => info!(stream, group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream, group, "Consumer group already exists")
            }
            Err(e) => return Err(BrokerError::Setup(e.to_string())),
        }

        Ok(RedisStreamConsumer {
            pool: self.pool.clone(),
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
        let mut pubsub = tokio::time::timeout(self.config.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| BrokerError::Timeout)?
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let channel_name = channel.to_string();
        let handle = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => handler.on_message(&channel_name, payload).await,
                    Err(e) => warn!(channel = %channel_name, "Dropping undecodable message: {}", e),
                }
            }
            warn!(channel = %channel_name, "Broadcast subscription closed by server");
        });

        info!(channel, "Subscribed to broadcast channel");
        Ok(Subscription::new(channel, handle))
    }

    async fn publish_broadcast(&self, channel: &str, message: &str) -> BrokerResult<bool> {
        let mut conn = self.get_conn().await?;
        let receivers: i64 = conn
            .publish(channel, message)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        debug!(channel, receivers, "Published broadcast message");
        Ok(receivers > 0)
    }

    async fn add_entry(&self, stream: &str, fields: &[(&str, &str)]) -> BrokerResult<String> {
        let mut conn = self.get_conn().await?;
        conn.xadd(stream, "*", fields)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

/// Consumer bound to one stream/group/consumer triple
pub struct RedisStreamConsumer {
    pool: Pool,
    group: String,
    consumer: String,
    stream: String,
}

/// XREADGROUP options for new entries. `BLOCK 0` waits forever, so a zero
/// block reads without blocking and shorter blocks round up to 1 ms.
fn new_entry_options(group: &str, consumer: &str, count: usize, block: Duration) -> StreamReadOptions {
    let options = StreamReadOptions::default()
        .group(group, consumer)
        .count(count);
    if block.is_zero() {
        return options;
    }
    let millis = usize::try_from(block.as_millis().max(1)).unwrap_or(usize::MAX);
    options.block(millis)
}

#[async_trait]
impl StreamConsumer for RedisStreamConsumer {
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
        let options = new_entry_options(&self.group, &self.consumer, max_count, block);

        let mut conn = get_conn(&self.pool).await?;
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        Ok(into_entries(reply))
    }

    async fn count_pending(&mut self) -> BrokerResult<usize> {
        let mut conn = get_conn(&self.pool).await?;
        let reply: StreamPendingCountReply = conn
            .xpending_consumer_count(
                &self.stream,
                &self.group,
                "-",
                "+",
                PENDING_SCAN_LIMIT,
                &self.consumer,
            )
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;
        Ok(reply.ids.len())
    }

    async fn read_pending(&mut self, count: usize) -> BrokerResult<Vec<StreamEntry>> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count);

        let mut conn = get_conn(&self.pool).await?;
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &["0"], &options)
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        Ok(into_entries(reply))
    }

    async fn ack(&mut self, entry_id: &str) -> BrokerResult<bool> {
        let mut conn = get_conn(&self.pool).await?;
        let acked: i64 = conn
            .xack(&self.stream, &self.group, &[entry_id])
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))?;
        Ok(acked > 0)
    }
}
