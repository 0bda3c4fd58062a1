//! Verity Broker - queue transport
//!
//! Two delivery styles over one server connection:
//! - Streams with consumer groups, explicit ack and pending-entry recovery
//! - Fire-and-forget broadcast channels
//!
//! Implementations:
//! - Redis (`XREADGROUP`/`XACK`/`XPENDING`, `SUBSCRIBE`/`PUBLISH`)
//! - In-memory, for tests and single-process runs

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::MemoryBroker;
pub use self::redis::{RedisBroker, RedisBrokerConfig, RedisStreamConsumer};
pub use traits::{
    BroadcastHandler, Broker, BrokerError, BrokerResult, StreamConsumer, StreamEntry,
    Subscription,
};
