//! Verity Worker - job consumers and the process pool
//!
//! This crate provides the worker processes:
//! - One job at a time from a stream consumer group
//! - Pending entry recovery at startup
//! - Cancel and algorithm lifecycle control channels
//! - A fixed pool of worker processes sized from the available cores

pub mod control;
pub mod error;
pub mod pool;
pub mod role;
pub mod setup;
pub mod shutdown;
pub mod worker;

pub use control::{CancelOutcome, ControlHandler, RunningJob, RunningSlot};
pub use error::{WorkerError, WorkerResult};
pub use pool::{PoolLauncher, PoolPlan, MIN_CORES};
pub use role::WorkerRole;
pub use setup::{build_engine, build_registry, build_sandbox, load_schemas};
pub use shutdown::shutdown_signal;
pub use worker::{EntryOutcome, Worker};
