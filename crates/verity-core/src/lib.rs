//! Verity Core - shared types for the verity validation worker pool
//!
//! This crate provides the fundamental building blocks:
//! - Configuration structures
//! - Job messages and status enums
//! - Structured error records
//! - Result update formats
//! - JSON schema helpers

pub mod config;
pub mod error;
pub mod job;
pub mod json;
pub mod record;
pub mod response;
pub mod status;

pub use config::{
    BrokerConfig, ChannelConfig, LoggingConfig, PluginConfig, VerityConfig, WorkerConfig,
};
pub use error::{Error, Result};
pub use job::{JobKind, JobMessage, JobOrigin};
pub use json::{is_empty_string, JsonSchema};
pub use record::{ErrorCategory, ErrorList, ErrorOrigin, ErrorRecord, ErrorSeverity};
pub use response::{JobResponse, ServiceResponse, TaskResponse};
pub use status::{ModelMode, ModelType, ServiceResult, ServiceStatus, TaskStatus};
