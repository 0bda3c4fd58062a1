//! Verity Backend - result update storage
//!
//! Updates are stored as one Redis hash per job (`task:<id>` or
//! `service:<id>`), one hash field per response field. The same store holds
//! the algorithm install directory (`algo:<id>` → `algoPath`).
//! - Redis (production)
//! - In-memory (tests and single-process runs)

pub mod directory;
pub mod memory;
pub mod redis;
pub mod traits;

pub use directory::BackendDirectory;
pub use memory::MemoryBackend;
pub use self::redis::{RedisBackend, RedisBackendConfig};
pub use traits::{update_key, Backend, BackendError, BackendResult};
