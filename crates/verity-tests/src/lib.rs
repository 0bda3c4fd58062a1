//! Verity Integration Tests
//!
//! Scenario tests driving whole workers over the in-memory broker and
//! backend, with `sh` scripts standing in for compute processes.
//! Run with: `cargo test -p verity-tests`
//!
//! For tests that require Redis:
//! ```sh
//! docker run -d -p 6379:6379 redis:7-alpine
//! cargo test -p verity-tests -- --ignored
//! ```

pub mod common;
pub mod fixtures;
