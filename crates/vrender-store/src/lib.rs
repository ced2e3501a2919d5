//! Render job record store.
//!
//! This crate provides:
//! - The `JobStore` and `ProjectStore` traits consumed by the API and worker
//! - A Redis-backed store for deployments
//! - An in-memory store for tests and local development

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, StoreConfig};
pub use store::{JobStore, OwnedJob, ProjectStore};
