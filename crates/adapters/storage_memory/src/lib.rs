//! # unitwork-adapter-storage-memory
//!
//! Volatile storage engine kept entirely in process memory.
//!
//! ## Responsibilities
//! - Implement the storage port traits defined in `unitwork-app::ports::storage`
//! - Serialize write transactions and publish them atomically on commit
//! - Enforce unique global ids and owner/child referential integrity
//! - Inject failures on demand so rollback paths can be exercised
//!
//! ## Dependency rule
//! Depends on `unitwork-app` (for port traits) and `unitwork-domain` (for
//! domain types). The `app` and `domain` crates must never reference this
//! adapter.

pub mod engine;
pub mod error;

pub use engine::{MemoryEngine, MemoryTransaction};
pub use error::StorageError;
