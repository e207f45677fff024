//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the unit of work and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod read_repository;
pub mod storage;

pub use read_repository::ReadRepository;
pub use storage::{Filter, Outcome, StorageEngine, StorageTransaction};
