//! # unitwork-app
//!
//! Application layer: the unit of work, repositories and **port
//! definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `StorageEngine` / `StorageTransaction`: record storage with
//!     transactions
//!   - `ReadRepository`: typed lookups against committed state
//! - Provide the **unit of work**: queue writes from any number of
//!   repositories, stamp audit metadata and commit them atomically
//! - Provide **write repositories** (insert, update, merge, delete) that
//!   load persisted subtrees and plan change sets with the domain calculator
//! - Provide a generic **read repository** over any storage engine
//!
//! ## Dependency rule
//! Depends on `unitwork-domain` only (plus `tokio::sync` for locking and
//! cancellation). Never imports adapter crates. Adapters depend on *this*
//! crate, not the reverse.

pub mod cancellation;
pub mod clock;
pub mod ports;
pub mod repository;
pub mod unit_of_work;

mod loader;
mod operation_log;

#[cfg(test)]
mod test_support;

pub use cancellation::Cancellation;
pub use repository::{EngineReadRepository, WriteRepository};
pub use unit_of_work::{
    CommitSummary, ConflictPolicy, UnitOfWork, UnitOfWorkOptions, UnitOfWorkState,
};
