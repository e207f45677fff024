//! # unitwork-adapter-storage-sqlite-sqlx
//!
//! `SQLite` storage engine using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the storage port traits defined in `unitwork-app::ports::storage`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between [`Record`](unitwork_domain::record::Record)s and database rows
//!
//! ## Dependency rule
//! Depends on `unitwork-app` (for port traits) and `unitwork-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod engine;
pub mod error;
pub mod pool;

pub use engine::{SqliteEngine, SqliteTransaction};
pub use error::StorageError;
pub use pool::{Config, Database};
