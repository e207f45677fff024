//! Storage-specific error types for the `SQLite` adapter.

use unitwork_domain::error::{DuplicateIdentifierError, PersistenceError};
use unitwork_domain::id::{EntityKind, GlobalId};

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A database query or connection error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization or deserialization of the payload column failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A migration failed to apply.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An insert collided on the `(kind, global_id)` unique key.
    #[error("{kind} global_id={global_id} already exists")]
    Duplicate { kind: EntityKind, global_id: GlobalId },

    /// A stored row names a kind the engine was not configured with.
    #[error("unknown entity kind {0:?} in stored row")]
    UnknownKind(String),
}

impl StorageError {
    /// Classify a failed insert: unique-key violations become
    /// [`StorageError::Duplicate`], everything else stays a database error.
    pub(crate) fn on_insert(err: sqlx::Error, kind: EntityKind, global_id: GlobalId) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Duplicate { kind, global_id }
            }
            other => Self::Database(other),
        }
    }

    /// Convert into the matching [`PersistenceError`] for propagation across
    /// port boundaries.
    pub fn into_domain(self) -> PersistenceError {
        match self {
            Self::Duplicate { kind, global_id } => {
                DuplicateIdentifierError { kind, global_id }.into()
            }
            other => PersistenceError::Storage(Box::new(other)),
        }
    }
}

impl From<StorageError> for PersistenceError {
    fn from(err: StorageError) -> Self {
        err.into_domain()
    }
}
