//! In-memory engine error types.

use unitwork_domain::error::{DuplicateIdentifierError, PersistenceError};
use unitwork_domain::id::{EntityKind, GlobalId};
use unitwork_domain::record::ParentRef;

/// Integrity violations and injected faults raised by [`MemoryEngine`].
///
/// [`MemoryEngine`]: crate::MemoryEngine
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An insert collided on an existing `(kind, global_id)`.
    #[error("{kind} global_id={global_id} already exists")]
    Duplicate { kind: EntityKind, global_id: GlobalId },

    /// A record points at an owner that is not stored.
    #[error("{kind} global_id={global_id} references missing owner {} global_id={}", parent.kind, parent.global_id)]
    MissingParent {
        kind: EntityKind,
        global_id: GlobalId,
        parent: ParentRef,
    },

    /// A record cannot be removed while it still owns children.
    #[error("{kind} global_id={global_id} still owns children")]
    StillReferenced { kind: EntityKind, global_id: GlobalId },

    /// A failure scheduled with [`MemoryEngine::fail_on_write`].
    ///
    /// [`MemoryEngine::fail_on_write`]: crate::MemoryEngine::fail_on_write
    #[error("injected failure on write #{0}")]
    Injected(usize),
}

impl StorageError {
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
