//! Common error types used across the workspace.
//!
//! [`PersistenceError`] is the single error surfaced by every port and use
//! case. Each failure class has its own typed struct so callers can match on
//! the variant and still inspect the details. Adapter crates define their own
//! error enums and convert into [`PersistenceError::Storage`] via `From`.

use std::fmt;

use crate::id::{EntityKind, GlobalId, RecordId};

/// Top-level error for repository, unit-of-work and storage operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// No entity matched the requested identifier.
    #[error("entity not found")]
    NotFound(#[from] NotFoundError),

    /// An insert collided on an existing global identifier.
    #[error("duplicate identifier")]
    DuplicateIdentifier(#[from] DuplicateIdentifierError),

    /// A merge was computed against an incompletely loaded persisted subtree.
    #[error("stale comparison")]
    StaleComparison(#[from] StaleComparisonError),

    /// The unit of work is not in a state that allows the operation.
    #[error("invalid unit of work state")]
    InvalidState(#[from] InvalidStateError),

    /// A concurrent unit of work modified the same entity first.
    #[error("concurrent modification")]
    Conflict(#[from] ConflictError),

    /// Entity fields or the mapping registry could not be used.
    #[error("mapping error")]
    Mapping(#[from] MappingError),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Any failure raised by the underlying storage engine.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PersistenceError {
    /// `true` when retrying with a fresh unit of work may succeed.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::DuplicateIdentifier(_))
    }
}

/// The key used to look an entity up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey {
    Id(RecordId),
    GlobalId(GlobalId),
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id={id}"),
            Self::GlobalId(global_id) => write!(f, "global_id={global_id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} with {key} not found")]
pub struct NotFoundError {
    pub kind: EntityKind,
    pub key: LookupKey,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} with global_id={global_id} already exists")]
pub struct DuplicateIdentifierError {
    pub kind: EntityKind,
    pub global_id: GlobalId,
}

/// Why a persisted subtree could not be trusted for a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The graph carries a collection the persisted side never loaded.
    UnloadedCollection { child: EntityKind },
    /// The persisted node is missing a collection its kind declares.
    MissingCollection { child: EntityKind },
    /// The entity already has an operation queued in the same unit of work.
    PendingOperation { global_id: GlobalId },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnloadedCollection { child } => {
                write!(f, "child collection {child} was not loaded from the store")
            }
            Self::MissingCollection { child } => {
                write!(f, "persisted node lacks declared collection {child}")
            }
            Self::PendingOperation { global_id } => {
                write!(f, "global_id={global_id} already has a queued operation")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("stale comparison for {kind}: {reason}")]
pub struct StaleComparisonError {
    pub kind: EntityKind,
    pub reason: StaleReason,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot {operation} while unit of work is {state}")]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub state: &'static str,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} global_id={global_id} changed concurrently (expected version {expected}, found {found})")]
pub struct ConflictError {
    pub kind: EntityKind,
    pub global_id: GlobalId,
    pub expected: i64,
    pub found: i64,
}

/// Failures converting entities to and from their stored form.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// Entity fields could not be (de)serialized.
    #[error("failed to (de)serialize {kind} fields")]
    Fields {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    /// The registry has no mapping for the kind.
    #[error("entity kind {0} is not registered")]
    UnknownKind(EntityKind),

    /// A record or collection was converted into the wrong entity type.
    #[error("expected {expected}, found {found}")]
    KindMismatch {
        expected: EntityKind,
        found: EntityKind,
    },

    /// A collection of the wrong kind was handed to an entity.
    #[error("{parent} does not own a {child} collection")]
    UnexpectedCollection {
        parent: EntityKind,
        child: EntityKind,
    },
}
