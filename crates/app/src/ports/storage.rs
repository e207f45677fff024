//! Storage port: the engine the unit of work persists records through.
//!
//! The engine is a black box: it stores [`Record`]s keyed by
//! `(kind, global_id)`, assigns [`RecordId`]s and revision numbers, and runs
//! writes inside transactions. Everything above this port works on records
//! and never sees SQL, files or network.

use std::future::Future;

use unitwork_domain::error::PersistenceError;
use unitwork_domain::id::{EntityKind, GlobalId, RecordId};
use unitwork_domain::record::{ParentRef, Record};

/// Which records of a kind a lookup selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    All,
    ById(RecordId),
    ByGlobalId(GlobalId),
    /// Direct children of one owner.
    ByParent(ParentRef),
}

impl Filter {
    /// `true` when `record` is selected by this filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::ById(id) => record.id == *id,
            Self::ByGlobalId(global_id) => record.global_id == *global_id,
            Self::ByParent(parent) => record.parent == Some(*parent),
        }
    }
}

/// Result of an update or delete addressed by global id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    NotFound,
}

/// A storage backend able to read committed state and open transactions.
pub trait StorageEngine: Send + Sync {
    type Transaction: StorageTransaction;

    /// Read committed records of `kind`, ordered by id.
    fn find(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<Record>, PersistenceError>> + Send;

    /// Open a transaction. Writes are invisible to [`find`](Self::find) until
    /// the transaction commits.
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, PersistenceError>> + Send;
}

/// One open storage transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) must
/// leave the store untouched.
pub trait StorageTransaction: Send {
    /// Read records of `kind`, including this transaction's own writes.
    fn find(
        &mut self,
        kind: EntityKind,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<Record>, PersistenceError>> + Send;

    /// Persist a new record and return its assigned id.
    ///
    /// The stored revision is `1`. Fails with
    /// [`PersistenceError::DuplicateIdentifier`] when `(kind, global_id)`
    /// already exists.
    fn insert(
        &mut self,
        record: Record,
    ) -> impl Future<Output = Result<RecordId, PersistenceError>> + Send;

    /// Overwrite the payload, parent and `modified_*` stamps of the record
    /// with the same `(kind, global_id)`, keeping its id and `created_*`
    /// stamps and incrementing its revision.
    fn update(
        &mut self,
        record: Record,
    ) -> impl Future<Output = Result<Outcome, PersistenceError>> + Send;

    /// Remove the record with the given `(kind, global_id)`.
    fn delete(
        &mut self,
        kind: EntityKind,
        global_id: GlobalId,
    ) -> impl Future<Output = Result<Outcome, PersistenceError>> + Send;

    /// Make every write of this transaction durable and visible.
    fn commit(self) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Discard every write of this transaction.
    fn rollback(self) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}
