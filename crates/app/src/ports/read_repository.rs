//! Read repository port: typed lookups against committed state.

use std::future::Future;

use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::PersistenceError;
use unitwork_domain::id::{GlobalId, RecordId};

use crate::cancellation::Cancellation;

/// Read-only access to persisted entities of type `T`, children included.
pub trait ReadRepository<T: DomainEntity> {
    /// Get an entity by its store-assigned id.
    fn read_by_id(
        &self,
        id: RecordId,
        cancel: &Cancellation,
    ) -> impl Future<Output = Result<Option<T>, PersistenceError>> + Send;

    /// Get an entity by its global id.
    fn read_by_global_id(
        &self,
        global_id: GlobalId,
        cancel: &Cancellation,
    ) -> impl Future<Output = Result<Option<T>, PersistenceError>> + Send;

    /// Get every entity of type `T`, ordered by id.
    fn read_all(
        &self,
        cancel: &Cancellation,
    ) -> impl Future<Output = Result<Vec<T>, PersistenceError>> + Send;
}
