//! Generic [`ReadRepository`] over any [`StorageEngine`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::PersistenceError;
use unitwork_domain::id::{GlobalId, RecordId};
use unitwork_domain::mapping::MappingRegistry;

use crate::cancellation::Cancellation;
use crate::loader;
use crate::ports::{Filter, ReadRepository, StorageEngine};

/// Reads committed entities of type `T`, rebuilding their whole owned graph.
pub struct EngineReadRepository<E, T> {
    engine: E,
    registry: Arc<MappingRegistry>,
    entity: PhantomData<fn() -> T>,
}

impl<E: StorageEngine, T: DomainEntity> EngineReadRepository<E, T> {
    /// Create a new repository reading through `engine`.
    #[must_use]
    pub fn new(engine: E, registry: Arc<MappingRegistry>) -> Self {
        Self {
            engine,
            registry,
            entity: PhantomData,
        }
    }

    async fn read(
        &self,
        filter: Filter,
        cancel: &Cancellation,
    ) -> Result<Vec<T>, PersistenceError> {
        let nodes = loader::load(&self.engine, &self.registry, T::KIND, filter, cancel).await?;
        nodes
            .into_iter()
            .map(|node| node.into_entity().map_err(PersistenceError::from))
            .collect()
    }
}

impl<E: Clone, T> Clone for EngineReadRepository<E, T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            registry: Arc::clone(&self.registry),
            entity: PhantomData,
        }
    }
}

impl<E: StorageEngine, T: DomainEntity> ReadRepository<T> for EngineReadRepository<E, T> {
    fn read_by_id(
        &self,
        id: RecordId,
        cancel: &Cancellation,
    ) -> impl Future<Output = Result<Option<T>, PersistenceError>> + Send {
        async move {
            let found = self.read(Filter::ById(id), cancel).await?;
            Ok(found.into_iter().next())
        }
    }

    fn read_by_global_id(
        &self,
        global_id: GlobalId,
        cancel: &Cancellation,
    ) -> impl Future<Output = Result<Option<T>, PersistenceError>> + Send {
        async move {
            if global_id.is_empty() {
                return Ok(None);
            }
            let found = self.read(Filter::ByGlobalId(global_id), cancel).await?;
            Ok(found.into_iter().next())
        }
    }

    fn read_all(
        &self,
        cancel: &Cancellation,
    ) -> impl Future<Output = Result<Vec<T>, PersistenceError>> + Send {
        async move { self.read(Filter::All, cancel).await }
    }
}
