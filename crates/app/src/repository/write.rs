//! Write repository: queues inserts, updates, merges and deletes on a unit
//! of work.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::slice;

use unitwork_domain::audit::Audit;
use unitwork_domain::change_set::{ChangeSet, Operation};
use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::{
    DuplicateIdentifierError, LookupKey, NotFoundError, PersistenceError, StaleComparisonError,
    StaleReason,
};
use unitwork_domain::graph::Node;
use unitwork_domain::id::{EntityKind, GlobalId, RecordId};
use unitwork_domain::record::Record;

use crate::cancellation::Cancellation;
use crate::loader;
use crate::operation_log::OperationLog;
use crate::ports::{Filter, StorageEngine};
use crate::unit_of_work::UnitOfWork;

/// Writes entities of type `T` through the unit of work it was obtained from.
///
/// Every method only plans: the operations are queued on the shared log and
/// reach the store when the unit of work commits. Each returns the number of
/// operations it queued. Range variants validate every element before queueing
/// any of them.
pub struct WriteRepository<'u, E, T> {
    uow: &'u UnitOfWork<E>,
    entity: PhantomData<fn() -> T>,
}

impl<'u, E: StorageEngine, T: DomainEntity> WriteRepository<'u, E, T> {
    pub(crate) fn new(uow: &'u UnitOfWork<E>) -> Self {
        Self {
            uow,
            entity: PhantomData,
        }
    }

    /// Queue the insert of `entity` alone; children are ignored.
    ///
    /// An empty global id is replaced by a fresh one, written back to
    /// `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DuplicateIdentifier`] if the global id is
    /// already stored or queued.
    pub async fn insert(
        &self,
        entity: &mut T,
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.insert_range(slice::from_mut(entity), cancel).await
    }

    /// Queue the insert of every entity in `entities`.
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    #[tracing::instrument(skip_all, fields(kind = %T::KIND, count = entities.len()))]
    pub async fn insert_range(
        &self,
        entities: &mut [T],
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.uow.ensure_open("insert").await?;

        let mut records = Vec::with_capacity(entities.len());
        let mut seen = HashSet::new();
        for entity in entities.iter() {
            cancel.check()?;
            let mut record = Node::root_only(entity)?.record;
            if !seen.insert(record.global_id) || self.stored(record.global_id).await?.is_some() {
                return Err(duplicate(T::KIND, record.global_id));
            }
            record.id = RecordId::UNASSIGNED;
            record.audit = Audit::default();
            record.version = 0;
            records.push(record);
        }

        let queued = self
            .uow
            .with_log("insert", |log| {
                if let Some(record) = records
                    .iter()
                    .find(|r| is_live(log, r.kind, r.global_id))
                {
                    return Err(duplicate(T::KIND, record.global_id));
                }
                log.extend(records.iter().cloned().map(Operation::Insert));
                Ok(records.len())
            })
            .await?;

        for (entity, record) in entities.iter_mut().zip(&records) {
            entity.set_global_id(record.global_id);
        }
        tracing::debug!(queued, "inserts queued");
        Ok(queued)
    }

    /// Queue an overwrite of the stored `entity` alone; children are ignored
    /// and ownership is kept.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotFound`] if no stored or queued entity
    /// has the same global id.
    pub async fn update(
        &self,
        entity: &T,
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.update_range(slice::from_ref(entity), cancel).await
    }

    /// Queue an overwrite of every entity in `entities`.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    #[tracing::instrument(skip_all, fields(kind = %T::KIND, count = entities.len()))]
    pub async fn update_range(
        &self,
        entities: &[T],
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.uow.ensure_open("update").await?;

        let mut planned = Vec::with_capacity(entities.len());
        for entity in entities {
            cancel.check()?;
            let global_id = entity.global_id();
            if global_id.is_empty() {
                return Err(missing(T::KIND, global_id));
            }
            let record = Node::root_only(entity)?.record;
            planned.push((record, self.stored(global_id).await?));
        }

        let queued = self
            .uow
            .with_log("update", |log| {
                let operations = planned
                    .iter()
                    .map(|(record, stored)| plan_update(log, record.clone(), stored.as_ref()))
                    .collect::<Result<Vec<_>, _>>()?;
                let queued = operations.len();
                log.extend(operations);
                Ok(queued)
            })
            .await?;
        tracing::debug!(queued, "updates queued");
        Ok(queued)
    }

    /// Reconcile the store with `entity` and its whole graph: new entities
    /// are inserted, matched ones updated, and stored children missing from
    /// the graph deleted together with their descendants.
    ///
    /// Fresh global ids assigned to the graph are written back to `entity`.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::DuplicateIdentifier`] if the graph repeats a
    ///   global id.
    /// - [`PersistenceError::StaleComparison`] if the graph carries a
    ///   collection that cannot be compared, or touches an entity that already
    ///   has a queued operation.
    pub async fn merge(
        &self,
        entity: &mut T,
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.merge_range(slice::from_mut(entity), cancel).await
    }

    /// Reconcile the store with every graph in `entities`.
    ///
    /// # Errors
    ///
    /// See [`merge`](Self::merge).
    #[tracing::instrument(skip_all, fields(kind = %T::KIND, count = entities.len()))]
    pub async fn merge_range(
        &self,
        entities: &mut [T],
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.uow.ensure_open("merge").await?;
        let (engine, registry) = (self.uow.engine(), self.uow.registry());

        let mut plans = Vec::with_capacity(entities.len());
        let mut touched = HashSet::new();
        for entity in entities.iter() {
            let graph = Node::from_entity(entity)?;
            let filter = Filter::ByGlobalId(graph.global_id());
            let persisted = loader::load_one(engine, registry, T::KIND, filter, cancel).await?;
            let change_set = ChangeSet::for_root(registry, &graph, persisted.as_ref())?;
            claim(&mut touched, &change_set)?;
            tracing::debug!(
                global_id = %graph.global_id(),
                inserts = change_set.inserts(),
                updates = change_set.updates(),
                deletes = change_set.deletes(),
                "merge planned"
            );
            let rebuilt: T = graph.into_entity()?;
            plans.push((rebuilt, change_set));
        }

        let queued = self
            .uow
            .with_log("merge", |log| enqueue(log, plans.iter().map(|(_, cs)| cs)))
            .await?;

        for (entity, (rebuilt, _)) in entities.iter_mut().zip(plans) {
            *entity = rebuilt;
        }
        Ok(queued)
    }

    /// Queue the removal of the stored `entity` and everything it owns,
    /// whatever its in-memory children look like.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NotFound`] if `entity` is not stored.
    pub async fn delete(
        &self,
        entity: &T,
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.delete_range(slice::from_ref(entity), cancel).await
    }

    /// Queue the removal of every entity in `entities`.
    ///
    /// # Errors
    ///
    /// See [`delete`](Self::delete).
    #[tracing::instrument(skip_all, fields(kind = %T::KIND, count = entities.len()))]
    pub async fn delete_range(
        &self,
        entities: &[T],
        cancel: &Cancellation,
    ) -> Result<usize, PersistenceError> {
        self.uow.ensure_open("delete").await?;
        let (engine, registry) = (self.uow.engine(), self.uow.registry());

        let mut plans = Vec::with_capacity(entities.len());
        let mut touched = HashSet::new();
        for entity in entities {
            let global_id = entity.global_id();
            let persisted = if global_id.is_empty() {
                None
            } else {
                let filter = Filter::ByGlobalId(global_id);
                loader::load_one(engine, registry, T::KIND, filter, cancel).await?
            };
            let Some(persisted) = persisted else {
                return Err(missing(T::KIND, global_id));
            };
            let change_set = ChangeSet::for_delete(registry, &persisted)?;
            claim(&mut touched, &change_set)?;
            plans.push(change_set);
        }

        let queued = self
            .uow
            .with_log("delete", |log| enqueue(log, plans.iter()))
            .await?;
        tracing::debug!(queued, "deletes queued");
        Ok(queued)
    }

    async fn stored(&self, global_id: GlobalId) -> Result<Option<Record>, PersistenceError> {
        let records = self
            .uow
            .engine()
            .find(T::KIND, Filter::ByGlobalId(global_id))
            .await?;
        Ok(records.into_iter().next())
    }
}

/// `true` when the entity exists once every queued operation is applied.
fn is_live(log: &OperationLog, kind: EntityKind, global_id: GlobalId) -> bool {
    log.latest(kind, global_id)
        .is_some_and(|op| !matches!(op, Operation::Delete { .. }))
}

fn plan_update(
    log: &OperationLog,
    mut record: Record,
    stored: Option<&Record>,
) -> Result<Operation, PersistenceError> {
    let queued = log.latest(record.kind, record.global_id);
    if matches!(queued, Some(Operation::Delete { .. })) {
        return Err(missing(record.kind, record.global_id));
    }
    match (stored, queued) {
        (Some(stored), _) => {
            record.id = stored.id;
            record.parent = stored.parent;
            record.audit = stored.audit.clone();
            record.version = stored.version;
            Ok(Operation::Update {
                changed: !record.same_value(stored),
                expected_version: Some(stored.version),
                record,
            })
        }
        (None, Some(Operation::Insert(pending) | Operation::Update { record: pending, .. })) => {
            record.id = RecordId::UNASSIGNED;
            record.parent = pending.parent;
            record.audit = Audit::default();
            Ok(Operation::Update {
                changed: !record.same_value(pending),
                expected_version: None,
                record,
            })
        }
        (None, _) => Err(missing(record.kind, record.global_id)),
    }
}

/// Reserve every target of `change_set`, failing when two plans of one call
/// touch the same entity.
fn claim(
    touched: &mut HashSet<(EntityKind, GlobalId)>,
    change_set: &ChangeSet,
) -> Result<(), PersistenceError> {
    for op in change_set.operations() {
        if !touched.insert((op.kind(), op.global_id())) {
            return Err(duplicate(op.kind(), op.global_id()));
        }
    }
    Ok(())
}

fn enqueue<'a>(
    log: &mut OperationLog,
    change_sets: impl Iterator<Item = &'a ChangeSet> + Clone,
) -> Result<usize, PersistenceError> {
    let pending = change_sets
        .clone()
        .flat_map(|change_set| change_set.operations())
        .find(|op| log.is_pending(op.kind(), op.global_id()));
    if let Some(op) = pending {
        return Err(StaleComparisonError {
            kind: op.kind(),
            reason: StaleReason::PendingOperation {
                global_id: op.global_id(),
            },
        }
        .into());
    }

    let mut queued = 0;
    for change_set in change_sets {
        queued += change_set.len();
        log.extend(change_set.operations().cloned());
    }
    Ok(queued)
}

fn duplicate(kind: EntityKind, global_id: GlobalId) -> PersistenceError {
    DuplicateIdentifierError { kind, global_id }.into()
}

fn missing(kind: EntityKind, global_id: GlobalId) -> PersistenceError {
    NotFoundError {
        kind,
        key: LookupKey::GlobalId(global_id),
    }
    .into()
}
