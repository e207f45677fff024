//! In-memory implementation of [`StorageEngine`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use unitwork_app::ports::{Filter, Outcome, StorageEngine, StorageTransaction};
use unitwork_domain::error::PersistenceError;
use unitwork_domain::id::{EntityKind, GlobalId, RecordId};
use unitwork_domain::record::{ParentRef, Record};

use crate::error::StorageError;

/// Records of one kind, ordered by id and indexed by global id.
#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<RecordId, Record>,
    by_global_id: HashMap<GlobalId, RecordId>,
    last_id: i64,
}

impl Table {
    fn get(&self, global_id: GlobalId) -> Option<&Record> {
        self.by_global_id
            .get(&global_id)
            .and_then(|id| self.rows.get(id))
    }

    fn select(&self, filter: Filter) -> Vec<Record> {
        match filter {
            Filter::ById(id) => self.rows.get(&id).cloned().into_iter().collect(),
            Filter::ByGlobalId(global_id) => self.get(global_id).cloned().into_iter().collect(),
            Filter::All | Filter::ByParent(_) => self
                .rows
                .values()
                .filter(|record| filter.matches(record))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Tables(HashMap<EntityKind, Table>);

impl Tables {
    fn select(&self, kind: EntityKind, filter: Filter) -> Vec<Record> {
        self.0
            .get(&kind)
            .map(|table| table.select(filter))
            .unwrap_or_default()
    }

    fn contains(&self, parent: ParentRef) -> bool {
        self.0
            .get(&parent.kind)
            .is_some_and(|table| table.by_global_id.contains_key(&parent.global_id))
    }

    fn owns_children(&self, owner: ParentRef) -> bool {
        self.0
            .values()
            .flat_map(|table| table.rows.values())
            .any(|record| record.parent == Some(owner))
    }

    fn len(&self) -> usize {
        self.0.values().map(|table| table.rows.len()).sum()
    }

    fn ensure_parent(&self, record: &Record) -> Result<(), StorageError> {
        match record.parent {
            Some(parent) if !self.contains(parent) => Err(StorageError::MissingParent {
                kind: record.kind,
                global_id: record.global_id,
                parent,
            }),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, mut record: Record) -> Result<RecordId, StorageError> {
        self.ensure_parent(&record)?;
        let table = self.0.entry(record.kind).or_default();
        if table.by_global_id.contains_key(&record.global_id) {
            return Err(StorageError::Duplicate {
                kind: record.kind,
                global_id: record.global_id,
            });
        }
        table.last_id += 1;
        let id = RecordId::new(table.last_id);
        record.id = id;
        record.version = 1;
        table.by_global_id.insert(record.global_id, id);
        table.rows.insert(id, record);
        Ok(id)
    }

    fn update(&mut self, record: Record) -> Result<Outcome, StorageError> {
        self.ensure_parent(&record)?;
        let Some(stored) = self.0.get_mut(&record.kind).and_then(|table| {
            let id = table.by_global_id.get(&record.global_id)?;
            table.rows.get_mut(id)
        }) else {
            return Ok(Outcome::NotFound);
        };
        stored.parent = record.parent;
        stored.fields = record.fields;
        stored.audit.modified_by = record.audit.modified_by;
        stored.audit.modified_at = record.audit.modified_at;
        stored.version += 1;
        Ok(Outcome::Applied)
    }

    fn delete(&mut self, kind: EntityKind, global_id: GlobalId) -> Result<Outcome, StorageError> {
        if self.owns_children(ParentRef::new(kind, global_id)) {
            return Err(StorageError::StillReferenced { kind, global_id });
        }
        let Some(table) = self.0.get_mut(&kind) else {
            return Ok(Outcome::NotFound);
        };
        match table.by_global_id.remove(&global_id) {
            Some(id) => {
                table.rows.remove(&id);
                Ok(Outcome::Applied)
            }
            None => Ok(Outcome::NotFound),
        }
    }
}

struct Shared {
    committed: RwLock<Tables>,
    writer: Arc<Mutex<()>>,
    fail_on_write: AtomicUsize,
}

/// Volatile storage engine.
///
/// Transactions are serialized: [`begin`](StorageEngine::begin) waits for the
/// previous writer to finish, then works on a private copy of the committed
/// tables that replaces them on commit. Readers always see the last committed
/// state.
///
/// The engine enforces unique `(kind, global_id)` pairs, requires owners to
/// exist before their children and refuses to delete a record that still
/// owns children.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: RwLock::new(Tables::default()),
                writer: Arc::new(Mutex::new(())),
                fail_on_write: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the `n`th write (1-based) of the next transaction that reaches it
    /// fail with [`StorageError::Injected`]. Fires once.
    pub fn fail_on_write(&self, n: usize) {
        self.shared.fail_on_write.store(n, Ordering::SeqCst);
    }

    /// Number of committed records across every kind.
    pub async fn len(&self) -> usize {
        self.shared.committed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine").finish_non_exhaustive()
    }
}

impl StorageEngine for MemoryEngine {
    type Transaction = MemoryTransaction;

    fn find(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<Record>, PersistenceError>> + Send {
        let shared = Arc::clone(&self.shared);
        async move { Ok(shared.committed.read().await.select(kind, filter)) }
    }

    fn begin(&self) -> impl Future<Output = Result<MemoryTransaction, PersistenceError>> + Send {
        let shared = Arc::clone(&self.shared);
        async move {
            let guard = Arc::clone(&shared.writer).lock_owned().await;
            let working = shared.committed.read().await.clone();
            tracing::trace!(records = working.len(), "memory transaction started");
            Ok(MemoryTransaction {
                shared,
                working,
                writes: 0,
                _writer: guard,
            })
        }
    }
}

/// Exclusive write transaction over a [`MemoryEngine`].
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    working: Tables,
    writes: usize,
    _writer: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    fn count_write(&mut self) -> Result<(), StorageError> {
        self.writes += 1;
        let scheduled = self.writes;
        let fired = self
            .shared
            .fail_on_write
            .compare_exchange(scheduled, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if fired {
            return Err(StorageError::Injected(scheduled));
        }
        Ok(())
    }
}

impl StorageTransaction for MemoryTransaction {
    fn find(
        &mut self,
        kind: EntityKind,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<Record>, PersistenceError>> + Send {
        let found = self.working.select(kind, filter);
        async move { Ok(found) }
    }

    fn insert(
        &mut self,
        record: Record,
    ) -> impl Future<Output = Result<RecordId, PersistenceError>> + Send {
        let result = self
            .count_write()
            .and_then(|()| self.working.insert(record))
            .map_err(PersistenceError::from);
        async move { result }
    }

    fn update(
        &mut self,
        record: Record,
    ) -> impl Future<Output = Result<Outcome, PersistenceError>> + Send {
        let result = self
            .count_write()
            .and_then(|()| self.working.update(record))
            .map_err(PersistenceError::from);
        async move { result }
    }

    fn delete(
        &mut self,
        kind: EntityKind,
        global_id: GlobalId,
    ) -> impl Future<Output = Result<Outcome, PersistenceError>> + Send {
        let result = self
            .count_write()
            .and_then(|()| self.working.delete(kind, global_id))
            .map_err(PersistenceError::from);
        async move { result }
    }

    fn commit(self) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        async move {
            let Self {
                shared,
                working,
                writes,
                _writer,
            } = self;
            *shared.committed.write().await = working;
            tracing::trace!(writes, "memory transaction committed");
            Ok(())
        }
    }

    fn rollback(self) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        tracing::trace!(writes = self.writes, "memory transaction rolled back");
        async move {
            drop(self);
            Ok(())
        }
    }
}
