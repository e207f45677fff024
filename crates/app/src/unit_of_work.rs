//! Unit of work: batches repository writes into one atomic commit.
//!
//! ## Lifecycle
//! ```text
//! Idle ──repository()/begin()──▶ Active ──commit()──▶ Committing ──▶ Committed
//!   │                              │                       └──────────▶ RolledBack
//!   └──────────discard()/drop──────┴──────────────────────────────────▶ Discarded
//! ```
//! Repositories obtained from one unit of work share its operation log.
//! Nothing reaches the store before [`UnitOfWork::commit`], which stamps every
//! queued operation with the committer and a single timestamp, then applies
//! them in queue order inside one storage transaction.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use unitwork_domain::change_set::Operation;
use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::{
    ConflictError, InvalidStateError, LookupKey, MappingError, NotFoundError, PersistenceError,
};
use unitwork_domain::id::{EntityKind, GlobalId};
use unitwork_domain::mapping::MappingRegistry;
use unitwork_domain::time::Timestamp;

use crate::cancellation::Cancellation;
use crate::clock::{Clock, SystemClock};
use crate::operation_log::OperationLog;
use crate::ports::{Filter, Outcome, StorageEngine, StorageTransaction};
use crate::repository::WriteRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Idle,
    Active,
    Committing,
    Committed,
    RolledBack,
    Discarded,
}

impl UnitOfWorkState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Discarded => "discarded",
        }
    }

    /// `true` while operations may still be queued.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Idle | Self::Active)
    }
}

impl fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How commits treat records changed by someone else since they were read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Overwrite whatever is stored.
    #[default]
    LastWriterWins,
    /// Fail with [`PersistenceError::Conflict`] when an updated or deleted
    /// record's revision moved since the operation was planned.
    DetectConflicts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitOfWorkOptions {
    pub conflict_policy: ConflictPolicy,
}

/// What a successful commit wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub committed_at: Timestamp,
}

impl CommitSummary {
    fn empty(committed_at: Timestamp) -> Self {
        Self {
            inserted: 0,
            updated: 0,
            deleted: 0,
            committed_at,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

struct Inner {
    state: UnitOfWorkState,
    log: OperationLog,
}

impl Inner {
    fn ensure_open(&mut self, operation: &'static str) -> Result<(), PersistenceError> {
        if !self.state.is_open() {
            return Err(InvalidStateError {
                operation,
                state: self.state.as_str(),
            }
            .into());
        }
        self.state = UnitOfWorkState::Active;
        Ok(())
    }
}

/// Transaction-scoped coordinator over a storage engine `E`.
pub struct UnitOfWork<E> {
    engine: E,
    registry: Arc<MappingRegistry>,
    options: UnitOfWorkOptions,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl<E: StorageEngine> UnitOfWork<E> {
    /// Create an idle unit of work over `engine`.
    #[must_use]
    pub fn new(engine: E, registry: Arc<MappingRegistry>) -> Self {
        Self {
            engine,
            registry,
            options: UnitOfWorkOptions::default(),
            clock: Arc::new(SystemClock),
            inner: Mutex::new(Inner {
                state: UnitOfWorkState::Idle,
                log: OperationLog::default(),
            }),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: UnitOfWorkOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }

    pub(crate) fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub async fn state(&self) -> UnitOfWorkState {
        self.inner.lock().await.state
    }

    /// Number of queued operations.
    pub async fn pending(&self) -> usize {
        self.inner.lock().await.log.len()
    }

    /// Move from `Idle` to `Active`. A no-op while already active.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidState`] once the unit of work has
    /// been committed, rolled back or discarded.
    pub async fn begin(&self) -> Result<(), PersistenceError> {
        self.inner.lock().await.ensure_open("begin")
    }

    /// A write repository for `T` bound to this unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidState`] once the unit of work is
    /// closed, or [`PersistenceError::Mapping`] if `T` is not registered.
    pub async fn repository<T: DomainEntity>(
        &self,
    ) -> Result<WriteRepository<'_, E, T>, PersistenceError> {
        if !self.registry.is_registered(T::KIND) {
            return Err(MappingError::UnknownKind(T::KIND).into());
        }
        self.inner.lock().await.ensure_open("acquire repository")?;
        Ok(WriteRepository::new(self))
    }

    /// Run `f` against the log while the unit of work is open.
    pub(crate) async fn with_log<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut OperationLog) -> Result<R, PersistenceError>,
    ) -> Result<R, PersistenceError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open(operation)?;
        f(&mut inner.log)
    }

    pub(crate) async fn ensure_open(
        &self,
        operation: &'static str,
    ) -> Result<(), PersistenceError> {
        self.inner.lock().await.ensure_open(operation)
    }

    /// Drop every queued operation without writing. Returns how many were
    /// dropped; a no-op once committed.
    pub async fn discard(&self) -> usize {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_open() {
            return 0;
        }
        inner.state = UnitOfWorkState::Discarded;
        let dropped = inner.log.take().len();
        tracing::debug!(dropped, "unit of work discarded");
        dropped
    }

    /// Stamp and apply every queued operation atomically.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::InvalidState`] when the unit of work is closed.
    /// - [`PersistenceError::Cancelled`] when `cancel` fires; before the
    ///   transaction starts the unit of work is discarded, afterwards it is
    ///   rolled back.
    /// - any storage, not-found, duplicate or conflict error raised while
    ///   applying; the transaction is rolled back and nothing is written.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn commit(
        &self,
        committer: &str,
        cancel: &Cancellation,
    ) -> Result<CommitSummary, PersistenceError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open("commit")?;

        if let Err(err) = cancel.check() {
            let dropped = inner.log.take().len();
            inner.state = UnitOfWorkState::Discarded;
            tracing::debug!(dropped, "commit cancelled before start");
            return Err(err);
        }

        inner.state = UnitOfWorkState::Committing;
        let mut operations = inner.log.take();
        let committed_at = self.clock.now();
        for operation in &mut operations {
            operation.stamp(committer, committed_at);
        }

        match self.apply(operations, committed_at, cancel).await {
            Ok(summary) => {
                inner.state = UnitOfWorkState::Committed;
                tracing::info!(
                    inserted = summary.inserted,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    "unit of work committed"
                );
                Ok(summary)
            }
            Err(err) => {
                inner.state = UnitOfWorkState::RolledBack;
                tracing::warn!(error = %err, "unit of work rolled back");
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        operations: Vec<Operation>,
        committed_at: Timestamp,
        cancel: &Cancellation,
    ) -> Result<CommitSummary, PersistenceError> {
        let mut tx = self.engine.begin().await?;
        let mut summary = CommitSummary::empty(committed_at);

        let mut result = Ok(());
        for operation in operations {
            result = match cancel.check() {
                Ok(()) => self.apply_one(&mut tx, operation, &mut summary).await,
                Err(err) => Err(err),
            };
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = cancel.check();
        }

        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(summary)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "storage rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn apply_one(
        &self,
        tx: &mut E::Transaction,
        operation: Operation,
        summary: &mut CommitSummary,
    ) -> Result<(), PersistenceError> {
        let (kind, global_id) = (operation.kind(), operation.global_id());
        tracing::debug!(verb = operation.verb(), %kind, %global_id, "applying");

        let expected = operation.expected_version();
        if self.options.conflict_policy == ConflictPolicy::DetectConflicts
            && let Some(expected) = expected
        {
            let stored = tx.find(kind, Filter::ByGlobalId(global_id)).await?;
            let found = stored.first().map_or(0, |record| record.version);
            if found != expected {
                return Err(conflict(kind, global_id, expected, found));
            }
        }

        let outcome = match operation {
            Operation::Insert(record) => {
                tx.insert(record).await?;
                summary.inserted += 1;
                return Ok(());
            }
            Operation::Update { record, .. } => {
                let outcome = tx.update(record).await?;
                summary.updated += usize::from(outcome == Outcome::Applied);
                outcome
            }
            Operation::Delete { .. } => {
                let outcome = tx.delete(kind, global_id).await?;
                summary.deleted += usize::from(outcome == Outcome::Applied);
                outcome
            }
        };

        match (outcome, expected) {
            (Outcome::Applied, _) => Ok(()),
            // Planned against a stored revision that no longer exists.
            (Outcome::NotFound, Some(expected)) => Err(conflict(kind, global_id, expected, 0)),
            (Outcome::NotFound, None) => Err(not_found(kind, global_id)),
        }
    }
}

impl<E> Drop for UnitOfWork<E> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state.is_open() && !inner.log.is_empty() {
            tracing::debug!(
                dropped = inner.log.len(),
                "unit of work dropped without commit, discarding pending operations"
            );
        }
    }
}

fn conflict(kind: EntityKind, global_id: GlobalId, expected: i64, found: i64) -> PersistenceError {
    ConflictError {
        kind,
        global_id,
        expected,
        found,
    }
    .into()
}

fn not_found(kind: EntityKind, global_id: GlobalId) -> PersistenceError {
    NotFoundError {
        kind,
        key: LookupKey::GlobalId(global_id),
    }
    .into()
}
