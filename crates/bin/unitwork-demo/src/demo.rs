//! Scripted walkthrough of the merge scenario.
//!
//! 1. merge `ACME{X, Y}` into an empty store
//! 2. merge `ACME{X', Z}`: X updated, Y deleted, Z inserted
//! 3. delete the order with everything it owns

use std::sync::Arc;

use unitwork_app::ports::{ReadRepository, StorageEngine};
use unitwork_app::{
    Cancellation, CommitSummary, EngineReadRepository, UnitOfWork, UnitOfWorkOptions,
};
use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::{LookupKey, NotFoundError, PersistenceError};
use unitwork_domain::mapping::MappingRegistry;

use crate::model::{Order, OrderLine};

/// What each step of the walkthrough committed.
#[derive(Debug, Clone)]
pub struct Report {
    pub created: CommitSummary,
    pub reconciled: CommitSummary,
    pub removed: CommitSummary,
    /// Skus stored after the reconciling merge.
    pub skus: Vec<String>,
    /// Orders still readable once the delete committed.
    pub remaining: usize,
}

/// Drives one [`UnitOfWork`] per step against `engine`.
pub struct Walkthrough<E> {
    engine: E,
    registry: Arc<MappingRegistry>,
    options: UnitOfWorkOptions,
    committer: String,
}

impl<E: StorageEngine + Clone> Walkthrough<E> {
    #[must_use]
    pub fn new(engine: E, registry: Arc<MappingRegistry>, committer: impl Into<String>) -> Self {
        Self {
            engine,
            registry,
            options: UnitOfWorkOptions::default(),
            committer: committer.into(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: UnitOfWorkOptions) -> Self {
        self.options = options;
        self
    }

    fn unit_of_work(&self) -> UnitOfWork<E> {
        UnitOfWork::new(self.engine.clone(), Arc::clone(&self.registry)).with_options(self.options)
    }

    fn reader(&self) -> EngineReadRepository<E, Order> {
        EngineReadRepository::new(self.engine.clone(), Arc::clone(&self.registry))
    }

    async fn merge(
        &self,
        order: &mut Order,
        cancel: &Cancellation,
    ) -> Result<CommitSummary, PersistenceError> {
        let uow = self.unit_of_work();
        let queued = uow.repository::<Order>().await?.merge(order, cancel).await?;
        tracing::debug!(queued, global_id = %order.global_id, "merge planned");
        uow.commit(&self.committer, cancel).await
    }

    /// Run every step.
    ///
    /// # Errors
    ///
    /// Propagates the first failing repository or commit call.
    #[tracing::instrument(skip_all, fields(committer = %self.committer))]
    pub async fn run(&self, cancel: &Cancellation) -> Result<Report, PersistenceError> {
        let mut order = Order::new("ACME").with_line("X", 1).with_line("Y", 2);
        let created = self.merge(&mut order, cancel).await?;
        tracing::info!(global_id = %order.global_id, inserted = created.inserted, "order created");

        order.lines.retain(|line| line.sku == "X");
        if let Some(line) = order.lines.first_mut() {
            line.quantity = 5;
        }
        order.lines.push(OrderLine::new("Z", 3));
        let reconciled = self.merge(&mut order, cancel).await?;
        tracing::info!(
            inserted = reconciled.inserted,
            updated = reconciled.updated,
            deleted = reconciled.deleted,
            "order reconciled"
        );

        let stored = self
            .reader()
            .read_by_global_id(order.global_id, cancel)
            .await?
            .ok_or(NotFoundError {
                kind: Order::KIND,
                key: LookupKey::GlobalId(order.global_id),
            })?;
        let skus = stored.skus().into_iter().map(str::to_owned).collect();

        let uow = self.unit_of_work();
        uow.repository::<Order>().await?.delete(&stored, cancel).await?;
        let removed = uow.commit(&self.committer, cancel).await?;
        tracing::info!(deleted = removed.deleted, "order removed");

        let remaining = self.reader().read_all(cancel).await?.len();
        Ok(Report {
            created,
            reconciled,
            removed,
            skus,
            remaining,
        })
    }
}
