//! In-memory fakes shared by the unit tests of this crate.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use unitwork_domain::audit::{Audit, Auditable};
use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::{DuplicateIdentifierError, MappingError, PersistenceError};
use unitwork_domain::graph::Collection;
use unitwork_domain::id::{EntityKind, GlobalId, RecordId};
use unitwork_domain::mapping::MappingRegistry;
use unitwork_domain::record::Record;

use crate::ports::{Filter, Outcome, StorageEngine, StorageTransaction};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub global_id: GlobalId,
    #[serde(skip)]
    pub audit: Audit,
    pub customer: String,
    #[serde(skip)]
    pub lines: Vec<Line>,
}

impl Order {
    pub fn new(customer: &str) -> Self {
        Self {
            customer: customer.to_string(),
            ..Self::default()
        }
    }

    pub fn with_lines(mut self, skus: &[&str]) -> Self {
        self.lines = skus.iter().map(|sku| Line::new(sku)).collect();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Line {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub global_id: GlobalId,
    #[serde(skip)]
    pub audit: Audit,
    pub sku: String,
}

impl Line {
    pub fn new(sku: &str) -> Self {
        Self {
            sku: sku.to_string(),
            ..Self::default()
        }
    }
}

impl Auditable for Order {
    fn audit(&self) -> &Audit {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }
}

impl Auditable for Line {
    fn audit(&self) -> &Audit {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }
}

impl DomainEntity for Order {
    const KIND: EntityKind = EntityKind::new("order");
    const CHILD_KINDS: &'static [EntityKind] = &[Line::KIND];

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn global_id(&self) -> GlobalId {
        self.global_id
    }

    fn set_global_id(&mut self, global_id: GlobalId) {
        self.global_id = global_id;
    }

    fn collections(&self) -> Result<Vec<Collection>, MappingError> {
        Ok(vec![Collection::of(&self.lines)?])
    }

    fn adopt(&mut self, collection: Collection) -> Result<(), MappingError> {
        self.lines = collection.into_entities()?;
        Ok(())
    }
}

impl DomainEntity for Line {
    const KIND: EntityKind = EntityKind::new("order_line");

    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn global_id(&self) -> GlobalId {
        self.global_id
    }

    fn set_global_id(&mut self, global_id: GlobalId) {
        self.global_id = global_id;
    }
}

pub fn registry() -> Arc<MappingRegistry> {
    Arc::new(MappingRegistry::new().with::<Order>().with::<Line>())
}

#[derive(Debug, Default, Clone)]
struct State {
    records: Vec<Record>,
    next_id: i64,
    fail_on_write: Option<usize>,
}

/// Copy-on-begin store: a transaction works on a snapshot that replaces the
/// shared state on commit.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    state: Arc<Mutex<State>>,
}

impl Engine {
    pub fn records(&self) -> Vec<Record> {
        self.state.lock().unwrap().records.clone()
    }

    /// Make the `n`th write of the next transactions fail.
    pub fn fail_on_write(&self, n: usize) {
        self.state.lock().unwrap().fail_on_write = Some(n);
    }
}

pub struct Transaction {
    shared: Arc<Mutex<State>>,
    working: State,
    writes: usize,
}

impl Transaction {
    fn count_write(&mut self) -> Result<(), PersistenceError> {
        self.writes += 1;
        if self.working.fail_on_write == Some(self.writes) {
            return Err(PersistenceError::Storage("injected failure".into()));
        }
        Ok(())
    }

    fn position(&self, kind: EntityKind, global_id: GlobalId) -> Option<usize> {
        self.working
            .records
            .iter()
            .position(|r| r.kind == kind && r.global_id == global_id)
    }
}

fn select(records: &[Record], kind: EntityKind, filter: Filter) -> Vec<Record> {
    records
        .iter()
        .filter(|r| r.kind == kind && filter.matches(r))
        .cloned()
        .collect()
}

impl StorageEngine for Engine {
    type Transaction = Transaction;

    async fn find(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> Result<Vec<Record>, PersistenceError> {
        Ok(select(&self.state.lock().unwrap().records, kind, filter))
    }

    async fn begin(&self) -> Result<Transaction, PersistenceError> {
        Ok(Transaction {
            shared: self.state.clone(),
            working: self.state.lock().unwrap().clone(),
            writes: 0,
        })
    }
}

impl StorageTransaction for Transaction {
    async fn find(
        &mut self,
        kind: EntityKind,
        filter: Filter,
    ) -> Result<Vec<Record>, PersistenceError> {
        Ok(select(&self.working.records, kind, filter))
    }

    async fn insert(&mut self, mut record: Record) -> Result<RecordId, PersistenceError> {
        self.count_write()?;
        if self.position(record.kind, record.global_id).is_some() {
            return Err(DuplicateIdentifierError {
                kind: record.kind,
                global_id: record.global_id,
            }
            .into());
        }
        self.working.next_id += 1;
        record.id = RecordId::new(self.working.next_id);
        record.version = 1;
        self.working.records.push(record);
        Ok(RecordId::new(self.working.next_id))
    }

    async fn update(&mut self, record: Record) -> Result<Outcome, PersistenceError> {
        self.count_write()?;
        let Some(index) = self.position(record.kind, record.global_id) else {
            return Ok(Outcome::NotFound);
        };
        let stored = &mut self.working.records[index];
        stored.parent = record.parent;
        stored.fields = record.fields;
        stored.audit.modified_by = record.audit.modified_by;
        stored.audit.modified_at = record.audit.modified_at;
        stored.version += 1;
        Ok(Outcome::Applied)
    }

    async fn delete(
        &mut self,
        kind: EntityKind,
        global_id: GlobalId,
    ) -> Result<Outcome, PersistenceError> {
        self.count_write()?;
        match self.position(kind, global_id) {
            Some(index) => {
                self.working.records.remove(index);
                Ok(Outcome::Applied)
            }
            None => Ok(Outcome::NotFound),
        }
    }

    async fn commit(self) -> Result<(), PersistenceError> {
        *self.shared.lock().unwrap() = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), PersistenceError> {
        Ok(())
    }
}
