//! Sample aggregate used by the walkthrough: an order owning its lines.

use serde::{Deserialize, Serialize};
use unitwork_domain::audit::{Audit, Auditable};
use unitwork_domain::entity::DomainEntity;
use unitwork_domain::error::MappingError;
use unitwork_domain::graph::Collection;
use unitwork_domain::id::{EntityKind, GlobalId, RecordId};
use unitwork_domain::mapping::MappingRegistry;

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
    pub lines: Vec<OrderLine>,
}

impl Order {
    #[must_use]
    pub fn new(customer: impl Into<String>) -> Self {
        Self {
            customer: customer.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_line(mut self, sku: &str, quantity: u32) -> Self {
        self.lines.push(OrderLine::new(sku, quantity));
        self
    }

    /// Line skus in collection order.
    #[must_use]
    pub fn skus(&self) -> Vec<&str> {
        self.lines.iter().map(|line| line.sku.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub global_id: GlobalId,
    #[serde(skip)]
    pub audit: Audit,
    pub sku: String,
    pub quantity: u32,
}

impl OrderLine {
    #[must_use]
    pub fn new(sku: &str, quantity: u32) -> Self {
        Self {
            sku: sku.to_string(),
            quantity,
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

impl Auditable for OrderLine {
    fn audit(&self) -> &Audit {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }
}

impl DomainEntity for Order {
    const KIND: EntityKind = EntityKind::new("order");
    const CHILD_KINDS: &'static [EntityKind] = &[OrderLine::KIND];

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

impl DomainEntity for OrderLine {
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

/// Registry covering [`Order`] and [`OrderLine`].
#[must_use]
pub fn registry() -> MappingRegistry {
    MappingRegistry::new().with::<Order>().with::<OrderLine>()
}
