//! Entity graphs in type-erased form.
//!
//! A [`Node`] is one entity's [`Record`] plus its owned child
//! [`Collection`]s. Both the graph supplied by a caller and the subtree
//! loaded from the store are expressed as nodes, which is what the
//! change-set calculator diffs.

use crate::entity::DomainEntity;
use crate::error::MappingError;
use crate::id::{EntityKind, GlobalId};
use crate::record::Record;

/// One entity and the collections it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub record: Record,
    pub collections: Vec<Collection>,
}

/// All children of one kind owned by a single parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub kind: EntityKind,
    pub nodes: Vec<Node>,
}

impl Collection {
    #[must_use]
    pub fn empty(kind: EntityKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
        }
    }

    /// Convert owned children into a collection of nodes.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Fields`] if a child cannot be serialized.
    pub fn of<C: DomainEntity>(items: &[C]) -> Result<Self, MappingError> {
        let nodes = items
            .iter()
            .map(Node::build)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind: C::KIND,
            nodes,
        })
    }

    /// Rebuild the typed children held by this collection.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::KindMismatch`] when `C` is not the kind of this
    /// collection, or a deserialization error for one of its members.
    pub fn into_entities<C: DomainEntity>(self) -> Result<Vec<C>, MappingError> {
        if self.kind != C::KIND {
            return Err(MappingError::KindMismatch {
                expected: C::KIND,
                found: self.kind,
            });
        }
        self.nodes.into_iter().map(Node::into_entity::<C>).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl Node {
    /// A node with no collections.
    #[must_use]
    pub fn leaf(record: Record) -> Self {
        Self {
            record,
            collections: Vec::new(),
        }
    }

    /// Convert an entity and all its descendants into a linked graph.
    ///
    /// Entities without a global id get a fresh one, and every child record
    /// points at its owner through [`Record::parent`].
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Fields`] if any entity cannot be serialized.
    pub fn from_entity<T: DomainEntity>(entity: &T) -> Result<Self, MappingError> {
        let mut node = Self::build(entity)?;
        node.link();
        Ok(node)
    }

    /// Convert only the entity itself, ignoring its children.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Fields`] if the entity cannot be serialized.
    pub fn root_only<T: DomainEntity>(entity: &T) -> Result<Self, MappingError> {
        let mut node = Self::leaf(Self::record_of(entity)?);
        node.link();
        Ok(node)
    }

    /// Rebuild a typed entity, reattaching every collection.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError`] if the record is of another kind, its fields
    /// do not deserialize, or the entity rejects one of the collections.
    pub fn into_entity<T: DomainEntity>(self) -> Result<T, MappingError> {
        let Self {
            record,
            collections,
        } = self;
        if record.kind != T::KIND {
            return Err(MappingError::KindMismatch {
                expected: T::KIND,
                found: record.kind,
            });
        }

        let mut entity: T =
            serde_json::from_value(record.fields).map_err(|source| MappingError::Fields {
                kind: T::KIND,
                source,
            })?;
        entity.set_id(record.id);
        entity.set_global_id(record.global_id);
        *entity.audit_mut() = record.audit;

        for collection in collections {
            entity.adopt(collection)?;
        }
        Ok(entity)
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.record.kind
    }

    #[must_use]
    pub fn global_id(&self) -> GlobalId {
        self.record.global_id
    }

    #[must_use]
    pub fn collection(&self, kind: EntityKind) -> Option<&Collection> {
        self.collections.iter().find(|c| c.kind == kind)
    }

    /// Number of entities in this subtree, the node itself included.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self
            .collections
            .iter()
            .flat_map(|c| c.nodes.iter())
            .map(Node::len)
            .sum::<usize>()
    }

    /// Visit every node of the subtree, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for node in self.collections.iter().flat_map(|c| c.nodes.iter()) {
            node.walk(visit);
        }
    }

    /// Equality by value over the whole subtree, ignoring audit stamps, ids
    /// and revisions. Collections are compared per kind, members in order.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        if !self.record.same_value(&other.record) {
            return false;
        }
        let non_empty = |node: &Self| node.collections.iter().filter(|c| !c.is_empty()).count();
        if non_empty(self) != non_empty(other) {
            return false;
        }
        self.collections
            .iter()
            .filter(|c| !c.is_empty())
            .all(|mine| match other.collection(mine.kind) {
                Some(theirs) => {
                    mine.len() == theirs.len()
                        && mine
                            .nodes
                            .iter()
                            .zip(&theirs.nodes)
                            .all(|(a, b)| a.same_value(b))
                }
                None => false,
            })
    }

    pub(crate) fn build<T: DomainEntity>(entity: &T) -> Result<Self, MappingError> {
        Ok(Self {
            record: Self::record_of(entity)?,
            collections: entity.collections()?,
        })
    }

    fn record_of<T: DomainEntity>(entity: &T) -> Result<Record, MappingError> {
        let fields = serde_json::to_value(entity).map_err(|source| MappingError::Fields {
            kind: T::KIND,
            source,
        })?;
        let mut record = Record::new(T::KIND, entity.global_id(), fields);
        record.id = entity.id();
        record.audit = entity.audit().clone();
        Ok(record)
    }

    fn link(&mut self) {
        self.record.global_id = self.record.global_id.or_generate();
        let parent = self.record.as_parent();
        for node in self.collections.iter_mut().flat_map(|c| c.nodes.iter_mut()) {
            node.record.parent = Some(parent);
            node.link();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::audit::{Audit, Auditable};
    use crate::id::RecordId;
    use crate::time;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Order {
        #[serde(skip)]
        id: RecordId,
        #[serde(skip)]
        global_id: GlobalId,
        #[serde(skip)]
        audit: Audit,
        customer: String,
        #[serde(skip)]
        lines: Vec<OrderLine>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct OrderLine {
        #[serde(skip)]
        id: RecordId,
        #[serde(skip)]
        global_id: GlobalId,
        #[serde(skip)]
        audit: Audit,
        sku: String,
        quantity: u32,
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
            match collection.kind {
                kind if kind == OrderLine::KIND => self.lines = collection.into_entities()?,
                child => {
                    return Err(MappingError::UnexpectedCollection {
                        parent: Self::KIND,
                        child,
                    });
                }
            }
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

    fn line(sku: &str) -> OrderLine {
        OrderLine {
            sku: sku.to_string(),
            quantity: 1,
            ..OrderLine::default()
        }
    }

    fn order() -> Order {
        Order {
            global_id: GlobalId::new(),
            customer: "ACME".to_string(),
            lines: vec![line("A-1"), line("B-2")],
            ..Order::default()
        }
    }

    #[test]
    fn should_link_children_to_parent_when_building_graph() {
        let order = order();
        let node = Node::from_entity(&order).unwrap();

        assert_eq!(node.global_id(), order.global_id);
        let lines = node.collection(OrderLine::KIND).unwrap();
        assert_eq!(lines.len(), 2);
        for child in &lines.nodes {
            assert_eq!(child.record.parent, Some(node.record.as_parent()));
            assert!(!child.global_id().is_empty());
        }
    }

    #[test]
    fn should_assign_global_ids_when_missing() {
        let mut order = order();
        order.global_id = GlobalId::EMPTY;
        let node = Node::from_entity(&order).unwrap();
        assert!(!node.global_id().is_empty());
    }

    #[test]
    fn should_skip_children_when_root_only() {
        let node = Node::root_only(&order()).unwrap();
        assert!(node.collections.is_empty());
        assert_eq!(node.len(), 1);
    }

    #[test]
    fn should_count_every_descendant() {
        let node = Node::from_entity(&order()).unwrap();
        assert_eq!(node.len(), 3);

        let mut kinds = Vec::new();
        node.walk(&mut |n| kinds.push(n.kind()));
        assert_eq!(kinds, vec![Order::KIND, OrderLine::KIND, OrderLine::KIND]);
    }

    #[test]
    fn should_rebuild_entity_with_store_identity_and_children() {
        let mut node = Node::from_entity(&order()).unwrap();
        node.record.id = RecordId::new(12);
        node.record.audit.stamp_created("alice", time::now());

        let rebuilt: Order = node.clone().into_entity().unwrap();
        assert_eq!(rebuilt.id, RecordId::new(12));
        assert_eq!(rebuilt.global_id, node.global_id());
        assert_eq!(rebuilt.audit.created_by, "alice");
        assert_eq!(rebuilt.customer, "ACME");
        assert_eq!(rebuilt.lines.len(), 2);
        assert_eq!(rebuilt.lines[1].sku, "B-2");
    }

    #[test]
    fn should_reject_conversion_into_other_kind() {
        let node = Node::root_only(&order()).unwrap();
        let result = node.into_entity::<OrderLine>();
        assert!(matches!(result, Err(MappingError::KindMismatch { .. })));
    }

    #[test]
    fn should_reject_unowned_collection() {
        let mut line = line("A-1");
        let result = line.adopt(Collection::empty(Order::KIND));
        assert!(matches!(
            result,
            Err(MappingError::UnexpectedCollection { .. })
        ));
    }

    #[test]
    fn should_keep_identity_out_of_payload() {
        let node = Node::root_only(&order()).unwrap();
        assert_eq!(node.record.fields, serde_json::json!({"customer": "ACME"}));
    }

    #[test]
    fn should_compare_graphs_by_value() {
        let node = Node::from_entity(&order()).unwrap();
        let mut stamped = node.clone();
        stamped.record.audit.stamp_created("bob", time::now());
        stamped.record.id = RecordId::new(1);
        assert!(node.same_value(&stamped));

        let mut fewer = node.clone();
        fewer.collections[0].nodes.pop();
        assert!(!node.same_value(&fewer));
    }

    #[test]
    fn should_treat_missing_and_empty_collections_alike() {
        let mut order = order();
        order.lines.clear();
        let node = Node::from_entity(&order).unwrap();
        let mut bare = node.clone();
        bare.collections.clear();
        assert!(node.same_value(&bare));
    }
}
