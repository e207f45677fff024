//! Change-set calculator: diffs a proposed entity graph against the
//! persisted graph and plans the inserts, updates and deletes that make the
//! store match it.
//!
//! ## Matching
//! A graph node matches a persisted node of the same scope iff both carry the
//! same non-empty [`GlobalId`]. Unmatched graph nodes are inserts, matched
//! ones are updates, unmatched persisted nodes are deletes.
//!
//! A graph node whose global id belongs to a persisted node of the same kind
//! under another owner is a move: it is updated with its new parent and the
//! persisted node is not deleted from its old scope.
//!
//! ## Recursion
//! Updates recurse into every declared child collection against the matched
//! persisted children; inserts recurse against nothing (every child is an
//! insert); deletes recurse with an empty graph (every descendant is deleted).
//!
//! ## Ordering
//! Inserts and updates are emitted parent-first. Deletes are emitted after
//! all of them, children before their owner, so a store enforcing
//! referential integrity never sees a dangling reference.

use std::collections::{HashMap, HashSet};
use std::slice;

use crate::audit::Audit;
use crate::error::{
    DuplicateIdentifierError, PersistenceError, StaleComparisonError, StaleReason,
};
use crate::graph::Node;
use crate::id::{EntityKind, GlobalId, RecordId};
use crate::mapping::MappingRegistry;
use crate::record::{ParentRef, Record};
use crate::time::Timestamp;

/// One planned storage operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Persist a new record. Audit fields are stamped at commit.
    Insert(Record),
    /// Overwrite a stored record matched by global id.
    Update {
        record: Record,
        /// Revision observed when the operation was planned; `None` when the
        /// target is only queued for insert in the same unit of work.
        expected_version: Option<i64>,
        /// `false` when the payload and ownership are unchanged.
        changed: bool,
    },
    /// Remove a stored record.
    Delete {
        kind: EntityKind,
        global_id: GlobalId,
        /// Revision observed when the operation was planned.
        expected_version: Option<i64>,
    },
}

impl Operation {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Insert(record) | Self::Update { record, .. } => record.kind,
            Self::Delete { kind, .. } => *kind,
        }
    }

    #[must_use]
    pub fn global_id(&self) -> GlobalId {
        match self {
            Self::Insert(record) | Self::Update { record, .. } => record.global_id,
            Self::Delete { global_id, .. } => *global_id,
        }
    }

    /// Revision the store must still hold for the operation to apply under
    /// conflict detection.
    #[must_use]
    pub fn expected_version(&self) -> Option<i64> {
        match self {
            Self::Insert(_) => None,
            Self::Update {
                expected_version, ..
            }
            | Self::Delete {
                expected_version, ..
            } => *expected_version,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// Apply the committer identity and commit timestamp.
    pub fn stamp(&mut self, by: &str, at: Timestamp) {
        match self {
            Self::Insert(record) => record.audit.stamp_created(by, at),
            Self::Update { record, .. } => record.audit.stamp_modified(by, at),
            Self::Delete { .. } => {}
        }
    }
}

/// The collection a diff runs over: a kind, owned by one parent (or a root).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub kind: EntityKind,
    pub parent: Option<ParentRef>,
}

impl Scope {
    #[must_use]
    pub fn root(kind: EntityKind) -> Self {
        Self { kind, parent: None }
    }

    #[must_use]
    pub fn child_of(kind: EntityKind, parent: ParentRef) -> Self {
        Self {
            kind,
            parent: Some(parent),
        }
    }
}

/// The insert/update/delete partition of one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeChanges {
    pub scope: Scope,
    pub inserts: Vec<GlobalId>,
    pub updates: Vec<GlobalId>,
    pub deletes: Vec<GlobalId>,
}

impl ScopeChanges {
    fn new(scope: Scope) -> Self {
        Self {
            scope,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

/// Result of a diff: per-scope partitions plus the ordered operation plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    scopes: Vec<ScopeChanges>,
    upserts: Vec<Operation>,
    deletes: Vec<Operation>,
}

impl ChangeSet {
    /// Diff one scope: `graph` against the `persisted` members of the same
    /// parent.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::DuplicateIdentifier`] if the graph holds two
    ///   entities with the same global id.
    /// - [`PersistenceError::StaleComparison`] if either side carries a
    ///   collection the other could not have been compared with.
    /// - [`PersistenceError::Mapping`] if a kind is not registered.
    pub fn compute(
        registry: &MappingRegistry,
        graph: &[Node],
        persisted: &[Node],
        scope: Scope,
    ) -> Result<Self, PersistenceError> {
        ensure_unique(graph)?;
        let mut calculator = Calculator {
            registry,
            graph_ids: HashSet::new(),
            stored_index: HashMap::new(),
            out: Self::default(),
        };
        for root in graph {
            root.walk(&mut |node| {
                calculator.graph_ids.insert((node.kind(), node.global_id()));
            });
        }
        for root in persisted {
            root.walk(&mut |node| {
                calculator
                    .stored_index
                    .insert((node.kind(), node.global_id()), node);
            });
        }
        calculator.diff(scope, graph, persisted)?;
        Ok(calculator.out)
    }

    /// Diff a root and its whole graph against the persisted root, if any.
    ///
    /// A persisted node with another global id is ignored: a root merge never
    /// deletes a different root. A matched node keeps its stored owner, so a
    /// child merged on its own stays in its collection.
    ///
    /// # Errors
    ///
    /// See [`compute`](Self::compute).
    pub fn for_root(
        registry: &MappingRegistry,
        graph: &Node,
        persisted: Option<&Node>,
    ) -> Result<Self, PersistenceError> {
        let persisted = persisted.filter(|stored| stored.global_id() == graph.global_id());
        let scope = Scope {
            kind: graph.kind(),
            parent: persisted.map_or(graph.record.parent, |stored| stored.record.parent),
        };
        let persisted = persisted.map_or(&[][..], slice::from_ref);
        Self::compute(registry, slice::from_ref(graph), persisted, scope)
    }

    /// Plan the removal of a persisted root and every descendant.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::StaleComparison`] if the subtree was not fully
    /// loaded, or [`PersistenceError::Mapping`] for unregistered kinds.
    pub fn for_delete(
        registry: &MappingRegistry,
        persisted: &Node,
    ) -> Result<Self, PersistenceError> {
        let scope = Scope {
            kind: persisted.kind(),
            parent: persisted.record.parent,
        };
        Self::compute(registry, &[], slice::from_ref(persisted), scope)
    }

    /// Per-scope partitions, in the order the scopes were visited.
    #[must_use]
    pub fn scopes(&self) -> &[ScopeChanges] {
        &self.scopes
    }

    /// The ordered plan: inserts and updates parent-first, then deletes
    /// children-first.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.upserts.iter().chain(self.deletes.iter())
    }

    #[must_use]
    pub fn into_operations(self) -> Vec<Operation> {
        let mut operations = self.upserts;
        operations.extend(self.deletes);
        operations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn inserts(&self) -> usize {
        self.count(|op| matches!(op, Operation::Insert(_)))
    }

    #[must_use]
    pub fn updates(&self) -> usize {
        self.count(|op| matches!(op, Operation::Update { .. }))
    }

    #[must_use]
    pub fn deletes(&self) -> usize {
        self.deletes.len()
    }

    /// Operations that alter stored values: every insert and delete, and the
    /// updates whose payload or ownership differ from the store.
    #[must_use]
    pub fn value_changes(&self) -> usize {
        self.count(|op| !matches!(op, Operation::Update { changed: false, .. }))
    }

    fn count(&self, predicate: impl Fn(&Operation) -> bool) -> usize {
        self.operations().filter(|op| predicate(op)).count()
    }
}

struct Calculator<'r, 'n> {
    registry: &'r MappingRegistry,
    /// Every (kind, global id) present anywhere in the proposed graph.
    graph_ids: HashSet<(EntityKind, GlobalId)>,
    /// Every persisted node, whatever its owner.
    stored_index: HashMap<(EntityKind, GlobalId), &'n Node>,
    out: ChangeSet,
}

impl<'n> Calculator<'_, 'n> {
    fn diff(
        &mut self,
        scope: Scope,
        graph: &'n [Node],
        persisted: &'n [Node],
    ) -> Result<(), PersistenceError> {
        let slot = self.out.scopes.len();
        self.out.scopes.push(ScopeChanges::new(scope));

        let stored_by_id: HashMap<GlobalId, &Node> = persisted
            .iter()
            .filter(|node| !node.global_id().is_empty())
            .map(|node| (node.global_id(), node))
            .collect();
        let mut matched = HashSet::new();

        for node in graph {
            self.ensure_collections_loadable(node)?;
            let global_id = node.global_id();
            let stored = (!global_id.is_empty())
                .then(|| {
                    stored_by_id
                        .get(&global_id)
                        .or_else(|| self.stored_index.get(&(node.kind(), global_id)))
                        .copied()
                })
                .flatten();

            match stored {
                Some(stored) => {
                    self.ensure_fully_loaded(stored)?;
                    matched.insert(global_id);
                    self.out.scopes[slot].updates.push(global_id);
                    self.out.upserts.push(update(node, stored, scope.parent));
                    self.descend(node, Some(node), Some(stored))?;
                }
                None => {
                    self.out.scopes[slot].inserts.push(global_id);
                    self.out.upserts.push(insert(node, scope.parent));
                    self.descend(node, Some(node), None)?;
                }
            }
        }

        for stored in persisted {
            if matched.contains(&stored.global_id())
                || self.graph_ids.contains(&(stored.kind(), stored.global_id()))
            {
                continue;
            }
            self.ensure_fully_loaded(stored)?;
            self.descend(stored, None, Some(stored))?;
            self.out.scopes[slot].deletes.push(stored.global_id());
            self.out.deletes.push(Operation::Delete {
                kind: stored.kind(),
                global_id: stored.global_id(),
                expected_version: Some(stored.record.version),
            });
        }
        Ok(())
    }

    fn descend(
        &mut self,
        owner: &Node,
        graph: Option<&'n Node>,
        stored: Option<&'n Node>,
    ) -> Result<(), PersistenceError> {
        let parent = owner.record.as_parent();
        for &child in self.registry.child_kinds(owner.kind())? {
            self.diff(
                Scope::child_of(child, parent),
                members(graph, child),
                members(stored, child),
            )?;
        }
        Ok(())
    }

    fn ensure_collections_loadable(&self, node: &Node) -> Result<(), PersistenceError> {
        match node
            .collections
            .iter()
            .find(|c| !self.registry.owns(node.kind(), c.kind))
        {
            Some(collection) => Err(stale(node.kind(), StaleReason::UnloadedCollection {
                child: collection.kind,
            })),
            None => Ok(()),
        }
    }

    fn ensure_fully_loaded(&self, stored: &Node) -> Result<(), PersistenceError> {
        match self
            .registry
            .child_kinds(stored.kind())?
            .iter()
            .find(|kind| stored.collection(**kind).is_none())
        {
            Some(child) => Err(stale(stored.kind(), StaleReason::MissingCollection {
                child: *child,
            })),
            None => Ok(()),
        }
    }
}

fn insert(node: &Node, parent: Option<ParentRef>) -> Operation {
    let mut record = node.record.clone();
    record.id = RecordId::UNASSIGNED;
    record.parent = parent;
    record.audit = Audit::default();
    record.version = 0;
    Operation::Insert(record)
}

fn update(node: &Node, stored: &Node, parent: Option<ParentRef>) -> Operation {
    let mut record = node.record.clone();
    record.id = stored.record.id;
    record.parent = parent;
    record.audit = stored.record.audit.clone();
    record.version = stored.record.version;
    Operation::Update {
        changed: !record.same_value(&stored.record),
        expected_version: Some(stored.record.version),
        record,
    }
}

fn members(node: Option<&Node>, kind: EntityKind) -> &[Node] {
    node.and_then(|n| n.collection(kind))
        .map_or(&[][..], |c| c.nodes.as_slice())
}

fn stale(kind: EntityKind, reason: StaleReason) -> PersistenceError {
    StaleComparisonError { kind, reason }.into()
}

fn ensure_unique(graph: &[Node]) -> Result<(), PersistenceError> {
    let mut seen = HashSet::new();
    let mut duplicate = None;
    for root in graph {
        root.walk(&mut |node| {
            let global_id = node.global_id();
            if duplicate.is_none() && !global_id.is_empty() && !seen.insert(global_id) {
                duplicate = Some((node.kind(), global_id));
            }
        });
    }
    match duplicate {
        Some((kind, global_id)) => Err(DuplicateIdentifierError { kind, global_id }.into()),
        None => Ok(()),
    }
}
