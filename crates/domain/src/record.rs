//! Record: the type-erased, storage-facing form of one entity.

use serde::Serialize;

use crate::audit::Audit;
use crate::id::{EntityKind, GlobalId, RecordId};

/// Reference from a child record to the entity that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ParentRef {
    pub kind: EntityKind,
    pub global_id: GlobalId,
}

impl ParentRef {
    #[must_use]
    pub const fn new(kind: EntityKind, global_id: GlobalId) -> Self {
        Self { kind, global_id }
    }
}

/// One stored entity.
///
/// Identity, ownership, audit and `version` are columns owned by the store;
/// `fields` is the serialized entity payload without any of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub kind: EntityKind,
    pub id: RecordId,
    pub global_id: GlobalId,
    pub parent: Option<ParentRef>,
    pub audit: Audit,
    /// Store-maintained revision: 1 after insert, incremented on every update.
    pub version: i64,
    pub fields: serde_json::Value,
}

impl Record {
    /// A record that has never been persisted.
    #[must_use]
    pub fn new(kind: EntityKind, global_id: GlobalId, fields: serde_json::Value) -> Self {
        Self {
            kind,
            id: RecordId::UNASSIGNED,
            global_id,
            parent: None,
            audit: Audit::default(),
            version: 0,
            fields,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Reference usable as the `parent` of this record's children.
    #[must_use]
    pub fn as_parent(&self) -> ParentRef {
        ParentRef::new(self.kind, self.global_id)
    }

    /// Equality by value: identity, ownership and payload, ignoring audit
    /// stamps, the store-assigned id and the revision counter.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.global_id == other.global_id
            && self.parent == other.parent
            && self.fields == other.fields
    }
}
