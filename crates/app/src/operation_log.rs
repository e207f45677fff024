//! The queue of planned operations shared by every repository of a unit of
//! work.

use std::collections::HashMap;

use unitwork_domain::change_set::Operation;
use unitwork_domain::id::{EntityKind, GlobalId};

/// Pending operations in queue order, indexed by target.
#[derive(Debug, Default)]
pub struct OperationLog {
    operations: Vec<Operation>,
    latest: HashMap<(EntityKind, GlobalId), usize>,
}

impl OperationLog {
    pub fn push(&mut self, operation: Operation) {
        self.latest.insert(
            (operation.kind(), operation.global_id()),
            self.operations.len(),
        );
        self.operations.push(operation);
    }

    pub fn extend(&mut self, operations: impl IntoIterator<Item = Operation>) {
        for operation in operations {
            self.push(operation);
        }
    }

    /// The most recent operation queued for an entity.
    #[must_use]
    pub fn latest(&self, kind: EntityKind, global_id: GlobalId) -> Option<&Operation> {
        self.latest
            .get(&(kind, global_id))
            .map(|index| &self.operations[*index])
    }

    #[must_use]
    pub fn is_pending(&self, kind: EntityKind, global_id: GlobalId) -> bool {
        self.latest.contains_key(&(kind, global_id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Drain the queue, leaving the log empty.
    pub fn take(&mut self) -> Vec<Operation> {
        self.latest.clear();
        std::mem::take(&mut self.operations)
    }
}
