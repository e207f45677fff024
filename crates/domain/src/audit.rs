//! Audit metadata: who created/modified an entity, and when.

use serde::{Deserialize, Serialize};

use crate::time::{self, Timestamp};

/// Creation and last-modification stamps carried by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub created_by: String,
    pub created_at: Timestamp,
    pub modified_by: String,
    pub modified_at: Timestamp,
}

impl Default for Audit {
    fn default() -> Self {
        Self {
            created_by: String::new(),
            created_at: time::epoch(),
            modified_by: String::new(),
            modified_at: time::epoch(),
        }
    }
}

impl Audit {
    /// Stamp a brand new entity: both creation and modification.
    pub fn stamp_created(&mut self, by: &str, at: Timestamp) {
        by.clone_into(&mut self.created_by);
        self.created_at = at;
        self.stamp_modified(by, at);
    }

    /// Stamp a modification, leaving creation fields untouched.
    pub fn stamp_modified(&mut self, by: &str, at: Timestamp) {
        by.clone_into(&mut self.modified_by);
        self.modified_at = at;
    }
}

/// Marks a type as carrying [`Audit`] metadata.
pub trait Auditable {
    fn audit(&self) -> &Audit;

    fn audit_mut(&mut self) -> &mut Audit;

    fn created_by(&self) -> &str {
        &self.audit().created_by
    }

    fn created_at(&self) -> Timestamp {
        self.audit().created_at
    }

    fn modified_by(&self) -> &str {
        &self.audit().modified_by
    }

    fn modified_at(&self) -> Timestamp {
        self.audit().modified_at
    }
}

impl Auditable for Audit {
    fn audit(&self) -> &Audit {
        self
    }

    fn audit_mut(&mut self) -> &mut Audit {
        self
    }
}
