//! The `DomainEntity` contract every persisted type implements.
//!
//! An entity has an internal [`RecordId`], a [`GlobalId`] and [`Audit`]
//! metadata. Owned children are exposed as type-erased [`Collection`]s so the
//! change-set calculator and the repositories can walk arbitrarily nested
//! graphs without knowing the concrete child types.
//!
//! ```ignore
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Order {
//!     #[serde(skip)]
//!     id: RecordId,
//!     #[serde(skip)]
//!     global_id: GlobalId,
//!     #[serde(skip)]
//!     audit: Audit,
//!     customer: String,
//!     #[serde(skip)]
//!     lines: Vec<OrderLine>,
//! }
//!
//! impl DomainEntity for Order {
//!     const KIND: EntityKind = EntityKind::new("order");
//!     const CHILD_KINDS: &'static [EntityKind] = &[OrderLine::KIND];
//!     // id/global_id accessors …
//!     fn collections(&self) -> Result<Vec<Collection>, MappingError> {
//!         Ok(vec![Collection::of(&self.lines)?])
//!     }
//!     fn adopt(&mut self, collection: Collection) -> Result<(), MappingError> {
//!         match collection.kind {
//!             kind if kind == OrderLine::KIND => self.lines = collection.into_entities()?,
//!             child => return Err(MappingError::UnexpectedCollection { parent: Self::KIND, child }),
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! [`Audit`]: crate::audit::Audit
//! [`Collection`]: crate::graph::Collection

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::audit::Auditable;
use crate::error::MappingError;
use crate::graph::Collection;
use crate::id::{EntityKind, GlobalId, RecordId};

/// A persisted domain object with dual identity and audit metadata.
///
/// The serialized form is the entity's payload only. Identity, audit and
/// child collection fields must be `#[serde(skip)]`: identity and audit are
/// store columns restored through the setters, children travel through
/// [`collections`](Self::collections) and [`adopt`](Self::adopt).
pub trait DomainEntity:
    Auditable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Storage discriminator of this entity type.
    const KIND: EntityKind;

    /// Kinds of the child collections this type owns.
    const CHILD_KINDS: &'static [EntityKind] = &[];

    fn id(&self) -> RecordId;

    fn set_id(&mut self, id: RecordId);

    fn global_id(&self) -> GlobalId;

    fn set_global_id(&mut self, global_id: GlobalId);

    /// Owned child collections, one per entry of [`CHILD_KINDS`](Self::CHILD_KINDS).
    ///
    /// # Errors
    ///
    /// Returns [`MappingError`] if a child cannot be serialized.
    fn collections(&self) -> Result<Vec<Collection>, MappingError> {
        Ok(Vec::new())
    }

    /// Reattach a child collection loaded from the store.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnexpectedCollection`] when this type does not
    /// own `collection.kind`, or a deserialization error for its members.
    fn adopt(&mut self, collection: Collection) -> Result<(), MappingError> {
        Err(MappingError::UnexpectedCollection {
            parent: Self::KIND,
            child: collection.kind,
        })
    }
}
