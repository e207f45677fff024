//! Mapping registry: which entity kinds own which child kinds.
//!
//! The registry is how generic code learns the shape of a graph it has never
//! seen: it drives loading of persisted subtrees, the completeness checks of
//! the change-set calculator, and cascading deletes.

use std::collections::BTreeMap;

use crate::entity::DomainEntity;
use crate::error::MappingError;
use crate::id::EntityKind;

/// Table of entity kinds to the child kinds they own.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    children: BTreeMap<EntityKind, &'static [EntityKind]>,
}

impl MappingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` and the child kinds it declares.
    pub fn register<T: DomainEntity>(&mut self) -> &mut Self {
        self.declare(T::KIND, T::CHILD_KINDS)
    }

    /// Register a kind by hand, without a typed entity.
    pub fn declare(&mut self, kind: EntityKind, children: &'static [EntityKind]) -> &mut Self {
        self.children.insert(kind, children);
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<T: DomainEntity>(mut self) -> Self {
        self.register::<T>();
        self
    }

    #[must_use]
    pub fn is_registered(&self, kind: EntityKind) -> bool {
        self.children.contains_key(&kind)
    }

    /// Child kinds owned by `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnknownKind`] when `kind` was never registered.
    pub fn child_kinds(&self, kind: EntityKind) -> Result<&'static [EntityKind], MappingError> {
        self.children
            .get(&kind)
            .copied()
            .ok_or(MappingError::UnknownKind(kind))
    }

    /// `true` when `parent` declares a collection of `child`.
    #[must_use]
    pub fn owns(&self, parent: EntityKind, child: EntityKind) -> bool {
        self.children
            .get(&parent)
            .is_some_and(|kinds| kinds.contains(&child))
    }

    /// Check that every declared child kind is itself registered.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::UnknownKind`] for the first child kind that has
    /// no mapping.
    pub fn validate(&self) -> Result<(), MappingError> {
        self.children
            .values()
            .flat_map(|kinds| kinds.iter())
            .find(|kind| !self.is_registered(**kind))
            .map_or(Ok(()), |kind| Err(MappingError::UnknownKind(*kind)))
    }

    /// Registered kinds, in a stable order.
    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.children.keys().copied()
    }
}
