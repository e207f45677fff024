//! # unitwork-domain
//!
//! Pure domain model for the unitwork persistence layer.
//!
//! ## Responsibilities
//! - Foundational types: dual identifiers, error conventions, timestamps
//! - Define the **entity contract** (`DomainEntity`) and **audit** metadata
//! - Define **records** and **graphs**, the type-erased form entities take
//!   on their way to and from storage
//! - Define the **mapping registry** describing which kinds own which
//! - Compute **change sets**: the inserts, updates and deletes that reconcile
//!   a proposed entity graph with the persisted one
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod audit;
pub mod change_set;
pub mod entity;
pub mod graph;
pub mod mapping;
pub mod record;
