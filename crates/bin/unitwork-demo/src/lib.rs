//! # unitwork-demo
//!
//! Composition root: loads configuration, installs logging, opens the
//! `SQLite` database and runs the merge walkthrough through a unit of work.
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no persistence logic belongs here.

pub mod config;
pub mod demo;
pub mod model;
