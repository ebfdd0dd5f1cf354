//! Domain models for family trees.
//!
//! This module contains the core domain types: persons, the person graph of
//! one open tree, tree metadata, and configuration.

/// Person records and their identifiers.
pub mod person;
pub use person::{Gender, InvalidPersonId, Names, Person, PersonId, PersonUpdate, Relation};

/// The in-memory person graph.
pub mod graph;
pub use graph::{GraphError, LinkError, LinkOutcome, ParentRole, PersonGraph, Reconciliation};

/// Tree metadata held by the backend.
pub mod tree;
pub use tree::{TreeForm, TreeId, TreeRecord, TreeScope, merge_trees};

mod config;
pub use config::Config;
