//! Family trees as GEDCOM
//!
//! A tree is a flat list of persons linked by father, mother and spouse ids.
//! It is stored by a backend as a GEDCOM file, edited in memory, and written
//! back with a debounced auto-save.

pub mod domain;
pub use domain::{
    Config, Gender, GraphError, LinkError, Names, ParentRole, Person, PersonGraph, PersonId,
    PersonUpdate, TreeForm, TreeId, TreeRecord, TreeScope,
};

/// Parsing and building GEDCOM text.
pub mod gedcom;
pub use gedcom::{FormatError, ParseWarning, Parsed};

/// The editing canvas, its auto-save scheduler and the async session.
pub mod builder;
pub use builder::{BuilderState, Notice, TreeBuilder, TreeSession};

/// Access to trees stored by the backend.
pub mod client;
pub use client::{AuthEvent, AuthListener, HttpTreeClient, TransportError, TreeClient};

mod error;
pub use error::{Error, PermissionError, ValidationError};
