//! Error taxonomy shared by the codec, the builder and the session.

use thiserror::Error;

use crate::{
    client::TransportError,
    domain::{GraphError, LinkError, PersonId, Relation},
    gedcom::FormatError,
};

/// A graph or tree cannot be persisted as it stands.
///
/// Fatal to the operation that raised it and never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A person references an id that is not part of the tree.
    #[error("{person} has {relation} {target}, which is not in the tree")]
    DanglingReference {
        /// The person holding the reference.
        person: PersonId,
        /// Which field holds it.
        relation: Relation,
        /// The missing id.
        target: PersonId,
    },
    /// A person has no name in any locale.
    #[error("{0} has no name")]
    MissingName(PersonId),
    /// Two persons share an id.
    #[error("person id {0} is used more than once")]
    DuplicateId(PersonId),
    /// A tree cannot be saved without a title.
    #[error("a tree title is required")]
    MissingTitle,
    /// The serialized tree exceeds the submission limit.
    #[error("GEDCOM payload is {size} bytes, above the {limit} byte limit")]
    TooLarge {
        /// Serialized size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// A mutation or save was attempted on a tree opened read-only, or with no
/// tree open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    /// The open tree is view-only.
    #[error("the tree is open read-only")]
    ReadOnly,
    /// There is nothing open to edit.
    #[error("no tree is open")]
    NoTree,
}

/// Any failure surfaced by the builder or session.
#[derive(Debug, Error)]
pub enum Error {
    /// Tree text could not be tokenized.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The graph or tree cannot be persisted as it stands.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The persistence client failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The tree is not editable.
    #[error(transparent)]
    Permission(#[from] PermissionError),
    /// A relationship edit was refused.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// A structural edit was refused.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A save was requested while another is still running.
    #[error("a save is already in progress")]
    SaveInFlight,
}
