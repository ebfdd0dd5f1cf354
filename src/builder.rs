//! The editing canvas for one tree at a time.
//!
//! [`TreeBuilder`] is a synchronous state machine. It never performs I/O:
//! loads and saves are handed out as tickets ([`LoadTicket`],
//! [`SaveRequest`]) which the host fulfils and hands back. Every ticket
//! carries the selection generation it was issued under, so a response that
//! arrives after the user has moved on to another tree is discarded.
//!
//! [`TreeSession`] drives a builder against a [`TreeClient`](crate::TreeClient)
//! on a tokio runtime.

use std::fmt;

use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{
    client::{GedcomFile, TransportError},
    domain::{
        Config, LinkOutcome, ParentRole, Person, PersonGraph, PersonId, PersonUpdate,
        Reconciliation, TreeForm, TreeId, TreeRecord, TreeScope,
    },
    error::{Error, PermissionError, ValidationError},
    gedcom::{self, ParseWarning},
};

mod autosave;
pub use autosave::{AutoSave, Phase};

mod session;
pub use session::TreeSession;

mod time_source;
pub use time_source::{FakeTimeSource, MonotonicTimeSource, TimeSource, TokioTimeSource};

/// Observable state of the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// No tree selected and nothing on the canvas.
    Empty,
    /// A tree's GEDCOM is being fetched.
    Loading,
    /// The graph matches what was last saved or loaded.
    Ready,
    /// The graph has unsaved edits.
    Dirty,
    /// A save is in flight.
    Saving,
}

/// Which path a save was issued through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    /// Issued by the debounce scheduler.
    Auto,
    /// Requested by the user, with tree metadata.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    Loading,
    Open,
}

/// A pending tree selection. The host fetches the GEDCOM for
/// [`LoadTicket::tree`] and hands the result to [`TreeBuilder::finish_load`].
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    record: TreeRecord,
    scope: TreeScope,
    read_only: bool,
}

impl LoadTicket {
    /// The tree being opened.
    #[must_use]
    pub const fn tree(&self) -> &TreeRecord {
        &self.record
    }

    /// The listing the tree was selected from.
    #[must_use]
    pub const fn scope(&self) -> TreeScope {
        self.scope
    }
}

/// What became of a load response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The tree is open. Records the parser skipped are listed.
    Loaded(Vec<ParseWarning>),
    /// Another tree was selected meanwhile; the response was discarded.
    Superseded,
}

/// A save to perform. Creates a tree when [`SaveRequest::tree`] is `None`.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    generation: u64,
    revision: u64,
    fingerprint: String,
    kind: SaveKind,
    tree: Option<TreeId>,
    form: TreeForm,
    file: GedcomFile,
}

impl SaveRequest {
    /// Auto-save or explicit save.
    #[must_use]
    pub const fn kind(&self) -> SaveKind {
        self.kind
    }

    /// The tree to update, or `None` to create one.
    #[must_use]
    pub const fn tree(&self) -> Option<&TreeId> {
        self.tree.as_ref()
    }

    /// Metadata to submit.
    #[must_use]
    pub const fn form(&self) -> &TreeForm {
        &self.form
    }

    /// The serialized graph.
    #[must_use]
    pub const fn file(&self) -> &GedcomFile {
        &self.file
    }
}

/// What became of a save response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The save went through; the tree's metadata as now known.
    Saved(TreeRecord),
    /// An auto-save failed. A [`Notice`] was queued and the edits are kept.
    Failed,
    /// The tree was closed or switched meanwhile; the response was
    /// discarded.
    Superseded,
}

/// A transient, non-blocking message for the user.
#[derive(Debug)]
pub struct Notice {
    /// The tree the failed auto-save was for.
    pub tree: Option<TreeId>,
    /// Why it failed.
    pub error: Error,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tree {
            Some(tree) => write!(f, "auto-save of tree {tree} failed: {}", self.error),
            None => write!(f, "auto-save failed: {}", self.error),
        }
    }
}

/// Hex SHA-256 of the serialized text.
fn fingerprint(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    format!("{hash:x}")
}

/// The editing canvas.
///
/// Edits go through the mutation methods, which refuse to run while a tree
/// is loading or when it was opened read-only. Each accepted edit bumps the
/// revision and, for a titled tree, restarts the auto-save debounce.
#[derive(Debug)]
pub struct TreeBuilder<T> {
    clock: T,
    locale: String,
    max_gedcom_bytes: usize,
    labels: fn(&str) -> String,

    generation: u64,
    stage: Stage,
    tree: Option<TreeRecord>,
    graph: PersonGraph,
    read_only: bool,
    warnings: Vec<ParseWarning>,

    revision: u64,
    saved_revision: u64,
    saved_fingerprint: Option<String>,
    autosave: AutoSave<u64>,
    explicit_in_flight: bool,
    notices: Vec<Notice>,
}

impl<T: TimeSource> TreeBuilder<T> {
    /// An empty builder using the locale, debounce window and size limit
    /// from `config`.
    #[must_use]
    pub fn new(config: &Config, clock: T) -> Self {
        Self {
            clock,
            locale: config.locale.clone(),
            max_gedcom_bytes: config.max_gedcom_bytes(),
            labels: gedcom::default_labels,
            generation: 0,
            stage: Stage::Empty,
            tree: None,
            graph: PersonGraph::default(),
            read_only: false,
            warnings: Vec::new(),
            revision: 0,
            saved_revision: 0,
            saved_fingerprint: None,
            autosave: AutoSave::new(config.debounce()),
            explicit_in_flight: false,
            notices: Vec::new(),
        }
    }

    /// Uses `labels` for the human-readable header lines of saved files.
    #[must_use]
    pub fn with_labels(mut self, labels: fn(&str) -> String) -> Self {
        self.labels = labels;
        self
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> BuilderState {
        match self.stage {
            Stage::Empty => BuilderState::Empty,
            Stage::Loading => BuilderState::Loading,
            Stage::Open if self.explicit_in_flight || self.autosave.is_in_flight() => {
                BuilderState::Saving
            }
            Stage::Open if self.revision != self.saved_revision => BuilderState::Dirty,
            Stage::Open => BuilderState::Ready,
        }
    }

    /// Whether there are edits no save has confirmed.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }

    /// Whether the open tree is view-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The open tree's metadata. `None` for an unsaved canvas.
    #[must_use]
    pub const fn tree(&self) -> Option<&TreeRecord> {
        self.tree.as_ref()
    }

    /// The graph being edited.
    #[must_use]
    pub const fn graph(&self) -> &PersonGraph {
        &self.graph
    }

    /// Persons on the canvas, in display order.
    #[must_use]
    pub fn people(&self) -> &[Person] {
        self.graph.people()
    }

    /// Problems skipped over when the open tree was parsed.
    #[must_use]
    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// Number of accepted edits since the tree was opened.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// The clock driving the debounce.
    #[must_use]
    pub const fn clock(&self) -> &T {
        &self.clock
    }

    /// Drains auto-save failure notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Serializes the canvas, for download.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the graph cannot be written.
    pub fn export(&self) -> Result<String, ValidationError> {
        gedcom::build(self.graph.people(), &self.locale, self.labels)
    }

    fn reset(&mut self) {
        self.tree = None;
        self.graph = PersonGraph::default();
        self.read_only = false;
        self.warnings.clear();
        self.revision = 0;
        self.saved_revision = 0;
        self.saved_fingerprint = None;
        self.explicit_in_flight = false;
        if self.autosave.cancel().is_some() {
            tracing::debug!("abandoned pending auto-save");
        }
    }

    // ----- selection -----

    /// Selects a tree, discarding the canvas and any pending auto-save.
    ///
    /// A save already in flight is left to finish, but its result will be
    /// ignored.
    #[instrument(level = "debug", skip(self, tree), fields(tree = %tree.id))]
    pub fn begin_load(&mut self, tree: TreeRecord, scope: TreeScope, read_only: bool) -> LoadTicket {
        self.generation += 1;
        self.reset();
        self.stage = Stage::Loading;

        LoadTicket {
            generation: self.generation,
            record: tree,
            scope,
            read_only,
        }
    }

    /// Applies a fetched GEDCOM text, unless another selection has been made
    /// since the ticket was issued.
    ///
    /// # Errors
    ///
    /// A transport or format failure closes the canvas and is returned.
    #[instrument(level = "debug", skip(self, ticket, text), fields(tree = %ticket.record.id))]
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        text: Result<String, TransportError>,
    ) -> Result<LoadOutcome, Error> {
        if ticket.generation != self.generation {
            tracing::debug!(
                "discarding response for superseded selection {}",
                ticket.record.id
            );
            return Ok(LoadOutcome::Superseded);
        }

        let loaded = text
            .map_err(Error::from)
            .and_then(|text| self.load(&text));
        let (graph, warnings, saved_fingerprint) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("failed to open tree {}: {e}", ticket.record.id);
                self.reset();
                self.stage = Stage::Empty;
                return Err(e);
            }
        };

        tracing::info!(
            "opened tree {} with {} people ({} warnings)",
            ticket.record.id,
            graph.len(),
            warnings.len()
        );

        self.graph = graph;
        self.warnings.clone_from(&warnings);
        self.saved_fingerprint = saved_fingerprint;
        self.tree = Some(ticket.record);
        self.read_only = ticket.read_only;
        self.stage = Stage::Open;

        Ok(LoadOutcome::Loaded(warnings))
    }

    fn load(
        &self,
        text: &str,
    ) -> Result<(PersonGraph, Vec<ParseWarning>, Option<String>), Error> {
        let parsed = gedcom::parse_with_locale(text, &self.locale)?;
        let mut graph = PersonGraph::from_people(parsed.people)?;
        graph.reconcile();

        // what an unedited auto-save would send
        let saved = gedcom::build(graph.people(), &self.locale, self.labels)
            .ok()
            .map(|text| fingerprint(&text));

        Ok((graph, parsed.warnings, saved))
    }

    /// Discards the canvas and detaches from the selected tree. Nothing is
    /// deleted from the backend.
    pub fn clear_canvas(&mut self) {
        self.generation += 1;
        self.reset();
        self.stage = Stage::Empty;
        tracing::debug!("canvas cleared");
    }

    // ----- edits -----

    fn edit<R>(
        &mut self,
        apply: impl FnOnce(&mut PersonGraph) -> Result<(R, bool), Error>,
    ) -> Result<R, Error> {
        if self.stage == Stage::Loading {
            return Err(PermissionError::NoTree.into());
        }
        if self.read_only {
            return Err(PermissionError::ReadOnly.into());
        }

        let (value, changed) = apply(&mut self.graph)?;

        if changed {
            // editing an empty canvas starts an unsaved tree
            self.stage = Stage::Open;
            self.touch();
        }
        Ok(value)
    }

    fn touch(&mut self) {
        self.revision += 1;
        if self.autosave_enabled() {
            self.autosave
                .schedule(self.revision, self.clock.current_time_ms());
        }
    }

    /// Auto-save needs a writable, titled tree that exists in the backend.
    fn autosave_enabled(&self) -> bool {
        self.stage == Stage::Open
            && !self.read_only
            && self.tree.as_ref().is_some_and(|t| t.title().is_some())
    }

    /// Adds a person at the end of the canvas.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable or the id is taken.
    pub fn add_person(&mut self, person: Person) -> Result<(), Error> {
        self.edit(|graph| Ok((graph.add(person)?, true)))
    }

    /// Removes a person and every reference to them.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable or the id is unknown.
    pub fn remove_person(&mut self, id: &PersonId) -> Result<Person, Error> {
        self.edit(|graph| {
            let removed = graph
                .remove(id)
                .ok_or_else(|| crate::domain::GraphError::NotFound(id.clone()))?;
            Ok((removed, true))
        })
    }

    /// Patches a person's attributes. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable or the id is unknown.
    pub fn update_person(&mut self, id: &PersonId, update: PersonUpdate) -> Result<bool, Error> {
        self.edit(|graph| {
            let changed = graph.update(id, update)?;
            Ok((changed, changed))
        })
    }

    /// Links a parent and a child.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable, either id is unknown, or the
    /// link would create an ancestry cycle.
    pub fn connect_parent(
        &mut self,
        parent: &PersonId,
        child: &PersonId,
        role: ParentRole,
    ) -> Result<LinkOutcome, Error> {
        self.edit(|graph| {
            let outcome = graph.connect_parent(parent, child, role)?;
            let changed = !outcome.already_linked;
            Ok((outcome, changed))
        })
    }

    /// Unlinks a parent and a child. Returns whether a link existed.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable.
    pub fn disconnect_parent(&mut self, parent: &PersonId, child: &PersonId) -> Result<bool, Error> {
        self.edit(|graph| {
            let changed = graph.disconnect_parent(parent, child);
            Ok((changed, changed))
        })
    }

    /// Marries two persons.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable, either id is unknown, or both
    /// ids are the same.
    pub fn connect_spouse(&mut self, a: &PersonId, b: &PersonId) -> Result<LinkOutcome, Error> {
        self.edit(|graph| {
            let outcome = graph.connect_spouse(a, b)?;
            let changed = !outcome.already_linked;
            Ok((outcome, changed))
        })
    }

    /// Clears a person's spouse link on both sides. Returns the former
    /// partner.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable.
    pub fn disconnect_spouse(&mut self, id: &PersonId) -> Result<Option<PersonId>, Error> {
        self.edit(|graph| {
            let partner = graph.disconnect_spouse(id);
            let changed = partner.is_some();
            Ok((partner, changed))
        })
    }

    /// Replaces every person on the canvas, as when a file is imported.
    /// Children lists and one-sided spouse links are repaired.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable or two persons share an id.
    pub fn replace_people(&mut self, people: Vec<Person>) -> Result<Reconciliation, Error> {
        self.edit(|graph| {
            let mut replacement = PersonGraph::from_people(people)?;
            let report = replacement.reconcile();
            *graph = replacement;
            Ok((report, true))
        })
    }

    /// Parses GEDCOM text and puts its persons on the canvas.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is not editable or the text cannot be parsed.
    pub fn import_gedcom(&mut self, text: &str) -> Result<Vec<ParseWarning>, Error> {
        let parsed = gedcom::parse_with_locale(text, &self.locale)?;
        self.replace_people(parsed.people)?;
        Ok(parsed.warnings)
    }

    // ----- saving -----

    fn serialize(&self, name: String) -> Result<(GedcomFile, String), ValidationError> {
        let text = gedcom::build(self.graph.people(), &self.locale, self.labels)?;
        let fingerprint = fingerprint(&text);
        let file = GedcomFile::new(name, text, self.max_gedcom_bytes)?;
        Ok((file, fingerprint))
    }

    /// When the pending auto-save becomes due, if one is waiting and may
    /// run.
    #[must_use]
    pub fn autosave_deadline(&self) -> Option<u64> {
        if self.explicit_in_flight || !self.autosave_enabled() {
            return None;
        }
        self.autosave.deadline()
    }

    /// Issues the auto-save if its debounce window has passed.
    ///
    /// Returns `None` when nothing is due, when a save is in flight, or when
    /// the serialized text is identical to the last one saved. A graph that
    /// cannot be serialized queues a [`Notice`].
    pub fn poll_autosave(&mut self) -> Option<SaveRequest> {
        if self.explicit_in_flight || !self.autosave_enabled() {
            return None;
        }
        let now = self.clock.current_time_ms();
        let revision = self.autosave.poll(now)?;
        self.autosave_request(revision)
    }

    /// Issues the pending auto-save immediately, ignoring the debounce.
    pub fn flush_autosave(&mut self) -> Option<SaveRequest> {
        if self.explicit_in_flight || !self.autosave_enabled() {
            return None;
        }
        let revision = self.autosave.flush()?;
        self.autosave_request(revision)
    }

    /// Re-issues an auto-save that failed, if no newer edit has replaced it.
    pub fn retry_autosave(&mut self) -> Option<SaveRequest> {
        if self.explicit_in_flight || !self.autosave_enabled() {
            return None;
        }
        let revision = self.autosave.take_retained()?;
        self.autosave
            .schedule(revision, self.clock.current_time_ms());
        let revision = self.autosave.flush()?;
        self.autosave_request(revision)
    }

    fn autosave_request(&mut self, revision: u64) -> Option<SaveRequest> {
        let Some(tree) = &self.tree else {
            self.autosave.cancel();
            return None;
        };
        let id = tree.id.clone();
        let form = tree.form();

        match self.serialize(form.file_name()) {
            Err(e) => {
                tracing::warn!("auto-save of tree {id} skipped: {e}");
                self.autosave.fail(revision);
                self.notices.push(Notice {
                    tree: Some(id),
                    error: e.into(),
                });
                None
            }
            Ok((_, fingerprint)) if self.saved_fingerprint.as_ref() == Some(&fingerprint) => {
                tracing::debug!("tree {id} unchanged since last save; skipping auto-save");
                self.autosave.complete();
                self.saved_revision = self.revision;
                None
            }
            Ok((file, fingerprint)) => {
                tracing::debug!("auto-saving tree {id} at revision {}", self.revision);
                Some(SaveRequest {
                    generation: self.generation,
                    revision: self.revision,
                    fingerprint,
                    kind: SaveKind::Auto,
                    tree: Some(id),
                    form,
                    file,
                })
            }
        }
    }

    /// Issues an explicit save of the graph and `form`.
    ///
    /// Always issued, dirty or not. With no tree selected the request
    /// creates one.
    ///
    /// # Errors
    ///
    /// Fails if the tree is loading or read-only, a save is already in
    /// flight, the title is blank, or the graph cannot be serialized.
    #[instrument(level = "debug", skip(self, form), fields(title = %form.title))]
    pub fn begin_save(&mut self, form: &TreeForm) -> Result<SaveRequest, Error> {
        if self.stage == Stage::Loading {
            return Err(PermissionError::NoTree.into());
        }
        if self.read_only {
            return Err(PermissionError::ReadOnly.into());
        }
        if self.explicit_in_flight || self.autosave.is_in_flight() {
            return Err(Error::SaveInFlight);
        }
        if form.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle.into());
        }

        let (file, fingerprint) = self.serialize(form.file_name())?;

        self.stage = Stage::Open;
        self.explicit_in_flight = true;

        Ok(SaveRequest {
            generation: self.generation,
            revision: self.revision,
            fingerprint,
            kind: SaveKind::Explicit,
            tree: self.tree.as_ref().map(|t| t.id.clone()),
            form: form.clone(),
            file,
        })
    }

    /// Applies the backend's answer to a save request.
    ///
    /// On success the tree's metadata mirror is updated and edits up to the
    /// request's revision count as saved. A failed auto-save keeps the edits
    /// and queues a [`Notice`]; it is retried only by the next edit, by
    /// [`TreeBuilder::retry_autosave`] or by an explicit save.
    ///
    /// # Errors
    ///
    /// A failed explicit save is returned as an error. The caller still
    /// holds the submitted form.
    pub fn finish_save(
        &mut self,
        request: SaveRequest,
        result: Result<TreeId, TransportError>,
    ) -> Result<SaveOutcome, Error> {
        if request.generation != self.generation {
            tracing::debug!("discarding save response for a closed tree");
            return Ok(SaveOutcome::Superseded);
        }
        if request.kind == SaveKind::Explicit {
            self.explicit_in_flight = false;
        }

        let id = match result {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("{:?} save failed: {e}", request.kind);
                return match request.kind {
                    SaveKind::Auto => {
                        self.autosave.fail(request.revision);
                        self.notices.push(Notice {
                            tree: request.tree,
                            error: e.into(),
                        });
                        Ok(SaveOutcome::Failed)
                    }
                    SaveKind::Explicit => Err(e.into()),
                };
            }
        };

        if request.revision >= self.saved_revision {
            self.saved_revision = request.revision;
            self.saved_fingerprint = Some(request.fingerprint);
        }

        let record = self
            .tree
            .get_or_insert_with(|| TreeRecord::new(id.clone()));
        record.id = id;
        if request.kind == SaveKind::Explicit {
            record.apply_form(&request.form);
        }
        record.has_gedcom = Some(true);
        let record = record.clone();

        match request.kind {
            SaveKind::Auto => self.autosave.complete(),
            SaveKind::Explicit if !self.is_dirty() => {
                self.autosave.cancel();
            }
            SaveKind::Explicit => {
                // edits made while the save was in flight
                if self.autosave_enabled() && self.autosave.phase() == Phase::Idle {
                    self.autosave
                        .schedule(self.revision, self.clock.current_time_ms());
                }
            }
        }

        tracing::info!(
            "saved tree {} at revision {}",
            record.id,
            request.revision
        );
        Ok(SaveOutcome::Saved(record))
    }

    /// Takes back a save request whose response will never arrive.
    ///
    /// The edits it carried stay dirty. An auto-save snapshot goes back to
    /// the scheduler with a fresh quiet period; an explicit save simply stops
    /// blocking further saves.
    pub fn abandon_save(&mut self, request: &SaveRequest) {
        if request.generation != self.generation {
            return;
        }
        tracing::debug!("{:?} save at revision {} abandoned", request.kind, request.revision);

        match request.kind {
            SaveKind::Explicit => self.explicit_in_flight = false,
            SaveKind::Auto => self.autosave.fail(request.revision),
        }
        if self.autosave_enabled() && self.autosave.phase() == Phase::Idle {
            self.autosave.take_retained();
            if self.is_dirty() {
                self.autosave
                    .schedule(self.revision, self.clock.current_time_ms());
            }
        }
    }
}
