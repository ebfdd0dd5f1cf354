//! In-memory person graph for one open tree.
//!
//! The [`PersonGraph`] knows nothing about GEDCOM or the network. It stores
//! persons in an arena and keeps both sides of every parent/child edge in
//! step.

use std::collections::{HashMap, HashSet};

use petgraph::{
    algo::{has_path_connecting, is_cyclic_directed, tarjan_scc},
    graphmap::DiGraphMap,
};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::domain::person::{Gender, Person, PersonId, PersonUpdate};

/// The working set of persons for one tree.
///
/// - Persons: `Vec<Person>` in display order (the arena)
/// - Lookup: `HashMap<PersonId, usize>` from id to arena slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonGraph {
    people: Vec<Person>,
    index: HashMap<PersonId, usize>,
}

/// Errors from structural graph operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A person with this id is already present.
    #[error("person {0} already exists")]
    DuplicateId(PersonId),
    /// No person with this id is present.
    #[error("person {0} not found")]
    NotFound(PersonId),
}

/// Errors that can occur when linking two persons.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The child could not be found.
    #[error("child {0} not found")]
    ChildNotFound(PersonId),
    /// The parent could not be found.
    #[error("parent {0} not found")]
    ParentNotFound(PersonId),
    /// One of the partners could not be found.
    #[error("person {0} not found")]
    PersonNotFound(PersonId),
    /// The link would make a person their own ancestor.
    #[error("making {parent} a parent of {child} would create a cycle")]
    Cycle {
        /// Proposed parent.
        parent: PersonId,
        /// Proposed child.
        child: PersonId,
    },
    /// The parent already fills the other parent slot of the child.
    #[error("{parent} is already the other parent of {child}")]
    BothParents {
        /// Proposed parent.
        parent: PersonId,
        /// Proposed child.
        child: PersonId,
    },
    /// A person cannot be married to themselves.
    #[error("{0} cannot be their own spouse")]
    SelfSpouse(PersonId),
}

/// Which parent slot a parent/child edge occupies on the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentRole {
    /// `father`
    Father,
    /// `mother`
    Mother,
}

impl ParentRole {
    /// The slot a parent of this gender normally occupies.
    ///
    /// Persons of unknown gender default to [`ParentRole::Father`].
    #[must_use]
    pub const fn for_gender(gender: Gender) -> Self {
        match gender {
            Gender::Female => Self::Mother,
            Gender::Male | Gender::Unknown => Self::Father,
        }
    }

    const fn other(self) -> Self {
        match self {
            Self::Father => Self::Mother,
            Self::Mother => Self::Father,
        }
    }

    fn slot(self, person: &mut Person) -> &mut Option<PersonId> {
        match self {
            Self::Father => &mut person.father,
            Self::Mother => &mut person.mother,
        }
    }
}

/// Result of linking a parent and a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Whether the relationship already existed prior to linking.
    pub already_linked: bool,
    /// The parent previously held in the same slot, now unlinked.
    pub replaced: Option<PersonId>,
}

/// What [`PersonGraph::reconcile`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// `(parent, child)` pairs appended to a parent's `children`.
    pub children_added: Vec<(PersonId, PersonId)>,
    /// `(parent, child)` pairs dropped from `children` because the child
    /// does not point back.
    pub children_dropped: Vec<(PersonId, PersonId)>,
    /// Persons whose `spouse` was filled in to mirror their partner.
    pub spouses_mirrored: Vec<PersonId>,
}

impl Reconciliation {
    /// Whether nothing needed fixing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children_added.is_empty()
            && self.children_dropped.is_empty()
            && self.spouses_mirrored.is_empty()
    }
}

impl PersonGraph {
    /// Builds a graph from a person list, keeping its order.
    ///
    /// References are not checked; dangling ids are reported when the graph
    /// is serialized.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateId`] if two persons share an id.
    pub fn from_people(people: Vec<Person>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(people.len());
        for (slot, person) in people.iter().enumerate() {
            if index.insert(person.id.clone(), slot).is_some() {
                return Err(GraphError::DuplicateId(person.id.clone()));
            }
        }
        Ok(Self { people, index })
    }

    /// Persons in display order.
    #[must_use]
    pub fn people(&self) -> &[Person] {
        &self.people
    }

    /// Consumes the graph, returning the persons in display order.
    #[must_use]
    pub fn into_people(self) -> Vec<Person> {
        self.people
    }

    /// Number of persons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.people.len()
    }

    /// Whether the graph holds no persons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Whether a person with this id is present.
    #[must_use]
    pub fn contains(&self, id: &PersonId) -> bool {
        self.index.contains_key(id)
    }

    /// Looks up a person by id.
    #[must_use]
    pub fn get(&self, id: &PersonId) -> Option<&Person> {
        self.index.get(id).map(|&slot| &self.people[slot])
    }

    fn slot(&self, id: &PersonId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Adds a person at the end of the display order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateId`] if the id is taken.
    pub fn add(&mut self, person: Person) -> Result<(), GraphError> {
        if self.index.contains_key(&person.id) {
            return Err(GraphError::DuplicateId(person.id));
        }
        self.index.insert(person.id.clone(), self.people.len());
        self.people.push(person);
        Ok(())
    }

    /// Removes a person and every reference other persons hold to them.
    ///
    /// Returns the removed person, or `None` if the id was unknown.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&mut self, id: &PersonId) -> Option<Person> {
        let slot = self.index.remove(id)?;
        let removed = self.people.remove(slot);

        for person in &mut self.people {
            if person.forget(id) {
                debug!(person = %person.id, "cleared reference to removed person");
            }
        }

        // slots after the removed one have shifted down
        for value in self.index.values_mut() {
            if *value > slot {
                *value -= 1;
            }
        }

        Some(removed)
    }

    /// Applies an attribute patch.
    ///
    /// Returns `true` if any field changed.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotFound`] for an unknown id.
    pub fn update(&mut self, id: &PersonId, update: PersonUpdate) -> Result<bool, GraphError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| GraphError::NotFound(id.clone()))?;
        Ok(update.apply(&mut self.people[slot]))
    }

    /// Makes `parent` the father or mother of `child`.
    ///
    /// Both sides are updated together. A different parent already in the
    /// same slot is unlinked first.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ChildNotFound`] or [`LinkError::ParentNotFound`]
    /// when either id is unknown, [`LinkError::BothParents`] if `parent`
    /// already fills the child's other slot, or [`LinkError::Cycle`] if the
    /// link would make a person their own ancestor. The graph is unchanged
    /// on error.
    #[instrument(level = "debug", skip(self))]
    pub fn connect_parent(
        &mut self,
        parent: &PersonId,
        child: &PersonId,
        role: ParentRole,
    ) -> Result<LinkOutcome, LinkError> {
        let child_slot = self
            .slot(child)
            .ok_or_else(|| LinkError::ChildNotFound(child.clone()))?;
        let parent_slot = self
            .slot(parent)
            .ok_or_else(|| LinkError::ParentNotFound(parent.clone()))?;

        let cycle = || LinkError::Cycle {
            parent: parent.clone(),
            child: child.clone(),
        };

        if child_slot == parent_slot {
            return Err(cycle());
        }

        let current = role.slot(&mut self.people[child_slot]).clone();
        if current.as_ref() == Some(parent) {
            if !self.people[parent_slot].children.contains(child) {
                self.people[parent_slot].children.push(child.clone());
            }
            return Ok(LinkOutcome {
                already_linked: true,
                replaced: None,
            });
        }

        if role.other().slot(&mut self.people[child_slot]).as_ref() == Some(parent) {
            return Err(LinkError::BothParents {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        if self.is_ancestor(child, parent) {
            return Err(cycle());
        }

        if let Some(old) = &current {
            if let Some(old_slot) = self.slot(old) {
                self.people[old_slot].children.retain(|c| c != child);
            }
        }

        *role.slot(&mut self.people[child_slot]) = Some(parent.clone());
        let children = &mut self.people[parent_slot].children;
        if !children.contains(child) {
            children.push(child.clone());
        }

        Ok(LinkOutcome {
            already_linked: false,
            replaced: current,
        })
    }

    /// Removes the parent/child edge between two persons, whichever slot it
    /// occupies.
    ///
    /// Returns `true` if an edge was removed.
    pub fn disconnect_parent(&mut self, parent: &PersonId, child: &PersonId) -> bool {
        let mut changed = false;

        if let Some(slot) = self.slot(child) {
            let person = &mut self.people[slot];
            for role in [ParentRole::Father, ParentRole::Mother] {
                let held = role.slot(person);
                if held.as_ref() == Some(parent) {
                    *held = None;
                    changed = true;
                }
            }
        }

        if let Some(slot) = self.slot(parent) {
            let children = &mut self.people[slot].children;
            let before = children.len();
            children.retain(|c| c != child);
            changed |= children.len() != before;
        }

        changed
    }

    /// Marries two persons, updating both sides.
    ///
    /// Any previous partner of either person loses their back link.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::PersonNotFound`] for unknown ids and
    /// [`LinkError::SelfSpouse`] when both ids are the same.
    pub fn connect_spouse(&mut self, a: &PersonId, b: &PersonId) -> Result<LinkOutcome, LinkError> {
        let a_slot = self
            .slot(a)
            .ok_or_else(|| LinkError::PersonNotFound(a.clone()))?;
        let b_slot = self
            .slot(b)
            .ok_or_else(|| LinkError::PersonNotFound(b.clone()))?;

        if a_slot == b_slot {
            return Err(LinkError::SelfSpouse(a.clone()));
        }

        let already_linked = self.people[a_slot].spouse.as_ref() == Some(b)
            && self.people[b_slot].spouse.as_ref() == Some(a);
        if already_linked {
            return Ok(LinkOutcome {
                already_linked,
                replaced: None,
            });
        }

        let replaced = self.disconnect_spouse(a).filter(|old| old != b);
        self.disconnect_spouse(b);

        self.people[a_slot].spouse = Some(b.clone());
        self.people[b_slot].spouse = Some(a.clone());

        Ok(LinkOutcome {
            already_linked,
            replaced,
        })
    }

    /// Clears the spouse link of `id` and the partner's link back to it.
    ///
    /// Returns the former partner.
    pub fn disconnect_spouse(&mut self, id: &PersonId) -> Option<PersonId> {
        let slot = self.slot(id)?;
        let partner = self.people[slot].spouse.take()?;
        if let Some(partner_slot) = self.slot(&partner) {
            let back = &mut self.people[partner_slot].spouse;
            if back.as_ref() == Some(id) {
                *back = None;
            }
        }
        Some(partner)
    }

    /// Whether `ancestor` can be reached from `person` by following
    /// father/mother links.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &PersonId, person: &PersonId) -> bool {
        let lineage = self.lineage();
        match (self.slot(person), self.slot(ancestor)) {
            (Some(from), Some(to)) if lineage.contains_node(from) && lineage.contains_node(to) => {
                from != to && has_path_connecting(&lineage, from, to, None)
            }
            _ => false,
        }
    }

    /// Ancestors of `id` in breadth-first order, nearest first.
    #[must_use]
    pub fn ancestors(&self, id: &PersonId) -> Vec<PersonId> {
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::from([id.clone()]);
        let mut out = Vec::new();

        while let Some(next) = queue.pop_front() {
            let Some(person) = self.get(&next) else {
                continue;
            };
            for parent in person.father.iter().chain(person.mother.iter()) {
                if parent != id && seen.insert(parent.clone()) {
                    out.push(parent.clone());
                    queue.push_back(parent.clone());
                }
            }
        }

        out
    }

    /// Determine whether the father/mother links contain any cycles.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.lineage())
    }

    /// Return every ancestry cycle as a sorted set of ids.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<PersonId>> {
        let lineage = self.lineage();
        let mut cycles = Vec::new();

        for component in tarjan_scc(&lineage) {
            let is_cycle = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&node| lineage.contains_edge(node, node));
            if !is_cycle {
                continue;
            }
            let mut ids: Vec<_> = component
                .iter()
                .map(|&slot| self.people[slot].id.clone())
                .collect();
            ids.sort();
            cycles.push(ids);
        }

        cycles.sort();
        cycles
    }

    /// Brings `children` in line with the children's father/mother links and
    /// mirrors one-sided spouse links where the partner has no spouse.
    ///
    /// Dangling ids are left in place.
    #[instrument(level = "debug", skip(self))]
    pub fn reconcile(&mut self) -> Reconciliation {
        let mut report = Reconciliation::default();

        // children declared by back-references, in arena order
        let mut expected: HashMap<usize, Vec<PersonId>> = HashMap::new();
        for person in &self.people {
            for parent in person.father.iter().chain(person.mother.iter()) {
                if let Some(slot) = self.slot(parent) {
                    let list = expected.entry(slot).or_default();
                    if !list.contains(&person.id) {
                        list.push(person.id.clone());
                    }
                }
            }
        }

        for slot in 0..self.people.len() {
            let parent_id = self.people[slot].id.clone();
            let wanted = expected.remove(&slot).unwrap_or_default();

            let children = std::mem::take(&mut self.people[slot].children);
            let mut kept = Vec::with_capacity(children.len());
            for child in children {
                let backed = wanted.contains(&child);
                let dangling = !self.index.contains_key(&child);
                if (backed || dangling) && !kept.contains(&child) {
                    kept.push(child);
                } else if !backed {
                    report.children_dropped.push((parent_id.clone(), child));
                }
            }
            for child in wanted {
                if !kept.contains(&child) {
                    report.children_added.push((parent_id.clone(), child.clone()));
                    kept.push(child);
                }
            }
            self.people[slot].children = kept;
        }

        for slot in 0..self.people.len() {
            let Some(partner) = self.people[slot].spouse.clone() else {
                continue;
            };
            let Some(partner_slot) = self.slot(&partner) else {
                continue;
            };
            if self.people[partner_slot].spouse.is_none() {
                self.people[partner_slot].spouse = Some(self.people[slot].id.clone());
                report.spouses_mirrored.push(partner);
            }
        }

        if !report.is_empty() {
            debug!(?report, "reconciled person graph");
        }

        report
    }

    /// Child -> parent edges over arena slots.
    fn lineage(&self) -> DiGraphMap<usize, ()> {
        let mut graph = DiGraphMap::with_capacity(self.people.len(), self.people.len() * 2);
        for (slot, person) in self.people.iter().enumerate() {
            graph.add_node(slot);
            for parent in person.father.iter().chain(person.mother.iter()) {
                if let Some(parent_slot) = self.slot(parent) {
                    graph.add_edge(slot, parent_slot, ());
                }
            }
        }
        graph
    }
}
