use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use non_empty_string::NonEmptyString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable identifier of a person within one tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PersonId(NonEmptyString);

impl PersonId {
    /// Creates an id from a string.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPersonId`] if the string is empty or contains
    /// whitespace or `@`, neither of which survive a GEDCOM round trip.
    pub fn new(s: String) -> Result<Self, InvalidPersonId> {
        if s.chars().any(|c| c.is_whitespace() || c == '@') {
            return Err(InvalidPersonId(s));
        }
        NonEmptyString::new(s).map(Self).map_err(InvalidPersonId)
    }

    /// Mints a fresh id for a person added on the canvas.
    #[must_use]
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(NonEmptyString::new(id).unwrap_or_else(|_| unreachable!("uuid is never empty")))
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Hash for PersonId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonId {
    type Err = InvalidPersonId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<&str> for PersonId {
    type Error = InvalidPersonId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for PersonId {
    type Error = InvalidPersonId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for PersonId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PersonId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

/// Error returned when a string cannot be used as a [`PersonId`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid person id '{0}': must be non-empty without whitespace or '@'")]
pub struct InvalidPersonId(String);

/// Recorded gender of a person.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// `SEX M`
    Male,
    /// `SEX F`
    Female,
    /// `SEX U`, or anything unrecognised.
    #[default]
    Unknown,
}

impl Gender {
    /// The GEDCOM `SEX` code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Unknown => "U",
        }
    }

    /// Reads a GEDCOM `SEX` value. Unrecognised codes map to
    /// [`Gender::Unknown`].
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "M" | "MALE" => Self::Male,
            "F" | "FEMALE" => Self::Female,
            _ => Self::Unknown,
        }
    }
}

/// Display names keyed by locale code (`en`, `ar`, ...).
///
/// Ordered by locale so that serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Names(BTreeMap<String, String>);

impl Names {
    /// Creates a name map with a single entry.
    #[must_use]
    pub fn single(locale: impl Into<String>, name: impl Into<String>) -> Self {
        let mut names = Self::default();
        names.insert(locale, name);
        names
    }

    /// Sets the name for a locale, returning the previous one.
    pub fn insert(&mut self, locale: impl Into<String>, name: impl Into<String>) -> Option<String> {
        self.0.insert(locale.into(), name.into())
    }

    /// The name for a locale, if any.
    #[must_use]
    pub fn get(&self, locale: &str) -> Option<&str> {
        self.0.get(locale).map(String::as_str)
    }

    /// The name to display for `locale`: the exact match when present,
    /// otherwise the first entry.
    #[must_use]
    pub fn primary(&self, locale: &str) -> Option<(&str, &str)> {
        self.0
            .get_key_value(locale)
            .or_else(|| self.0.iter().next())
            .map(|(l, n)| (l.as_str(), n.as_str()))
    }

    /// Iterates `(locale, name)` pairs in locale order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(l, n)| (l.as_str(), n.as_str()))
    }

    /// Whether no name is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of locales with a name.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<L: Into<String>, N: Into<String>> FromIterator<(L, N)> for Names {
    fn from_iter<T: IntoIterator<Item = (L, N)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(l, n)| (l.into(), n.into())).collect())
    }
}

/// A node in the family graph.
///
/// `father`, `mother` and `spouse` are weak references by id. `children` is a
/// denormalized convenience list kept consistent with the children's
/// `father`/`mother` by [`PersonGraph`](crate::domain::PersonGraph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    /// Unique within one tree.
    pub id: PersonId,
    /// Display names by locale.
    #[serde(default)]
    pub names: Names,
    /// Recorded gender.
    #[serde(default)]
    pub gender: Gender,
    /// Free-text year of birth. Not validated as a calendar date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<String>,
    /// Free-text year of death. Not validated as a calendar date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_year: Option<String>,
    /// Biography and notes.
    #[serde(default)]
    pub details: String,
    /// Display-only colour tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Father, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub father: Option<PersonId>,
    /// Mother, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mother: Option<PersonId>,
    /// Spouse, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse: Option<PersonId>,
    /// Children, in display order.
    #[serde(default)]
    pub children: Vec<PersonId>,
}

impl Person {
    /// A person with the given id and no other data.
    #[must_use]
    pub fn new(id: PersonId) -> Self {
        Self {
            id,
            names: Names::default(),
            gender: Gender::Unknown,
            birth_year: None,
            death_year: None,
            details: String::new(),
            color: None,
            father: None,
            mother: None,
            spouse: None,
            children: Vec::new(),
        }
    }

    /// A person with a single name in one locale.
    #[must_use]
    pub fn named(id: PersonId, locale: &str, name: &str) -> Self {
        Self {
            names: Names::single(locale, name),
            ..Self::new(id)
        }
    }

    /// Every id this person references, labelled with the relation.
    pub fn references(&self) -> impl Iterator<Item = (Relation, &PersonId)> {
        self.father
            .iter()
            .map(|id| (Relation::Father, id))
            .chain(self.mother.iter().map(|id| (Relation::Mother, id)))
            .chain(self.spouse.iter().map(|id| (Relation::Spouse, id)))
            .chain(self.children.iter().map(|id| (Relation::Child, id)))
    }

    /// Clears every reference to `id`. Returns `true` if anything changed.
    pub(crate) fn forget(&mut self, id: &PersonId) -> bool {
        let mut changed = false;
        for slot in [&mut self.father, &mut self.mother, &mut self.spouse] {
            if slot.as_ref() == Some(id) {
                *slot = None;
                changed = true;
            }
        }
        let before = self.children.len();
        self.children.retain(|child| child != id);
        changed || self.children.len() != before
    }
}

/// The kind of edge a person holds to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// `father`
    Father,
    /// `mother`
    Mother,
    /// `spouse`
    Spouse,
    /// an entry of `children`
    Child,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Father => "father",
            Self::Mother => "mother",
            Self::Spouse => "spouse",
            Self::Child => "child",
        })
    }
}

/// A field-wise patch of a person's attributes.
///
/// Relationships are edited through the graph, never through an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonUpdate {
    /// Replaces the whole name map.
    pub names: Option<Names>,
    /// Replaces the gender.
    pub gender: Option<Gender>,
    /// `Some(None)` clears the year.
    pub birth_year: Option<Option<String>>,
    /// `Some(None)` clears the year.
    pub death_year: Option<Option<String>>,
    /// Replaces the notes.
    pub details: Option<String>,
    /// `Some(None)` clears the colour.
    pub color: Option<Option<String>>,
}

impl PersonUpdate {
    /// Applies the patch. Returns `true` if any field changed.
    pub fn apply(self, person: &mut Person) -> bool {
        fn set<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
            match value {
                Some(value) if *slot != value => {
                    *slot = value;
                    true
                }
                _ => false,
            }
        }

        let Self {
            names,
            gender,
            birth_year,
            death_year,
            details,
            color,
        } = self;

        // non-short-circuiting on purpose
        set(&mut person.names, names)
            | set(&mut person.gender, gender)
            | set(&mut person.birth_year, birth_year)
            | set(&mut person.death_year, death_year)
            | set(&mut person.details, details)
            | set(&mut person.color, color)
    }
}
