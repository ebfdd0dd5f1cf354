// Tree metadata as held by the backend.
//
// The builder edits the persons of exactly one tree; everything here is the
// surrounding record the host lists, selects and saves.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend identifier of a tree.
///
/// The API is inconsistent about sending ids as numbers or strings; both are
/// accepted and held as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TreeId(String);

impl TreeId {
    /// Wraps a backend id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TreeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) if !s.is_empty() => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected a tree id, found {other}"
            ))),
        }
    }
}

/// Which listing a tree was fetched through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeScope {
    /// Trees owned by the current user.
    #[default]
    Own,
    /// Trees published by anyone.
    Public,
}

/// A tree's metadata. Every field besides `id` may be absent from a given
/// source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRecord {
    /// Backend id.
    pub id: TreeId,
    /// Display title; auto-save requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Archive the tree was transcribed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_source: Option<String>,
    /// Reference code within the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_code: Option<String>,
    /// Whether the tree is listed publicly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    /// Whether a GEDCOM file is stored for the tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_gedcom: Option<bool>,
    /// Owner's display name or id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TreeRecord {
    /// A record with only an id.
    #[must_use]
    pub const fn new(id: TreeId) -> Self {
        Self {
            id,
            title: None,
            description: None,
            archive_source: None,
            document_code: None,
            is_public: None,
            has_gedcom: None,
            owner: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// The title, if present and not blank.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Overwrites fields with those present in `other`. Absent fields never
    /// erase present ones.
    pub fn overlay(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        let Self {
            id: _,
            title,
            description,
            archive_source,
            document_code,
            is_public,
            has_gedcom,
            owner,
            created_at,
            updated_at,
        } = other;

        take(&mut self.title, title);
        take(&mut self.description, description);
        take(&mut self.archive_source, archive_source);
        take(&mut self.document_code, document_code);
        take(&mut self.is_public, is_public);
        take(&mut self.has_gedcom, has_gedcom);
        take(&mut self.owner, owner);
        take(&mut self.created_at, created_at);
        take(&mut self.updated_at, updated_at);
    }

    /// The metadata form an update of this tree would submit.
    #[must_use]
    pub fn form(&self) -> TreeForm {
        TreeForm {
            title: self.title.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            archive_source: self.archive_source.clone().unwrap_or_default(),
            document_code: self.document_code.clone().unwrap_or_default(),
            is_public: self.is_public.unwrap_or(false),
        }
    }

    /// Copies submitted form values into the record.
    pub fn apply_form(&mut self, form: &TreeForm) {
        self.title = Some(form.title.clone());
        self.description = Some(form.description.clone());
        self.archive_source = Some(form.archive_source.clone());
        self.document_code = Some(form.document_code.clone());
        self.is_public = Some(form.is_public);
    }
}

/// Merges partial tree lists (for example own trees, public trees and cached
/// entries) into one list keyed by id.
///
/// The first occurrence of an id fixes its position; later occurrences
/// overlay their present fields onto it.
#[must_use]
pub fn merge_trees<I>(sources: I) -> Vec<TreeRecord>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = TreeRecord>,
{
    let mut merged: Vec<TreeRecord> = Vec::new();
    let mut positions: HashMap<TreeId, usize> = HashMap::new();

    for record in sources.into_iter().flatten() {
        if let Some(&position) = positions.get(&record.id) {
            merged[position].overlay(record);
        } else {
            positions.insert(record.id.clone(), merged.len());
            merged.push(record);
        }
    }

    merged
}

/// Tree-level metadata submitted with an explicit save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeForm {
    /// Required; saving without a title is rejected.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Archive the tree was transcribed from.
    pub archive_source: String,
    /// Reference code within the archive.
    pub document_code: String,
    /// Whether the tree is listed publicly.
    pub is_public: bool,
}

impl TreeForm {
    /// A form with only a title.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// File name for the GEDCOM part, derived from the title.
    #[must_use]
    pub fn file_name(&self) -> String {
        let slug: String = self
            .title
            .trim()
            .chars()
            .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let slug = slug
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if slug.is_empty() {
            "tree.ged".to_string()
        } else {
            format!("{slug}.ged")
        }
    }
}
