use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use crate::{
    domain::{Gender, Person, PersonId},
    error::ValidationError,
};

/// Longest value written on one line before splitting with `CONC`.
const MAX_VALUE_CHARS: usize = 240;

/// A family unit as written to a `FAM` record.
#[derive(Debug, Default)]
struct Family {
    husband: Option<usize>,
    wife: Option<usize>,
    married: bool,
    children: Vec<usize>,
}

/// Serializes persons into GEDCOM text.
///
/// `locale` picks which name is written first and declared in the header;
/// `translate` supplies the human-readable header labels and is never applied
/// to person data. The output depends only on the arguments, so the same
/// persons in the same order always produce the same bytes.
///
/// # Errors
///
/// Returns a [`ValidationError`] if two persons share an id, a person has no
/// name, or any relationship points at an id missing from `people`.
#[instrument(level = "debug", skip(people, translate), fields(count = people.len()))]
pub fn build<F>(people: &[Person], locale: &str, translate: F) -> Result<String, ValidationError>
where
    F: Fn(&str) -> String,
{
    let slots = validate(people)?;
    let families = families(people, &slots);

    let mut famc: Vec<Vec<usize>> = vec![Vec::new(); people.len()];
    let mut fams: Vec<Vec<usize>> = vec![Vec::new(); people.len()];
    for (index, family) in families.iter().enumerate() {
        for &child in &family.children {
            famc[child].push(index);
        }
        for partner in family.husband.iter().chain(family.wife.iter()) {
            fams[*partner].push(index);
        }
    }

    let mut out = Writer::default();

    out.line(0, "HEAD", None);
    out.line(1, "SOUR", Some("KINSHIP"));
    out.line(2, "NAME", Some(&translate("gedcom.source")));
    out.line(1, "GEDC", None);
    out.line(2, "VERS", Some("5.5.1"));
    out.line(2, "FORM", Some("LINEAGE-LINKED"));
    out.line(1, "CHAR", Some("UTF-8"));
    out.line(1, "LANG", Some(locale));
    out.line(1, "NOTE", Some(&translate("gedcom.note")));

    for (slot, person) in people.iter().enumerate() {
        out.record(&individual_xref(slot), "INDI");
        out.line(1, "_UID", Some(person.id.as_str()));

        if let Some((primary_locale, primary)) = person.names.primary(locale) {
            out.line(1, "NAME", Some(primary));
            out.line(2, "LANG", Some(primary_locale));
            for (other_locale, name) in person.names.iter() {
                if other_locale != primary_locale {
                    out.line(1, "NAME", Some(name));
                    out.line(2, "LANG", Some(other_locale));
                }
            }
        }

        out.line(1, "SEX", Some(person.gender.code()));
        for (tag, year) in [("BIRT", &person.birth_year), ("DEAT", &person.death_year)] {
            if let Some(year) = year.as_deref().map(str::trim).filter(|y| !y.is_empty()) {
                out.line(1, tag, None);
                out.line(2, "DATE", Some(year));
            }
        }
        if !person.details.is_empty() {
            out.text(1, "NOTE", &person.details);
        }
        if let Some(color) = person.color.as_deref().filter(|c| !c.trim().is_empty()) {
            out.line(1, "_COLOR", Some(color));
        }
        for &family in &famc[slot] {
            out.line(1, "FAMC", Some(&format!("@{}@", family_xref(family))));
        }
        for &family in &fams[slot] {
            out.line(1, "FAMS", Some(&format!("@{}@", family_xref(family))));
        }
    }

    for (index, family) in families.iter().enumerate() {
        out.record(&family_xref(index), "FAM");
        if let Some(husband) = family.husband {
            out.line(1, "HUSB", Some(&format!("@{}@", individual_xref(husband))));
        }
        if let Some(wife) = family.wife {
            out.line(1, "WIFE", Some(&format!("@{}@", individual_xref(wife))));
        }
        if family.married {
            out.line(1, "MARR", Some("Y"));
        }
        for &child in &family.children {
            out.line(1, "CHIL", Some(&format!("@{}@", individual_xref(child))));
        }
    }

    out.line(0, "TRLR", None);

    debug!(
        families = families.len(),
        bytes = out.0.len(),
        "built GEDCOM"
    );
    Ok(out.0)
}

fn individual_xref(slot: usize) -> String {
    format!("I{}", slot + 1)
}

fn family_xref(index: usize) -> String {
    format!("F{}", index + 1)
}

/// Checks ids, names and references, returning the id -> slot map.
fn validate(people: &[Person]) -> Result<HashMap<&PersonId, usize>, ValidationError> {
    let mut slots = HashMap::with_capacity(people.len());
    for (slot, person) in people.iter().enumerate() {
        if slots.insert(&person.id, slot).is_some() {
            return Err(ValidationError::DuplicateId(person.id.clone()));
        }
    }

    for person in people {
        if person.names.iter().all(|(_, name)| name.trim().is_empty()) {
            return Err(ValidationError::MissingName(person.id.clone()));
        }
        for (relation, target) in person.references() {
            if !slots.contains_key(target) {
                return Err(ValidationError::DanglingReference {
                    person: person.id.clone(),
                    relation,
                    target: target.clone(),
                });
            }
        }
    }

    Ok(slots)
}

/// Groups persons into family units.
///
/// One family per distinct (father, mother) pair of any child, in order of
/// first appearance, then one per spouse pair not already covered.
fn families(people: &[Person], slots: &HashMap<&PersonId, usize>) -> Vec<Family> {
    let mut families: Vec<Family> = Vec::new();
    let mut by_parents: HashMap<(Option<usize>, Option<usize>), usize> = HashMap::new();

    for (slot, person) in people.iter().enumerate() {
        let father = person.father.as_ref().map(|id| slots[id]);
        let mother = person.mother.as_ref().map(|id| slots[id]);
        if father.is_none() && mother.is_none() {
            continue;
        }
        let index = *by_parents.entry((father, mother)).or_insert_with(|| {
            families.push(Family {
                husband: father,
                wife: mother,
                ..Family::default()
            });
            families.len() - 1
        });
        families[index].children.push(slot);
    }

    for (slot, person) in people.iter().enumerate() {
        let Some(partner) = person.spouse.as_ref().map(|id| slots[id]) else {
            continue;
        };
        if partner == slot {
            warn!(person = %person.id, "ignoring self-referencing spouse link");
            continue;
        }

        let existing = by_parents
            .get(&(Some(slot), Some(partner)))
            .or_else(|| by_parents.get(&(Some(partner), Some(slot))))
            .copied();
        if let Some(index) = existing {
            families[index].married = true;
            continue;
        }

        let (husband, wife) =
            if people[slot].gender == Gender::Female && people[partner].gender != Gender::Female {
                (partner, slot)
            } else {
                (slot, partner)
            };
        if people[partner].spouse.as_ref().is_some_and(|back| *back != person.id) {
            warn!(
                person = %person.id,
                partner = %people[partner].id,
                "spouse link is not reciprocated; writing it for both"
            );
        }
        by_parents.insert((Some(husband), Some(wife)), families.len());
        families.push(Family {
            husband: Some(husband),
            wife: Some(wife),
            married: true,
            children: Vec::new(),
        });
    }

    families
}

#[derive(Debug, Default)]
struct Writer(String);

impl Writer {
    fn record(&mut self, xref: &str, tag: &str) {
        self.0.push_str("0 @");
        self.0.push_str(xref);
        self.0.push_str("@ ");
        self.0.push_str(tag);
        self.0.push('\n');
    }

    fn line(&mut self, level: usize, tag: &str, value: Option<&str>) {
        let value = value.map(single_line).unwrap_or_default();
        self.raw(level, tag, &value);
    }

    /// Writes multi-line text with `CONT` for line breaks and `CONC` for
    /// over-long lines.
    fn text(&mut self, level: usize, tag: &str, text: &str) {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        for (index, line) in text.split('\n').enumerate() {
            let mut pieces = chunks(line);
            let first = pieces.next().unwrap_or("");
            if index == 0 {
                self.raw(level, tag, first);
            } else {
                self.raw(level + 1, "CONT", first);
            }
            for piece in pieces {
                self.raw(level + 1, "CONC", piece);
            }
        }
    }

    fn raw(&mut self, level: usize, tag: &str, value: &str) {
        self.0.push_str(&level.to_string());
        self.0.push(' ');
        self.0.push_str(tag);
        if !value.is_empty() {
            self.0.push(' ');
            self.0.push_str(value);
        }
        self.0.push('\n');
    }
}

fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a line into pieces of at most [`MAX_VALUE_CHARS`] characters.
fn chunks(line: &str) -> impl Iterator<Item = &str> {
    let mut rest = line;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .char_indices()
            .nth(MAX_VALUE_CHARS)
            .map_or(rest.len(), |(index, _)| index);
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}
