use std::{collections::HashMap, fmt};

use tracing::{debug, instrument, trace, warn};

use super::line::{FormatError, Node, records};
use crate::domain::{Gender, Names, Person, PersonId};

/// Locale assumed for names when neither the name nor the header says.
pub const DEFAULT_LOCALE: &str = "en";

/// The result of a lenient parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    /// Persons in record order.
    pub people: Vec<Person>,
    /// Problems that were skipped over.
    pub warnings: Vec<ParseWarning>,
}

/// A non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// An `INDI` record has no cross-reference id and was skipped.
    MissingXref {
        /// Line of the record.
        line: usize,
    },
    /// An `INDI` record's id cannot be used as a person id; it was skipped.
    InvalidId {
        /// Line of the record.
        line: usize,
        /// The rejected id.
        raw: String,
    },
    /// An `INDI` record repeats an id already seen; it was skipped.
    DuplicateId {
        /// Line of the later record.
        line: usize,
        /// The repeated id.
        id: String,
    },
    /// A family points at a person that does not exist; the link was dropped.
    DanglingReference {
        /// Line of the pointer.
        line: usize,
        /// The unresolved pointer.
        xref: String,
    },
    /// A person is married in two families; the first partner was kept.
    ConflictingSpouse {
        /// The person.
        person: PersonId,
        /// Partner kept.
        kept: PersonId,
        /// Partner ignored.
        ignored: PersonId,
    },
    /// A person is a child in two families with different parents in the
    /// same role; the first parent was kept.
    ConflictingParent {
        /// The child.
        child: PersonId,
        /// Parent kept.
        kept: PersonId,
        /// Parent ignored.
        ignored: PersonId,
    },
    /// A top-level record of an unsupported kind was ignored.
    UnknownRecord {
        /// Line of the record.
        line: usize,
        /// Its tag.
        tag: String,
    },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingXref { line } => {
                write!(f, "line {line}: individual without an id was skipped")
            }
            Self::InvalidId { line, raw } => {
                write!(f, "line {line}: individual id {raw:?} is not usable; skipped")
            }
            Self::DuplicateId { line, id } => {
                write!(f, "line {line}: duplicate individual {id} was skipped")
            }
            Self::DanglingReference { line, xref } => {
                write!(f, "line {line}: @{xref}@ does not refer to an individual")
            }
            Self::ConflictingSpouse {
                person,
                kept,
                ignored,
            } => write!(
                f,
                "{person} is married to both {kept} and {ignored}; kept {kept}"
            ),
            Self::ConflictingParent {
                child,
                kept,
                ignored,
            } => write!(
                f,
                "{child} has conflicting parents {kept} and {ignored}; kept {kept}"
            ),
            Self::UnknownRecord { line, tag } => {
                write!(f, "line {line}: {tag} record ignored")
            }
        }
    }
}

/// Parses GEDCOM text into a flat person list, assuming
/// [`DEFAULT_LOCALE`] for names without a language.
///
/// # Errors
///
/// Returns a [`FormatError`] if the text cannot be split into records.
pub fn parse(text: &str) -> Result<Parsed, FormatError> {
    parse_with_locale(text, DEFAULT_LOCALE)
}

/// Parses GEDCOM text into a flat person list.
///
/// Person ids come from the `_UID` tag when present, else from the record's
/// cross-reference id. Relationships come from `FAM` records. Problems that
/// only affect one record or link are collected as warnings.
///
/// # Errors
///
/// Returns a [`FormatError`] if the text cannot be split into records.
#[instrument(level = "debug", skip(text), fields(bytes = text.len()))]
pub fn parse_with_locale(text: &str, default_locale: &str) -> Result<Parsed, FormatError> {
    let records = records(text)?;
    let mut warnings = Vec::new();

    let locale = records
        .iter()
        .find(|r| r.line.is("HEAD"))
        .and_then(|head| head.child("LANG"))
        .map(Node::value)
        .filter(|l| !l.is_empty())
        .unwrap_or(default_locale);

    let mut people: Vec<Person> = Vec::new();
    let mut by_xref: HashMap<&str, usize> = HashMap::new();
    let mut by_id: HashMap<PersonId, usize> = HashMap::new();
    let mut families = Vec::new();

    for record in &records {
        let line = record.line;
        if line.is("INDI") {
            let Some(xref) = line.xref else {
                warnings.push(ParseWarning::MissingXref { line: line.number });
                continue;
            };
            let raw = record
                .child("_UID")
                .map(Node::value)
                .filter(|uid| !uid.is_empty())
                .unwrap_or(xref);
            let Ok(id) = raw.parse::<PersonId>() else {
                warnings.push(ParseWarning::InvalidId {
                    line: line.number,
                    raw: raw.to_string(),
                });
                continue;
            };
            if by_id.contains_key(&id) || by_xref.contains_key(xref) {
                warnings.push(ParseWarning::DuplicateId {
                    line: line.number,
                    id: id.to_string(),
                });
                continue;
            }
            by_xref.insert(xref, people.len());
            by_id.insert(id.clone(), people.len());
            people.push(individual(id, record, locale));
        } else if line.is("FAM") {
            families.push(record);
        } else if !is_ignored_record(line.tag) {
            trace!(tag = line.tag, line = line.number, "ignoring record");
            warnings.push(ParseWarning::UnknownRecord {
                line: line.number,
                tag: line.tag.to_string(),
            });
        }
    }

    for family in families {
        link_family(family, &by_xref, &mut people, &mut warnings);
    }

    for warning in &warnings {
        warn!("{warning}");
    }
    debug!(
        people = people.len(),
        warnings = warnings.len(),
        "parsed GEDCOM"
    );

    Ok(Parsed { people, warnings })
}

fn is_ignored_record(tag: &str) -> bool {
    const KNOWN: [&str; 8] = ["HEAD", "TRLR", "SUBM", "SUBN", "NOTE", "SOUR", "REPO", "OBJE"];
    KNOWN.iter().any(|known| tag.eq_ignore_ascii_case(known))
}

fn individual(id: PersonId, record: &Node<'_>, locale: &str) -> Person {
    let mut person = Person::new(id);
    person.names = names(record, locale);
    person.gender = record
        .child("SEX")
        .map_or(Gender::Unknown, |sex| Gender::from_code(sex.value()));
    person.birth_year = event_date(record, "BIRT");
    person.death_year = event_date(record, "DEAT");
    person.details = record
        .children_tagged("NOTE")
        .map(Node::text)
        .collect::<Vec<_>>()
        .join("\n");
    person.color = record
        .child("_COLOR")
        .map(Node::value)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string);
    person
}

fn names(record: &Node<'_>, locale: &str) -> Names {
    let mut names = Names::default();
    for name in record.children_tagged("NAME") {
        let mut display = clean_name(name.value());
        if display.is_empty() {
            // fall back to the structured pieces
            display = ["GIVN", "SURN"]
                .iter()
                .filter_map(|tag| name.child(tag).map(Node::value))
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
        }
        if display.is_empty() {
            continue;
        }
        let lang = name
            .child("LANG")
            .map(Node::value)
            .filter(|l| !l.is_empty())
            .unwrap_or(locale);
        if names.get(lang).is_none() {
            names.insert(lang, display);
        }
    }
    names
}

/// Drops the surname slashes and collapses the whitespace they leave.
fn clean_name(raw: &str) -> String {
    raw.replace('/', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn event_date(record: &Node<'_>, tag: &str) -> Option<String> {
    record
        .child(tag)?
        .child("DATE")
        .map(Node::value)
        .filter(|date| !date.is_empty())
        .map(ToString::to_string)
}

fn pointer<'a>(node: &Node<'a>) -> &'a str {
    let value = node.value();
    value
        .strip_prefix('@')
        .and_then(|v| v.strip_suffix('@'))
        .unwrap_or(value)
}

fn link_family(
    family: &Node<'_>,
    by_xref: &HashMap<&str, usize>,
    people: &mut [Person],
    warnings: &mut Vec<ParseWarning>,
) {
    let mut resolve = |node: &Node<'_>| {
        let xref = pointer(node);
        let slot = by_xref.get(xref).copied();
        if slot.is_none() {
            warnings.push(ParseWarning::DanglingReference {
                line: node.line.number,
                xref: xref.to_string(),
            });
        }
        slot
    };

    let husband = family.child("HUSB").and_then(&mut resolve);
    let wife = family.child("WIFE").and_then(&mut resolve);
    let children: Vec<usize> = family
        .children_tagged("CHIL")
        .filter_map(&mut resolve)
        .collect();

    let married = family.child("MARR").is_some() || family.child("CHIL").is_none();
    if let (Some(h), Some(w)) = (husband, wife) {
        if married && h != w {
            link_spouses(people, h, w, warnings);
        }
    }

    for child in children {
        if let Some(father) = husband {
            link_parent(people, father, child, |p| &mut p.father, warnings);
        }
        if let Some(mother) = wife {
            link_parent(people, mother, child, |p| &mut p.mother, warnings);
        }
    }
}

fn link_spouses(people: &mut [Person], a: usize, b: usize, warnings: &mut Vec<ParseWarning>) {
    let a_id = people[a].id.clone();
    let b_id = people[b].id.clone();

    for (me, partner) in [(a, &b_id), (b, &a_id)] {
        if let Some(kept) = &people[me].spouse {
            if kept != partner {
                warnings.push(ParseWarning::ConflictingSpouse {
                    person: people[me].id.clone(),
                    kept: kept.clone(),
                    ignored: partner.clone(),
                });
                return;
            }
        }
    }

    people[a].spouse = Some(b_id);
    people[b].spouse = Some(a_id);
}

fn link_parent(
    people: &mut [Person],
    parent: usize,
    child: usize,
    slot: fn(&mut Person) -> &mut Option<PersonId>,
    warnings: &mut Vec<ParseWarning>,
) {
    if parent == child {
        return;
    }
    let parent_id = people[parent].id.clone();
    let child_id = people[child].id.clone();

    match slot(&mut people[child]) {
        Some(kept) if *kept != parent_id => {
            warnings.push(ParseWarning::ConflictingParent {
                child: child_id,
                kept: kept.clone(),
                ignored: parent_id,
            });
            return;
        }
        held => *held = Some(parent_id),
    }

    let children = &mut people[parent].children;
    if !children.contains(&child_id) {
        children.push(child_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PersonId {
        s.parse().unwrap()
    }

    fn find<'a>(parsed: &'a Parsed, raw: &str) -> &'a Person {
        parsed
            .people
            .iter()
            .find(|p| p.id.as_str() == raw)
            .unwrap_or_else(|| panic!("{raw} not parsed"))
    }

    const FAMILY: &str = "\
0 HEAD
1 CHAR UTF-8
1 LANG ar
0 @I1@ INDI
1 NAME Omar /Haddad/
2 LANG en
1 NAME عمر حداد
1 SEX M
1 BIRT
2 DATE 1920
1 DEAT
2 DATE ABT 1990
1 NOTE Merchant
2 CONT Lived in Aleppo
1 _COLOR #336699
0 @I2@ INDI
1 NAME Layla /Haddad/
1 SEX F
0 @I3@ INDI
1 NAME
2 GIVN Sami
2 SURN Haddad
1 SEX M
0 @F1@ FAM
1 HUSB @I1@
1 WIFE @I2@
1 CHIL @I3@
1 MARR Y
0 TRLR
";

    #[test]
    fn parses_individuals_and_families() {
        let parsed = parse(FAMILY).unwrap();
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        assert_eq!(parsed.people.len(), 3);

        let omar = find(&parsed, "I1");
        assert_eq!(omar.names.get("en"), Some("Omar Haddad"));
        assert_eq!(omar.names.get("ar"), Some("عمر حداد"));
        assert_eq!(omar.gender, Gender::Male);
        assert_eq!(omar.birth_year.as_deref(), Some("1920"));
        assert_eq!(omar.death_year.as_deref(), Some("ABT 1990"));
        assert_eq!(omar.details, "Merchant\nLived in Aleppo");
        assert_eq!(omar.color.as_deref(), Some("#336699"));
        assert_eq!(omar.spouse, Some(id("I2")));
        assert_eq!(omar.children, vec![id("I3")]);

        let layla = find(&parsed, "I2");
        assert_eq!(layla.names.get("ar"), Some("Layla Haddad"));
        assert_eq!(layla.spouse, Some(id("I1")));

        let sami = find(&parsed, "I3");
        assert_eq!(sami.names.get("ar"), Some("Sami Haddad"));
        assert_eq!(sami.father, Some(id("I1")));
        assert_eq!(sami.mother, Some(id("I2")));
    }

    #[test]
    fn prefers_uid_over_xref() {
        let parsed = parse("0 @I1@ INDI\n1 _UID p-42\n1 NAME A\n").unwrap();
        assert_eq!(parsed.people[0].id, id("p-42"));
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(parse(FAMILY).unwrap(), parse(FAMILY).unwrap());
    }

    #[test]
    fn tolerates_missing_fields() {
        let parsed = parse("0 @X@ INDI\n0 TRLR\n").unwrap();
        let person = &parsed.people[0];
        assert!(person.names.is_empty());
        assert_eq!(person.gender, Gender::Unknown);
        assert_eq!(person.birth_year, None);
        assert!(person.children.is_empty());
    }

    #[test]
    fn skips_records_without_ids() {
        let parsed = parse("0 INDI\n1 NAME Nobody\n0 @I2@ INDI\n1 NAME Somebody\n").unwrap();
        assert_eq!(parsed.people.len(), 1);
        assert_eq!(parsed.warnings, vec![ParseWarning::MissingXref { line: 1 }]);
    }

    #[test]
    fn skips_duplicate_ids() {
        let parsed = parse("0 @I1@ INDI\n1 NAME A\n0 @I1@ INDI\n1 NAME B\n").unwrap();
        assert_eq!(parsed.people.len(), 1);
        assert_eq!(parsed.people[0].names.get("en"), Some("A"));
        assert!(matches!(
            parsed.warnings[..],
            [ParseWarning::DuplicateId { line: 3, .. }]
        ));
    }

    #[test]
    fn drops_dangling_family_links() {
        let text = "0 @I1@ INDI\n0 @F1@ FAM\n1 HUSB @I1@\n1 CHIL @I9@\n";
        let parsed = parse(text).unwrap();

        assert!(parsed.people[0].children.is_empty());
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::DanglingReference {
                line: 4,
                xref: "I9".to_string(),
            }]
        );
    }

    #[test]
    fn childless_couple_is_married() {
        let text = "0 @A@ INDI\n0 @B@ INDI\n0 @F@ FAM\n1 WIFE @A@\n1 HUSB @B@\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.people[0].spouse, Some(id("B")));
        assert_eq!(parsed.people[1].spouse, Some(id("A")));
    }

    #[test]
    fn co_parents_without_marriage_are_not_spouses() {
        let text = "0 @A@ INDI\n0 @B@ INDI\n0 @C@ INDI\n0 @F@ FAM\n1 HUSB @A@\n1 WIFE @B@\n1 CHIL @C@\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.people[0].spouse, None);
        assert_eq!(parsed.people[2].father, Some(id("A")));
    }

    #[test]
    fn keeps_first_spouse_on_conflict() {
        let text = "\
0 @A@ INDI
0 @B@ INDI
0 @C@ INDI
0 @F1@ FAM
1 HUSB @A@
1 WIFE @B@
0 @F2@ FAM
1 HUSB @A@
1 WIFE @C@
";
        let parsed = parse(text).unwrap();

        assert_eq!(parsed.people[0].spouse, Some(id("B")));
        assert_eq!(parsed.people[2].spouse, None);
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::ConflictingSpouse {
                person: id("A"),
                kept: id("B"),
                ignored: id("C"),
            }]
        );
    }

    #[test]
    fn ignores_asymmetric_pointers_on_individuals() {
        // FAMS/FAMC are informational; FAM records carry the links
        let text = "0 @A@ INDI\n1 FAMS @F9@\n0 @B@ INDI\n";
        let parsed = parse(text).unwrap();
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.people[0].spouse, None);
    }

    #[test]
    fn whitespace_variations_parse_the_same() {
        let tidy = parse("0 @A@ INDI\n1 NAME Ada\n1 SEX F\n").unwrap();
        let messy = parse("0  @A@   INDI\r\n   1 SEX   F\r\n\r\n  1   NAME   Ada  \r\n").unwrap();
        assert_eq!(tidy.people, messy.people);
    }

    #[test]
    fn reports_unknown_records() {
        let parsed = parse("0 @X@ _PLACE\n0 @S@ SOUR\n").unwrap();
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::UnknownRecord {
                line: 1,
                tag: "_PLACE".to_string(),
            }]
        );
    }

    #[test]
    fn falls_back_to_configured_locale() {
        let parsed = parse_with_locale("0 @A@ INDI\n1 NAME Ada\n", "fr").unwrap();
        assert_eq!(parsed.people[0].names.get("fr"), Some("Ada"));
    }

    #[test]
    fn empty_input_is_an_empty_tree() {
        assert_eq!(parse("").unwrap(), Parsed::default());
    }

    #[test]
    fn untokenizable_input_fails() {
        let err = parse("0 @A@ INDI\nthis is not gedcom\n").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
