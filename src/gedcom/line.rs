// Line tokenizer and record tree for the GEDCOM dialect.

use std::{fmt, sync::LazyLock};

use regex::Regex;

/// `LEVEL [@XREF@] TAG [VALUE]`, tolerant of indentation and repeated
/// separators between the leading fields.
static LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2})\s+(?:@([^@\s]+)@\s+)?([A-Za-z0-9_]+)(?:\s(.*))?$")
        .expect("line pattern is valid")
});

/// One tokenized GEDCOM line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// 1-based line number in the source text.
    pub number: usize,
    /// Nesting level.
    pub level: usize,
    /// Cross-reference id, without the surrounding `@`.
    pub xref: Option<&'a str>,
    /// Tag, as written.
    pub tag: &'a str,
    /// Everything after the tag's delimiter.
    pub value: Option<&'a str>,
}

impl Line<'_> {
    /// Whether the tag matches, ignoring ASCII case.
    #[must_use]
    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// Input text is not tokenizable into the expected record structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}: {content:?}")]
pub struct FormatError {
    /// 1-based line number of the offending line.
    pub line: usize,
    /// The offending line, as written.
    pub content: String,
    /// What is wrong with it.
    pub reason: FormatErrorKind,
}

/// Why a line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatErrorKind {
    /// The line does not have the `LEVEL TAG [VALUE]` shape.
    Malformed,
    /// The first line is not a level-0 record.
    NoRecord,
    /// The level increases by more than one.
    LevelJump {
        /// Level of the previous line.
        from: usize,
        /// Level of this line.
        to: usize,
    },
}

impl fmt::Display for FormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("not a GEDCOM line"),
            Self::NoRecord => f.write_str("expected a level 0 record"),
            Self::LevelJump { from, to } => write!(f, "level jumps from {from} to {to}"),
        }
    }
}

/// Tokenizes one line. Blank lines yield `Ok(None)`.
fn tokenize(number: usize, raw: &str) -> Result<Option<Line<'_>>, FormatError> {
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let malformed = || FormatError {
        line: number,
        content: raw.to_string(),
        reason: FormatErrorKind::Malformed,
    };

    let captures = LINE.captures(raw).ok_or_else(malformed)?;
    let level = captures[1].parse().map_err(|_| malformed())?;

    Ok(Some(Line {
        number,
        level,
        xref: captures.get(2).map(|m| m.as_str()),
        tag: captures.get(3).map_or("", |m| m.as_str()),
        value: captures.get(4).map(|m| m.as_str()),
    }))
}

/// A line together with its subordinate lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'a> {
    /// The line itself.
    pub line: Line<'a>,
    /// Lines one level deeper, in source order.
    pub children: Vec<Node<'a>>,
}

impl<'a> Node<'a> {
    /// The line value with surrounding whitespace removed, or `""`.
    #[must_use]
    pub fn value(&self) -> &'a str {
        self.line.value.map_or("", str::trim)
    }

    /// The first child with the given tag.
    #[must_use]
    pub fn child(&self, tag: &str) -> Option<&Self> {
        self.children.iter().find(|c| c.line.is(tag))
    }

    /// All children with the given tag.
    pub fn children_tagged<'s>(&'s self, tag: &'s str) -> impl Iterator<Item = &'s Self> + 's {
        self.children.iter().filter(move |c| c.line.is(tag))
    }

    /// The value joined with its `CONT` (new line) and `CONC` (same line)
    /// continuations. Whitespace is kept as written.
    #[must_use]
    pub fn text(&self) -> String {
        let mut text = self.line.value.unwrap_or("").to_string();
        for child in &self.children {
            if child.line.is("CONT") {
                text.push('\n');
                text.push_str(child.line.value.unwrap_or(""));
            } else if child.line.is("CONC") {
                text.push_str(child.line.value.unwrap_or(""));
            }
        }
        text
    }
}

/// Splits text into level-0 records.
///
/// A UTF-8 byte order mark and blank lines are ignored.
///
/// # Errors
///
/// Returns a [`FormatError`] naming the first line that is malformed, that
/// precedes any level-0 record, or that jumps more than one level deeper.
pub fn records(text: &str) -> Result<Vec<Node<'_>>, FormatError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut records = Vec::new();
    let mut stack: Vec<Node<'_>> = Vec::new();

    for (index, raw) in text.split('\n').enumerate() {
        let Some(line) = tokenize(index + 1, raw)? else {
            continue;
        };

        if line.level > stack.len() {
            let reason = if stack.is_empty() {
                FormatErrorKind::NoRecord
            } else {
                FormatErrorKind::LevelJump {
                    from: stack.len() - 1,
                    to: line.level,
                }
            };
            return Err(FormatError {
                line: line.number,
                content: raw.trim_end_matches('\r').to_string(),
                reason,
            });
        }

        while stack.len() > line.level {
            attach(&mut stack, &mut records);
        }
        stack.push(Node {
            line,
            children: Vec::new(),
        });
    }

    while !stack.is_empty() {
        attach(&mut stack, &mut records);
    }

    Ok(records)
}

fn attach<'a>(stack: &mut Vec<Node<'a>>, records: &mut Vec<Node<'a>>) {
    if let Some(node) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => records.push(node),
        }
    }
}
