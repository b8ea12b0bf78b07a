//! Plain-text record format
//!
//! A document is a free-text preamble followed by one block per record.
//! Blocks start at a line-start marker `### [<id>] <rest>` whose id follows
//! the record kind's grammar; everything before the first such marker is the
//! preamble and is written back verbatim.
//!
//! Parsing is lenient. A block that fails to parse is dropped and counted in
//! [`Document::skipped`]; the next rewrite of the file loses it.
//!
//! Lines of the form `<!-- recall:<key> <value> -->` inside the preamble are
//! directives. They are lifted out on parse and re-emitted after the preamble.

mod handoff;
mod lesson;

pub use lesson::rating_bar;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

const MARKER_PREFIX: &str = "### [";
const DIRECTIVE_PREFIX: &str = "<!-- recall:";
const DIRECTIVE_SUFFIX: &str = "-->";

/// Why a single block was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BlockError(pub String);

impl BlockError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The parsed marker line of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker<'a> {
    pub id: &'a str,
    /// Text after `] ` on the marker line
    pub rest: &'a str,
}

/// A record kind that can live in a document
pub trait Record: Sized {
    /// Whether `id` follows this kind's identifier grammar
    fn is_valid_id(id: &str) -> bool;

    fn id(&self) -> &str;

    /// Append this record's block (marker line included) to `out`.
    /// Every line, including the last, ends with `\n`.
    fn write_block(&self, out: &mut String);

    /// Rebuild a record from its marker and the lines that follow it
    fn parse_block(marker: &Marker<'_>, body: &[&str]) -> Result<Self, BlockError>;
}

/// A whole file: preamble, directives and records in file order
#[derive(Debug, Clone, PartialEq)]
pub struct Document<R> {
    pub preamble: String,
    pub directives: BTreeMap<String, String>,
    pub records: Vec<R>,
    /// Blocks dropped while parsing
    pub skipped: usize,
}

impl<R: Record> Document<R> {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
            directives: BTreeMap::new(),
            records: Vec::new(),
            skipped: 0,
        }
    }

    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives.get(key).map(String::as_str)
    }

    pub fn set_directive(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.directives.insert(key.into(), value.into());
    }

    pub fn find(&self, id: &str) -> Option<&R> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut R> {
        self.records.iter_mut().find(|r| r.id() == id)
    }

    /// Remove and return the record with `id`
    pub fn remove(&mut self, id: &str) -> Option<R> {
        let idx = self.records.iter().position(|r| r.id() == id)?;
        Some(self.records.remove(idx))
    }

    /// Parse a document; never fails
    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .collect();

        let first_marker = lines
            .iter()
            .position(|line| marker_for::<R>(line).is_some())
            .unwrap_or(lines.len());

        let terminated = first_marker < lines.len();
        let (preamble, directives) = split_preamble(&lines[..first_marker], terminated);

        let mut records = Vec::new();
        let mut skipped = 0;
        let mut idx = first_marker;

        while idx < lines.len() {
            let Some(marker) = marker_for::<R>(lines[idx]) else {
                idx += 1;
                continue;
            };

            let body_start = idx + 1;
            let body_end = lines[body_start..]
                .iter()
                .position(|line| marker_for::<R>(line).is_some())
                .map_or(lines.len(), |offset| body_start + offset);

            match R::parse_block(&marker, &lines[body_start..body_end]) {
                Ok(record) => records.push(record),
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(id = marker.id, error = %err, "skipping malformed record block");
                }
            }

            idx = body_end;
        }

        Self {
            preamble,
            directives,
            records,
            skipped,
        }
    }

    /// Render the document back to text
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.preamble.len() + self.records.len() * 256);

        out.push_str(&self.preamble);
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }

        for (key, value) in &self.directives {
            let _ = writeln!(out, "{DIRECTIVE_PREFIX}{key} {value} {DIRECTIVE_SUFFIX}");
        }

        for record in &self.records {
            record.write_block(&mut out);
            out.push('\n');
        }

        out
    }
}

/// Parse a marker line, accepting it only if the id fits `R`'s grammar
fn marker_for<R: Record>(line: &str) -> Option<Marker<'_>> {
    let marker = parse_marker(line)?;
    R::is_valid_id(marker.id).then_some(marker)
}

/// Syntactic marker parse: `### [<id>] <rest>` at line start
pub fn parse_marker(line: &str) -> Option<Marker<'_>> {
    let after = line.strip_prefix(MARKER_PREFIX)?;
    let close = after.find(']')?;
    let id = &after[..close];
    let tail = &after[close + 1..];
    let rest = tail.strip_prefix(' ').unwrap_or(tail);
    Some(Marker { id, rest })
}

/// Split preamble lines into verbatim text and lifted directives.
///
/// `terminated` is true when a marker follows, i.e. every preamble line
/// ended with a newline in the source text.
fn split_preamble(lines: &[&str], terminated: bool) -> (String, BTreeMap<String, String>) {
    let mut directives = BTreeMap::new();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());

    for &line in lines {
        match parse_directive(line) {
            Some((key, value)) => {
                directives.insert(key.to_string(), value.to_string());
            }
            None => kept.push(line),
        }
    }

    let preamble: String = if terminated {
        kept.iter().map(|line| format!("{line}\n")).collect()
    } else {
        kept.join("\n")
    };
    (preamble, directives)
}

fn parse_directive(line: &str) -> Option<(&str, &str)> {
    let inner = line
        .trim()
        .strip_prefix(DIRECTIVE_PREFIX)?
        .strip_suffix(DIRECTIVE_SUFFIX)?
        .trim();
    let (key, value) = inner.split_once(' ').unwrap_or((inner, ""));
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Split a `- **Key**: value` line
pub(crate) fn parse_field(line: &str) -> Option<(&str, &str)> {
    let after = line.trim_start().strip_prefix("- **")?;
    field_pair(after)
}

/// Split a `**Key**: value` fragment (the leading `**` already stripped)
pub(crate) fn field_pair(fragment: &str) -> Option<(&str, &str)> {
    let (key, value) = fragment.split_once("**:")?;
    Some((key.trim(), value.strip_prefix(' ').unwrap_or(value)))
}

/// Escape free text onto a single line
pub fn escape_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_line`]; unknown escapes are kept as written
pub fn unescape_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Collapse a single-line field (titles, tags): newlines become spaces,
/// surrounding whitespace is trimmed.
pub fn single_line(text: &str) -> String {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Minimal record kind: `N<digits>` ids, one body line of text
    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        text: String,
    }

    impl Record for Note {
        fn is_valid_id(id: &str) -> bool {
            id.len() > 1 && id.starts_with('N') && id[1..].chars().all(|c| c.is_ascii_digit())
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn write_block(&self, out: &mut String) {
            let _ = writeln!(out, "### [{}] note", self.id);
            let _ = writeln!(out, "- **Text**: {}", escape_line(&self.text));
        }

        fn parse_block(marker: &Marker<'_>, body: &[&str]) -> Result<Self, BlockError> {
            let text = body
                .iter()
                .find_map(|line| parse_field(line).filter(|(k, _)| *k == "Text"))
                .map(|(_, v)| unescape_line(v))
                .ok_or_else(|| BlockError::new("missing text"))?;
            Ok(Self {
                id: marker.id.to_string(),
                text,
            })
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_round_trip_preserves_preamble_and_order() {
        let mut doc = Document::new("# Notes\n\nHand-written intro.\n\n");
        doc.records = vec![note("N2", "second"), note("N1", "first\nwith ### [N9] inside")];
        doc.set_directive("last-id", "2");

        let text = doc.serialize();
        let parsed: Document<Note> = Document::parse(&text);

        assert_eq!(parsed.preamble, doc.preamble);
        assert_eq!(parsed.records, doc.records);
        assert_eq!(parsed.directive("last-id"), Some("2"));
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.serialize(), text);
    }

    #[test]
    fn test_malformed_block_is_skipped_not_fatal() {
        let text = "intro\n### [N1] ok\n- **Text**: a\n### [N2] broken\ngarbage\n### [N3] ok\n- **Text**: c\n";
        let doc: Document<Note> = Document::parse(text);

        let ids: Vec<&str> = doc.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["N1", "N3"]);
        assert_eq!(doc.skipped, 1);
        assert_eq!(doc.preamble, "intro\n");
    }

    #[test]
    fn test_marker_must_be_at_line_start() {
        let text = "intro\n  ### [N1] indented\n- **Text**: a\n";
        let doc: Document<Note> = Document::parse(text);
        assert!(doc.records.is_empty());
        assert_eq!(doc.preamble, text);
    }

    #[test]
    fn test_invalid_id_marker_stays_in_preamble() {
        let text = "### [X1] not a note\n### [N1] note\n- **Text**: a\n";
        let doc: Document<Note> = Document::parse(text);
        assert_eq!(doc.preamble, "### [X1] not a note\n");
        assert_eq!(doc.records.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let doc: Document<Note> = Document::parse("");
        assert!(doc.records.is_empty());
        assert_eq!(doc.preamble, "");
        assert_eq!(doc.serialize(), "");
    }

    #[test]
    fn test_crlf_lines_are_accepted() {
        let doc: Document<Note> = Document::parse("### [N1] x\r\n- **Text**: hi\r\n");
        assert_eq!(doc.records, vec![note("N1", "hi")]);
    }

    #[test]
    fn test_escape_round_trip() {
        for text in ["plain", "a\nb", "back\\slash\\n literal", "trailing\\", "\r\n"] {
            assert_eq!(unescape_line(&escape_line(text)), text);
            assert!(!escape_line(text).contains('\n'));
        }
    }

    #[test]
    fn test_single_line() {
        assert_eq!(single_line("  a\n b \r\n\nc "), "a b c");
    }

    #[test]
    fn test_parse_directive() {
        assert_eq!(parse_directive("<!-- recall:last-id 7 -->"), Some(("last-id", "7")));
        assert_eq!(parse_directive("<!-- plain comment -->"), None);
    }
}
