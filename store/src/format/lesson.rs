//! Lesson block syntax
//!
//! ```text
//! ### [L001] [**---|+----] Title text
//! - **Uses**: 3 | **Velocity**: 1.5 | **Learned**: 2026-10-01 | **Last**: 2026-10-18 | **Category**: pattern | **Source**: human
//! > content line 1
//! > content line 2
//! ```
//!
//! The rating bar is derived from uses and velocity and ignored on parse.
//! `Type` and `Promotable` are written only when they differ from the
//! defaults (no type, promotable).

use super::{BlockError, Marker, Record, field_pair};
use crate::lessons::{Lesson, LessonType, Source, is_lesson_id, parse_lesson_id};
use chrono::NaiveDate;
use std::fmt::Write as _;

const DATE_FORMAT: &str = "%Y-%m-%d";
const BAR_WIDTH: usize = 5;
const USES_STEPS: [u32; BAR_WIDTH] = [1, 3, 6, 13, 31];
const VELOCITY_STEPS: [f64; BAR_WIDTH] = [0.5, 1.0, 2.0, 4.0, 8.0];

/// `[**---|+----]`: filled uses on the left, filled velocity on the right
pub fn rating_bar(uses: u32, velocity: f64) -> String {
    let used = USES_STEPS.iter().filter(|step| uses >= **step).count();
    let fast = VELOCITY_STEPS.iter().filter(|step| velocity >= **step).count();
    format!(
        "[{}{}|{}{}]",
        "*".repeat(used),
        "-".repeat(BAR_WIDTH - used),
        "+".repeat(fast),
        "-".repeat(BAR_WIDTH - fast),
    )
}

fn is_rating_bar(text: &str) -> bool {
    text.len() > 2
        && text.starts_with('[')
        && text.ends_with(']')
        && text[1..text.len() - 1]
            .chars()
            .all(|c| matches!(c, '*' | '+' | '-' | '|'))
}

impl Record for Lesson {
    fn is_valid_id(id: &str) -> bool {
        is_lesson_id(id)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn write_block(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "### [{}] {} {}",
            self.id,
            rating_bar(self.uses, self.velocity),
            self.title
        );

        let _ = write!(
            out,
            "- **Uses**: {} | **Velocity**: {} | **Learned**: {} | **Last**: {} | **Category**: {} | **Source**: {}",
            self.uses,
            self.velocity,
            self.learned.format(DATE_FORMAT),
            self.last_used.format(DATE_FORMAT),
            self.category,
            self.source.as_str(),
        );
        if let Some(kind) = self.lesson_type {
            let _ = write!(out, " | **Type**: {}", kind.as_str());
        }
        if !self.promotable {
            out.push_str(" | **Promotable**: no");
        }
        out.push('\n');

        for line in self.content.split('\n') {
            if line.is_empty() {
                out.push_str(">\n");
            } else {
                let _ = writeln!(out, "> {line}");
            }
        }
    }

    fn parse_block(marker: &Marker<'_>, body: &[&str]) -> Result<Self, BlockError> {
        let (level, _) = parse_lesson_id(marker.id).map_err(|e| BlockError::new(e.to_string()))?;

        let title = match marker.rest.split_once(' ') {
            Some((bar, title)) if is_rating_bar(bar) => title,
            _ if is_rating_bar(marker.rest) => "",
            _ => marker.rest,
        }
        .trim()
        .to_string();

        let meta_line = body
            .iter()
            .find(|line| line.trim_start().starts_with("- **"))
            .ok_or_else(|| BlockError::new("missing metadata line"))?;

        let mut uses = None;
        let mut velocity = 0.0;
        let mut learned = None;
        let mut last_used = None;
        let mut category = "pattern".to_string();
        let mut source = Source::Human;
        let mut lesson_type = None;
        let mut promotable = true;

        let meta = meta_line.trim_start().trim_start_matches("- ");
        for part in meta.split(" | ") {
            let Some((key, value)) = part.trim().strip_prefix("**").and_then(field_pair) else {
                continue;
            };
            let value = value.trim();
            match key {
                "Uses" => uses = Some(parse_number::<u32>(key, value)?),
                "Velocity" => {
                    let v = parse_number::<f64>(key, value)?;
                    if !v.is_finite() {
                        return Err(BlockError::new(format!("non-finite velocity {value:?}")));
                    }
                    velocity = v.max(0.0);
                }
                "Learned" => learned = Some(parse_date(key, value)?),
                "Last" => last_used = Some(parse_date(key, value)?),
                "Category" => category = value.to_string(),
                "Source" => {
                    source = value
                        .parse::<Source>()
                        .map_err(|e| BlockError::new(e.to_string()))?;
                }
                "Type" => {
                    lesson_type = Some(
                        value
                            .parse::<LessonType>()
                            .map_err(|e| BlockError::new(e.to_string()))?,
                    );
                }
                "Promotable" => promotable = !matches!(value, "no" | "false"),
                _ => {}
            }
        }

        let uses = uses.ok_or_else(|| BlockError::new("missing Uses"))?;
        let learned = learned.ok_or_else(|| BlockError::new("missing Learned"))?;
        let last_used = last_used.unwrap_or(learned);

        let content = body
            .iter()
            .filter_map(|line| line.strip_prefix('>'))
            .map(|line| line.strip_prefix(' ').unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Lesson {
            id: marker.id.to_string(),
            title,
            content,
            category,
            source,
            level,
            uses,
            velocity,
            learned,
            last_used,
            promotable,
            lesson_type,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, BlockError> {
    value
        .parse()
        .map_err(|_| BlockError::new(format!("bad {key} value {value:?}")))
}

fn parse_date(key: &str, value: &str) -> Result<NaiveDate, BlockError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| BlockError::new(format!("bad {key} date {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Document;
    use crate::lessons::Level;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn lesson(id: &str, title: &str, content: &str) -> Lesson {
        Lesson {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            category: "pattern".to_string(),
            source: Source::Human,
            level: parse_lesson_id(id).unwrap().0,
            uses: 1,
            velocity: 0.0,
            learned: date("2026-10-01"),
            last_used: date("2026-10-02"),
            promotable: true,
            lesson_type: None,
        }
    }

    #[test]
    fn test_rating_bar() {
        assert_eq!(rating_bar(1, 0.0), "[*----|-----]");
        assert_eq!(rating_bar(100, 9.0), "[*****|+++++]");
        assert_eq!(rating_bar(0, 1.0), "[-----|++---]");
    }

    #[test]
    fn test_lesson_round_trip() {
        let mut odd = lesson("L002", "Tricky content", "");
        odd.content = "### [L999] [*----|-----] looks like a marker\n\n> quoted\ntrailing\n".into();
        odd.velocity = 0.1 + 0.2;
        odd.uses = 57;
        odd.lesson_type = Some(LessonType::Constraint);
        odd.promotable = false;
        odd.source = Source::Ai;
        odd.category = "gotcha".into();

        let mut doc = Document::new("# LESSONS.md - Project Level\n\n");
        doc.records = vec![lesson("L001", "Use rg not grep", "Faster.\nRespects .gitignore."), odd];

        let parsed: Document<Lesson> = Document::parse(&doc.serialize());
        assert_eq!(parsed.records, doc.records);
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn test_title_starting_with_bracket_survives() {
        let mut doc = Document::new("");
        doc.records = vec![lesson("S001", "[WIP] bracketed title", "x")];

        let parsed: Document<Lesson> = Document::parse(&doc.serialize());
        assert_eq!(parsed.records[0].title, "[WIP] bracketed title");
        assert_eq!(parsed.records[0].level, Level::System);
    }

    #[test]
    fn test_hand_written_block_without_bar() {
        let text = "### [L010] Hand written\n- **Uses**: 2 | **Learned**: 2026-01-05\n> body\n";
        let doc: Document<Lesson> = Document::parse(text);
        let l = &doc.records[0];
        assert_eq!(l.title, "Hand written");
        assert_eq!(l.uses, 2);
        assert_eq!(l.last_used, date("2026-01-05"));
        assert_eq!(l.category, "pattern");
        assert!(l.promotable);
    }

    #[test]
    fn test_bad_metadata_skips_only_that_block() {
        let text = "\
### [L001] [*----|-----] Good
- **Uses**: 1 | **Velocity**: 0 | **Learned**: 2026-10-01 | **Last**: 2026-10-01 | **Category**: pattern | **Source**: human
> fine

### [L002] [*----|-----] Bad date
- **Uses**: 1 | **Velocity**: 0 | **Learned**: yesterday | **Last**: 2026-10-01 | **Category**: pattern | **Source**: human
> broken

### [L003] [*----|-----] No metadata
> broken
";
        let doc: Document<Lesson> = Document::parse(text);
        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.records[0].id, "L001");
        assert_eq!(doc.skipped, 2);
    }
}
