//! Handoff block syntax
//!
//! One field per line, free text escaped onto a single line, list fields as
//! indented sub-items:
//!
//! ```text
//! ### [hf-1a2b3c4] Title text
//! - **Status**: in_progress
//! - **Phase**: implementing
//! - **Agent**: user
//! - **Created**: 2026-10-17
//! - **Updated**: 2026-10-18
//! - **Blocked By**: hf-0000001, hf-0000002
//! - **Description**: first line\nsecond line
//! - **Checkpoint**: tests green, wiring CLI next
//! - **Refs**:
//!   - src/lib.rs
//! - **Tried**:
//!   1. [fail] naive retry loop
//! - **Next**:
//!   - add backoff
//! - **Context**: {"summary":"..."}
//! ```

use super::{BlockError, Marker, Record, escape_line, parse_field, unescape_line};
use crate::handoffs::{
    Handoff, HandoffContext, HandoffPhase, HandoffStatus, TriedOutcome, TriedStep, is_handoff_id,
};
use chrono::NaiveDate;
use std::fmt::Write as _;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Copy)]
enum ListField {
    Refs,
    Tried,
    Next,
}

impl Record for Handoff {
    fn is_valid_id(id: &str) -> bool {
        is_handoff_id(id)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn write_block(&self, out: &mut String) {
        let _ = writeln!(out, "### [{}] {}", self.id, self.title);
        let _ = writeln!(out, "- **Status**: {}", self.status);
        let _ = writeln!(out, "- **Phase**: {}", self.phase);
        let _ = writeln!(out, "- **Agent**: {}", escape_line(&self.agent));
        let _ = writeln!(out, "- **Created**: {}", self.created.format(DATE_FORMAT));
        let _ = writeln!(out, "- **Updated**: {}", self.updated.format(DATE_FORMAT));

        if !self.blocked_by.is_empty() {
            let _ = writeln!(out, "- **Blocked By**: {}", self.blocked_by.join(", "));
        }
        if !self.description.is_empty() {
            let _ = writeln!(out, "- **Description**: {}", escape_line(&self.description));
        }
        if !self.checkpoint.is_empty() {
            let _ = writeln!(out, "- **Checkpoint**: {}", escape_line(&self.checkpoint));
        }

        if !self.files.is_empty() {
            out.push_str("- **Refs**:\n");
            for file in &self.files {
                let _ = writeln!(out, "  - {}", escape_line(file));
            }
        }
        if !self.tried.is_empty() {
            out.push_str("- **Tried**:\n");
            for (n, step) in self.tried.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. [{}] {}",
                    n + 1,
                    step.outcome,
                    escape_line(&step.description)
                );
            }
        }
        if !self.next_steps.is_empty() {
            out.push_str("- **Next**:\n");
            for item in &self.next_steps {
                let _ = writeln!(out, "  - {}", escape_line(item));
            }
        }

        if let Some(context) = &self.context
            && let Ok(json) = serde_json::to_string(context)
        {
            let _ = writeln!(out, "- **Context**: {json}");
        }
    }

    fn parse_block(marker: &Marker<'_>, body: &[&str]) -> Result<Self, BlockError> {
        let mut status = None;
        let mut phase = HandoffPhase::Research;
        let mut agent = crate::handoffs::DEFAULT_AGENT.to_string();
        let mut created = None;
        let mut updated = None;
        let mut blocked_by = Vec::new();
        let mut description = String::new();
        let mut checkpoint = String::new();
        let mut files = Vec::new();
        let mut tried = Vec::new();
        let mut next_steps = Vec::new();
        let mut context = None;
        let mut list: Option<ListField> = None;

        for line in body {
            if let Some(item) = line.strip_prefix("  ") {
                match list {
                    Some(ListField::Refs) => {
                        if let Some(text) = item.strip_prefix("- ") {
                            files.push(unescape_line(text));
                        }
                    }
                    Some(ListField::Next) => {
                        if let Some(text) = item.strip_prefix("- ") {
                            next_steps.push(unescape_line(text));
                        }
                    }
                    Some(ListField::Tried) => {
                        if let Some(step) = parse_tried(item)? {
                            tried.push(step);
                        }
                    }
                    None => {}
                }
                continue;
            }

            let Some((key, value)) = parse_field(line) else {
                list = None;
                continue;
            };
            list = None;

            match key {
                "Status" => status = Some(parse_enum::<HandoffStatus>(value)?),
                "Phase" => phase = parse_enum::<HandoffPhase>(value)?,
                "Agent" => agent = unescape_line(value.trim()),
                "Created" => created = Some(parse_date(key, value)?),
                "Updated" => updated = Some(parse_date(key, value)?),
                "Blocked By" => {
                    blocked_by = value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "Description" => description = unescape_line(value),
                "Checkpoint" => checkpoint = unescape_line(value),
                "Refs" => list = Some(ListField::Refs),
                "Tried" => list = Some(ListField::Tried),
                "Next" => list = Some(ListField::Next),
                "Context" => {
                    let parsed: HandoffContext = serde_json::from_str(value.trim())
                        .map_err(|e| BlockError::new(format!("bad context: {e}")))?;
                    context = Some(parsed);
                }
                _ => {}
            }
        }

        let status = status.ok_or_else(|| BlockError::new("missing Status"))?;
        let created = created.ok_or_else(|| BlockError::new("missing Created"))?;

        Ok(Handoff {
            id: marker.id.to_string(),
            title: marker.rest.trim().to_string(),
            description,
            status,
            phase,
            agent,
            created,
            updated: updated.unwrap_or(created),
            files,
            tried,
            next_steps,
            checkpoint,
            blocked_by,
            context,
        })
    }
}

/// `N. [outcome] text`
fn parse_tried(item: &str) -> Result<Option<TriedStep>, BlockError> {
    let Some((number, rest)) = item.split_once(". ") else {
        return Ok(None);
    };
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }

    let rest = rest
        .strip_prefix('[')
        .ok_or_else(|| BlockError::new(format!("tried step without outcome: {item:?}")))?;
    let (outcome, text) = rest
        .split_once(']')
        .ok_or_else(|| BlockError::new(format!("tried step without outcome: {item:?}")))?;

    Ok(Some(TriedStep {
        outcome: parse_enum::<TriedOutcome>(outcome)?,
        description: unescape_line(text.strip_prefix(' ').unwrap_or(text)),
    }))
}

fn parse_enum<T>(value: &str) -> Result<T, BlockError>
where
    T: std::str::FromStr<Err = crate::errors::RecallError>,
{
    value
        .trim()
        .parse()
        .map_err(|e: crate::errors::RecallError| BlockError::new(e.to_string()))
}

fn parse_date(key: &str, value: &str) -> Result<NaiveDate, BlockError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| BlockError::new(format!("bad {key} date {value:?}")))
}
