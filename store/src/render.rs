//! Result rendering
//!
//! Every operation family returns one result shape. Each shape renders to
//! pretty JSON (via serde) or to human-readable text. [`Outcome`] closes the
//! set for callers that dispatch on the shape.

use crate::format::rating_bar;
use crate::handoffs::{BatchReport, Handoff, HandoffCompleted};
use crate::lessons::{CitationResult, DecayReport, Lesson, LessonAdded, PromotionResult};
use crate::relevance::{MAX_SCORE, ScoredLesson};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = crate::errors::RecallError;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(crate::errors::RecallError::invalid_format(other, "json|text")),
        }
    }
}

/// A result that can be shown to a human or a machine
pub trait Render: Serialize {
    /// Format as human-readable text
    fn to_text(&self) -> String;

    fn to_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"error\": \"failed to encode result: {e}\"}}"))
    }

    fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => self.to_json(),
            OutputFormat::Text => self.to_text(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// List shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LessonList {
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedLessons {
    pub query: String,
    pub results: Vec<ScoredLesson>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffView {
    pub handoff: Handoff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffList {
    pub handoffs: Vec<Handoff>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Text renderings
// ─────────────────────────────────────────────────────────────────────────────

fn lesson_line(lesson: &Lesson) -> String {
    format!(
        "[{}] {} {}",
        lesson.id,
        rating_bar(lesson.uses, lesson.velocity),
        lesson.title
    )
}

impl Render for LessonAdded {
    fn to_text(&self) -> String {
        format!("Added {} lesson {}: {}\n", self.level, self.id, self.title)
    }
}

impl Render for CitationResult {
    fn to_text(&self) -> String {
        let mut output = format!(
            "Cited {} (uses: {}, velocity: {:.2})\n",
            self.id, self.uses, self.velocity
        );
        if self.promotion_ready {
            output.push_str(&format!(
                "{} is ready for promotion to system scope\n",
                self.id
            ));
        }
        output
    }
}

impl Render for PromotionResult {
    fn to_text(&self) -> String {
        format!("Promoted {} → {}\n", self.from, self.to)
    }
}

impl Render for DecayReport {
    fn to_text(&self) -> String {
        if self.skipped {
            return "Decay skipped: no activity since the last sweep\n".to_string();
        }

        let mut output = format!(
            "Decayed velocity on {} lesson(s), reduced uses on {} stale lesson(s)\n",
            self.decayed, self.uses_decremented
        );
        if !self.evicted.is_empty() {
            output.push_str(&format!("Evicted: {}\n", self.evicted.join(", ")));
        }
        output
    }
}

impl Render for LessonList {
    fn to_text(&self) -> String {
        if self.lessons.is_empty() {
            return "No lessons found.\n".to_string();
        }

        let mut output = String::new();
        for lesson in &self.lessons {
            output.push_str(&lesson_line(lesson));
            output.push('\n');
            output.push_str(&format!(
                "    uses: {} | velocity: {:.2} | last: {} | category: {}\n",
                lesson.uses, lesson.velocity, lesson.last_used, lesson.category
            ));
            if let Some(first) = lesson.content.lines().find(|l| !l.trim().is_empty()) {
                output.push_str(&format!("    {}\n", first.trim()));
            }
        }
        output.push_str(&format!("\n{} lesson(s)\n", self.lessons.len()));
        output
    }
}

impl Render for RankedLessons {
    fn to_text(&self) -> String {
        if self.results.is_empty() {
            return format!("No lessons relevant to {:?}\n", self.query);
        }

        let mut output = String::new();
        for scored in &self.results {
            output.push_str(&format!(
                "[{:>2}/{MAX_SCORE}] {}\n",
                scored.score,
                lesson_line(&scored.lesson)
            ));
        }
        output
    }
}

fn push_handoff(output: &mut String, handoff: &Handoff) {
    output.push_str(&format!("[{}] {}\n", handoff.id, handoff.title));
    output.push_str(&format!(
        "  status: {} | phase: {} | agent: {}\n",
        handoff.status, handoff.phase, handoff.agent
    ));
    output.push_str(&format!(
        "  created: {} | updated: {}\n",
        handoff.created, handoff.updated
    ));
    if !handoff.blocked_by.is_empty() {
        output.push_str(&format!("  blocked by: {}\n", handoff.blocked_by.join(", ")));
    }
    if !handoff.description.is_empty() {
        output.push_str("  description:\n");
        for line in handoff.description.lines() {
            output.push_str(&format!("    {line}\n"));
        }
    }
    if !handoff.checkpoint.is_empty() {
        output.push_str(&format!("  checkpoint: {}\n", handoff.checkpoint));
    }
    if !handoff.files.is_empty() {
        output.push_str("  files:\n");
        for file in &handoff.files {
            output.push_str(&format!("    - {file}\n"));
        }
    }
    if !handoff.tried.is_empty() {
        output.push_str("  tried:\n");
        for (n, step) in handoff.tried.iter().enumerate() {
            output.push_str(&format!("    {}. [{}] {}\n", n + 1, step.outcome, step.description));
        }
    }
    if !handoff.next_steps.is_empty() {
        output.push_str("  next:\n");
        for step in &handoff.next_steps {
            output.push_str(&format!("    - {step}\n"));
        }
    }
    if let Some(context) = &handoff.context
        && !context.summary.is_empty()
    {
        output.push_str(&format!("  context: {}\n", context.summary));
    }
}

impl Render for HandoffView {
    fn to_text(&self) -> String {
        let mut output = String::new();
        push_handoff(&mut output, &self.handoff);
        output
    }
}

impl Render for HandoffList {
    fn to_text(&self) -> String {
        if self.handoffs.is_empty() {
            return "No handoffs found.\n".to_string();
        }

        let mut output = String::new();
        for handoff in &self.handoffs {
            output.push_str(&format!(
                "[{}] {:<16} {:<12} {}\n",
                handoff.id,
                handoff.status.as_str(),
                handoff.phase.as_str(),
                handoff.title
            ));
        }
        output
    }
}

impl Render for HandoffCompleted {
    fn to_text(&self) -> String {
        let mut output = format!("Completed [{}] {}\n", self.handoff.id, self.handoff.title);
        if !self.suggestions.is_empty() {
            output.push_str("Suggested lessons:\n");
            for suggestion in &self.suggestions {
                output.push_str(&format!("  - {}\n", suggestion.title));
            }
        }
        output
    }
}

impl Render for BatchReport {
    fn to_text(&self) -> String {
        let mut output = String::new();
        for (n, item) in self.items.iter().enumerate() {
            match &item.error {
                None => output.push_str(&format!(
                    "{:>3}. ok    {} {}\n",
                    n + 1,
                    item.op,
                    item.id.as_deref().unwrap_or("")
                )),
                Some(failure) => output.push_str(&format!(
                    "{:>3}. error {}: {}\n",
                    n + 1,
                    item.op,
                    failure.message
                )),
            }
        }
        output.push_str(&format!(
            "{} succeeded, {} failed\n",
            self.succeeded(),
            self.failed()
        ));
        output
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Closed set of result shapes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum Outcome {
    LessonAdded(LessonAdded),
    Citation(CitationResult),
    Promotion(PromotionResult),
    Decay(DecayReport),
    Lessons(LessonList),
    Ranked(RankedLessons),
    Handoff(HandoffView),
    Handoffs(HandoffList),
    HandoffCompleted(HandoffCompleted),
    Batch(BatchReport),
}

impl Render for Outcome {
    fn to_text(&self) -> String {
        match self {
            Self::LessonAdded(r) => r.to_text(),
            Self::Citation(r) => r.to_text(),
            Self::Promotion(r) => r.to_text(),
            Self::Decay(r) => r.to_text(),
            Self::Lessons(r) => r.to_text(),
            Self::Ranked(r) => r.to_text(),
            Self::Handoff(r) => r.to_text(),
            Self::Handoffs(r) => r.to_text(),
            Self::HandoffCompleted(r) => r.to_text(),
            Self::Batch(r) => r.to_text(),
        }
    }
}

macro_rules! outcome_from {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        $(
            impl From<$ty> for Outcome {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )+
    };
}

outcome_from! {
    LessonAdded(LessonAdded),
    Citation(CitationResult),
    Promotion(PromotionResult),
    Decay(DecayReport),
    Lessons(LessonList),
    Ranked(RankedLessons),
    Handoff(HandoffView),
    Handoffs(HandoffList),
    HandoffCompleted(HandoffCompleted),
    Batch(BatchReport),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoffs::{HandoffStatus, TriedOutcome, TriedStep};
    use crate::lessons::Level;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    #[test]
    fn test_citation_text_flags_promotion() {
        let result = CitationResult {
            id: "L003".into(),
            uses: 50,
            velocity: 3.0,
            promotion_ready: true,
        };
        let text = result.render(OutputFormat::Text);
        assert!(text.contains("Cited L003 (uses: 50, velocity: 3.00)"));
        assert!(text.contains("ready for promotion"));
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let outcome = Outcome::from(LessonAdded {
            id: "S004".into(),
            level: Level::System,
            title: "Title".into(),
        });
        let json: serde_json::Value =
            serde_json::from_str(&outcome.render(OutputFormat::Json)).unwrap();
        assert_eq!(json["kind"], "lesson_added");
        assert_eq!(json["result"]["id"], "S004");
        assert_eq!(json["result"]["level"], "system");
        assert_eq!(outcome.to_text(), "Added system lesson S004: Title\n");
    }

    #[test]
    fn test_handoff_view_text() {
        let mut handoff = Handoff::new("hf-00000aa".into(), "Render me".into(), day());
        handoff.status = HandoffStatus::Blocked;
        handoff.blocked_by = vec!["hf-00000bb".into()];
        handoff.tried = vec![TriedStep {
            outcome: TriedOutcome::Fail,
            description: "first try".into(),
        }];

        let text = HandoffView { handoff }.to_text();
        assert!(text.starts_with("[hf-00000aa] Render me\n"));
        assert!(text.contains("status: blocked"));
        assert!(text.contains("blocked by: hf-00000bb"));
        assert!(text.contains("1. [fail] first try"));
    }

    #[test]
    fn test_empty_lists() {
        assert_eq!(LessonList { lessons: vec![] }.to_text(), "No lessons found.\n");
        assert_eq!(HandoffList { handoffs: vec![] }.to_text(), "No handoffs found.\n");
        assert_eq!(
            DecayReport {
                skipped: true,
                ..DecayReport::default()
            }
            .to_text(),
            "Decay skipped: no activity since the last sweep\n"
        );
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
