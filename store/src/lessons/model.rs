//! Lesson record types

use crate::errors::{RecallError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum digits in a lesson identifier's numeric suffix
pub const ID_DIGITS: usize = 3;

/// Scope a lesson lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Project,
    System,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::System => "system",
        }
    }

    /// Identifier prefix for this scope
    pub fn prefix(&self) -> char {
        match self {
            Self::Project => 'L',
            Self::System => 'S',
        }
    }

    pub fn format_id(&self, number: u32) -> String {
        format!("{}{number:0width$}", self.prefix(), width = ID_DIGITS)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "project" => Ok(Self::Project),
            "system" => Ok(Self::System),
            other => Err(RecallError::invalid_format(other, "project|system")),
        }
    }
}

/// Who wrote the lesson
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Human,
    Ai,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
        }
    }
}

impl FromStr for Source {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "human" => Ok(Self::Human),
            "ai" => Ok(Self::Ai),
            other => Err(RecallError::invalid_format(other, "human|ai")),
        }
    }
}

/// Optional classification of a lesson
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Constraint,
    Informational,
    Preference,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Constraint => "constraint",
            Self::Informational => "informational",
            Self::Preference => "preference",
        }
    }
}

impl FromStr for LessonType {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constraint" => Ok(Self::Constraint),
            "informational" => Ok(Self::Informational),
            "preference" => Ok(Self::Preference),
            other => Err(RecallError::invalid_format(
                other,
                "constraint|informational|preference",
            )),
        }
    }
}

/// A stored unit of reusable knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub source: Source,
    pub level: Level,
    pub uses: u32,
    pub velocity: f64,
    pub learned: NaiveDate,
    pub last_used: NaiveDate,
    pub promotable: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub lesson_type: Option<LessonType>,
}

impl Lesson {
    /// Days since the lesson was last cited
    pub fn days_since_use(&self, today: NaiveDate) -> i64 {
        (today - self.last_used).num_days()
    }

    /// Text the relevance engine indexes
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }
}

/// Split a lesson identifier into scope and number.
///
/// Accepts `L` or `S` followed by at least three digits.
pub fn parse_lesson_id(id: &str) -> Result<(Level, u32)> {
    let invalid = || RecallError::invalid_format(id, "L### or S###");

    let mut chars = id.chars();
    let level = match chars.next() {
        Some('L') => Level::Project,
        Some('S') => Level::System,
        _ => return Err(invalid()),
    };

    let digits = chars.as_str();
    if digits.len() < ID_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let number = digits.parse::<u32>().map_err(|_| invalid())?;
    Ok((level, number))
}

pub fn is_lesson_id(id: &str) -> bool {
    parse_lesson_id(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lesson_id() {
        assert_eq!(parse_lesson_id("L001").unwrap(), (Level::Project, 1));
        assert_eq!(parse_lesson_id("S042").unwrap(), (Level::System, 42));
        assert_eq!(parse_lesson_id("L1234").unwrap(), (Level::Project, 1234));
    }

    #[test]
    fn test_parse_lesson_id_rejects_bad_shapes() {
        for bad in ["", "L", "L01", "X001", "l001", "L00a", "L 001", "hf-1234567"] {
            let err = parse_lesson_id(bad).unwrap_err();
            assert_eq!(err.category(), crate::ErrorCategory::InvalidFormat, "{bad}");
        }
    }

    #[test]
    fn test_format_id_zero_pads() {
        assert_eq!(Level::Project.format_id(7), "L007");
        assert_eq!(Level::System.format_id(1000), "S1000");
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("ai".parse::<Source>().unwrap(), Source::Ai);
        assert_eq!(
            "preference".parse::<LessonType>().unwrap(),
            LessonType::Preference
        );
        assert!("robot".parse::<Source>().is_err());
    }
}
