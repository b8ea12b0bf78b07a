//! Handoff record types

use crate::errors::{RecallError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const ID_PREFIX: &str = "hf-";
const ID_HEX_LEN: usize = 7;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = RecallError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(RecallError::invalid_format(
                        other,
                        [$($text),+].join("|"),
                    )),
                }
            }
        }
    };
}

string_enum! {
    /// Work status; no transition graph is enforced
    pub enum HandoffStatus {
        NotStarted => "not_started",
        InProgress => "in_progress",
        Blocked => "blocked",
        ReadyForReview => "ready_for_review",
        Completed => "completed",
    }
}

string_enum! {
    pub enum HandoffPhase {
        Research => "research",
        Planning => "planning",
        Implementing => "implementing",
        Review => "review",
    }
}

string_enum! {
    pub enum TriedOutcome {
        Success => "success",
        Fail => "fail",
        Partial => "partial",
    }
}

/// One entry of the append-only tried log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriedStep {
    pub outcome: TriedOutcome,
    pub description: String,
}

/// Enriched context captured at a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffContext {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub critical_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_changes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub learnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

/// A work-in-progress task record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: HandoffStatus,
    pub phase: HandoffPhase,
    pub agent: String,
    pub created: NaiveDate,
    pub updated: NaiveDate,
    pub files: Vec<String>,
    pub tried: Vec<TriedStep>,
    pub next_steps: Vec<String>,
    pub checkpoint: String,
    pub blocked_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HandoffContext>,
}

impl Handoff {
    pub fn new(id: String, title: String, today: NaiveDate) -> Self {
        Self {
            id,
            title,
            description: String::new(),
            status: HandoffStatus::NotStarted,
            phase: HandoffPhase::Research,
            agent: DEFAULT_AGENT.to_string(),
            created: today,
            updated: today,
            files: Vec::new(),
            tried: Vec::new(),
            next_steps: Vec::new(),
            checkpoint: String::new(),
            blocked_by: Vec::new(),
            context: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == HandoffStatus::Completed
    }
}

pub const DEFAULT_AGENT: &str = "user";

/// `hf-` followed by seven lowercase hex digits
pub fn is_handoff_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX).is_some_and(|hex| {
        hex.len() == ID_HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    })
}

/// Validate a caller-supplied handoff identifier
pub fn check_handoff_id(id: &str) -> Result<()> {
    if is_handoff_id(id) {
        Ok(())
    } else {
        Err(RecallError::invalid_format(id, "hf-xxxxxxx"))
    }
}

/// Derive an identifier from the title and a uniqueness seed
pub fn derive_handoff_id(title: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0]);
    hasher.update(seed.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{ID_PREFIX}{}", &digest[..ID_HEX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        for status in HandoffStatus::ALL {
            assert_eq!(status.as_str().parse::<HandoffStatus>().unwrap(), *status);
        }
        let err = "done".parse::<HandoffStatus>().unwrap_err();
        assert!(err.to_string().contains("ready_for_review"));
    }

    #[test]
    fn test_handoff_id_grammar() {
        assert!(is_handoff_id("hf-0a1b2c3"));
        assert!(!is_handoff_id("hf-0A1B2C3"));
        assert!(!is_handoff_id("hf-0a1b2c"));
        assert!(!is_handoff_id("L001"));
        assert!(check_handoff_id("nope").is_err());
    }

    #[test]
    fn test_derive_handoff_id_is_stable_and_seeded() {
        let a = derive_handoff_id("Fix login", "1");
        assert_eq!(a, derive_handoff_id("Fix login", "1"));
        assert_ne!(a, derive_handoff_id("Fix login", "2"));
        assert!(is_handoff_id(&a));
    }
}
