//! Batch entry point
//!
//! Applies a sequence of heterogeneous operations in order. Each operation
//! is its own locked transaction; a failure is recorded and the batch moves
//! on.

use super::model::TriedOutcome;
use super::store::{HandoffPatch, HandoffStore, LessonSuggestion, NewHandoff, TodoItem};
use crate::errors::{RecallError, Result};
use serde::{Deserialize, Serialize};

/// One batch operation, tagged by `op` in JSON
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HandoffOp {
    Create(NewHandoff),
    Update {
        id: String,
        patch: HandoffPatch,
    },
    AddTried {
        id: String,
        outcome: TriedOutcome,
        description: String,
    },
    SyncTodos {
        id: String,
        todos: Vec<TodoItem>,
    },
    Complete {
        id: String,
    },
    Archive {
        id: String,
    },
    Delete {
        id: String,
    },
    LinkSession {
        session_id: String,
        id: String,
    },
    UnlinkSession {
        session_id: String,
    },
}

impl HandoffOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update { .. } => "update",
            Self::AddTried { .. } => "add_tried",
            Self::SyncTodos { .. } => "sync_todos",
            Self::Complete { .. } => "complete",
            Self::Archive { .. } => "archive",
            Self::Delete { .. } => "delete",
            Self::LinkSession { .. } => "link_session",
            Self::UnlinkSession { .. } => "unlink_session",
        }
    }
}

/// Why one batch operation failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&RecallError> for BatchFailure {
    fn from(err: &RecallError) -> Self {
        Self {
            code: err.category().as_str(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub op: &'static str,
    /// Handoff the operation touched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<LessonSuggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchFailure>,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-operation results, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

#[derive(Default)]
struct Applied {
    id: Option<String>,
    suggestions: Vec<LessonSuggestion>,
}

impl Applied {
    fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            suggestions: Vec::new(),
        }
    }
}

impl HandoffStore {
    /// Apply every operation; never short-circuits
    pub fn batch(&self, ops: Vec<HandoffOp>) -> BatchReport {
        let mut report = BatchReport::default();

        for op in ops {
            let name = op.name();
            let item = match self.apply(op) {
                Ok(applied) => BatchItem {
                    op: name,
                    id: applied.id,
                    suggestions: applied.suggestions,
                    error: None,
                },
                Err(err) => {
                    tracing::warn!(op = name, error = %err, "batch operation failed");
                    BatchItem {
                        op: name,
                        id: None,
                        suggestions: Vec::new(),
                        error: Some(BatchFailure::from(&err)),
                    }
                }
            };
            report.items.push(item);
        }

        tracing::debug!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "handoff batch applied"
        );
        report
    }

    /// Parse a JSON array of operations and apply it
    pub fn batch_json(&self, json: &str) -> Result<BatchReport> {
        let ops: Vec<HandoffOp> = serde_json::from_str(json)
            .map_err(|e| RecallError::serialization_with_source("invalid batch operations", e))?;
        Ok(self.batch(ops))
    }

    fn apply(&self, op: HandoffOp) -> Result<Applied> {
        match op {
            HandoffOp::Create(new) => Ok(Applied::id(self.create(new)?.id)),
            HandoffOp::Update { id, patch } => Ok(Applied::id(self.update(&id, patch)?.id)),
            HandoffOp::AddTried {
                id,
                outcome,
                description,
            } => Ok(Applied::id(self.add_tried(&id, outcome, &description)?.id)),
            HandoffOp::SyncTodos { id, todos } => Ok(Applied::id(self.sync_todos(&id, &todos)?.id)),
            HandoffOp::Complete { id } => {
                let done = self.complete(&id)?;
                Ok(Applied {
                    id: Some(done.handoff.id),
                    suggestions: done.suggestions,
                })
            }
            HandoffOp::Archive { id } => Ok(Applied::id(self.archive(&id)?.id)),
            HandoffOp::Delete { id } => Ok(Applied::id(self.delete(&id)?.id)),
            HandoffOp::LinkSession { session_id, id } => {
                self.link_session(&session_id, &id)?;
                Ok(Applied::id(id))
            }
            HandoffOp::UnlinkSession { session_id } => Ok(Applied {
                id: self.unlink_session(&session_id)?,
                suggestions: Vec::new(),
            }),
        }
    }
}
