//! Handoffs: record model, lifecycle manager, session links and batches

mod batch;
mod model;
mod sessions;
mod store;

pub use batch::{BatchFailure, BatchItem, BatchReport, HandoffOp};
pub use model::{
    DEFAULT_AGENT, Handoff, HandoffContext, HandoffPhase, HandoffStatus, ID_PREFIX, TriedOutcome,
    TriedStep, check_handoff_id, derive_handoff_id, is_handoff_id,
};
pub use sessions::SessionLink;
pub use store::{
    CompletionHook, HandoffCompleted, HandoffFilter, HandoffPatch, HandoffStore, LessonSuggestion,
    NewHandoff, TodoItem, TodoStatus,
};
