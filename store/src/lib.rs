//! Recall knowledge store
//!
//! Durable, concurrency-safe storage for an AI coding assistant's lessons
//! (reusable knowledge reinforced by citation) and handoffs (work-in-progress
//! task records), kept as hand-editable plain text.
//!
//! This crate provides:
//! - A lenient round-trip text format for record blocks (`format`)
//! - Cross-process advisory locking around whole-file rewrites (`lock`)
//! - The lesson lifecycle: add, cite, edit, delete, promote, decay, evict
//! - The handoff lifecycle with dependency tracking, archive and batches
//! - A local BM25 relevance engine over lessons (`relevance`)
//!
//! No subscriber is installed and nothing is printed; front ends own output.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod errors;
pub mod format;
pub mod handoffs;
pub mod lessons;
pub mod lock;
pub mod paths;
pub mod relevance;
pub mod render;

pub use config::{HandoffPolicy, LessonPolicy, LockPolicy, RecallConfig};
pub use errors::{ErrorCategory, RecallError, Result};
pub use handoffs::{
    BatchReport, CompletionHook, Handoff, HandoffCompleted, HandoffFilter, HandoffOp,
    HandoffPatch, HandoffPhase, HandoffStatus, HandoffStore, NewHandoff, TriedOutcome,
};
pub use lessons::{
    CitationResult, DecayReport, Lesson, LessonAdded, LessonFilter, LessonStore, Level,
    NewLesson, PromotionResult,
};
pub use paths::{Migration, Paths};
pub use relevance::{Bm25Index, ScoredLesson};
pub use render::{Outcome, OutputFormat, RankedLessons, Render};

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Recall store version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Time source shared by the stores
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall-clock time
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Top-level store: lessons and handoffs as independent collaborators
#[derive(Clone)]
pub struct Recall {
    config: RecallConfig,
    paths: Paths,
    lessons: LessonStore,
    handoffs: HandoffStore,
}

impl Recall {
    /// Load config, resolve paths from the environment and migrate legacy
    /// files
    pub fn from_env() -> Result<Self> {
        let config = RecallConfig::load()?;
        let paths = Paths::from_env(&config)?;

        match paths.migrate_legacy(&config) {
            Ok(moved) if !moved.is_empty() => {
                tracing::info!(files = moved.len(), "migrated legacy recall files");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "legacy file migration failed"),
        }

        Ok(Self::open(config, paths))
    }

    /// Build from an explicit config and paths
    pub fn open(config: RecallConfig, paths: Paths) -> Self {
        let lessons = LessonStore::new(&config, &paths);
        let handoffs = HandoffStore::new(&config, &paths);

        tracing::debug!(
            version = VERSION,
            state_dir = %paths.state_dir.display(),
            project_root = %paths.project_root.display(),
            "recall store opened"
        );

        Self {
            config,
            paths,
            lessons,
            handoffs,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.lessons = self.lessons.with_clock(Arc::clone(&clock));
        self.handoffs = self.handoffs.with_clock(clock);
        self
    }

    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.handoffs = self.handoffs.with_completion_hook(hook);
        self
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn lessons(&self) -> &LessonStore {
        &self.lessons
    }

    pub fn handoffs(&self) -> &HandoffStore {
        &self.handoffs
    }

    /// Rank lessons from both scopes against `query`
    pub fn relevance(&self, query: &str, limit: usize, min_score: u8) -> Result<RankedLessons> {
        let lessons = self.lessons.all()?;
        let results = Bm25Index::new(&lessons).top(query, limit, min_score);

        tracing::debug!(
            query,
            candidates = lessons.len(),
            hits = results.len(),
            "relevance ranked"
        );
        Ok(RankedLessons {
            query: query.to_string(),
            results,
        })
    }
}
