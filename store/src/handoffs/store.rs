//! Handoff lifecycle manager
//!
//! Active handoffs live in `HANDOFFS.md`, archived ones in
//! `HANDOFFS_ARCHIVE.md`. Archiving writes the archive copy first and then
//! removes the active record, so a crash in between duplicates a handoff
//! rather than losing it.

use super::model::{
    Handoff, HandoffContext, HandoffPhase, HandoffStatus, TriedOutcome, TriedStep,
    check_handoff_id, derive_handoff_id,
};
use super::sessions::SessionLinks;
use crate::config::{HandoffPolicy, RecallConfig};
use crate::errors::{RecallError, Result};
use crate::format::{Document, single_line};
use crate::lock::LockedFile;
use crate::paths::Paths;
use crate::{Clock, system_clock};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const ACTIVE_PREAMBLE: &str = "\
# HANDOFFS.md - Active Work

> Track ongoing work with tried steps and next steps.
> Reference handoffs with [hf-xxxxxxx].

## Active Handoffs

";

const ARCHIVE_PREAMBLE: &str = "\
# HANDOFFS_ARCHIVE.md

## Archived Handoffs

";

// ─────────────────────────────────────────────────────────────────────────────
// Inputs and results
// ─────────────────────────────────────────────────────────────────────────────

/// Input to [`HandoffStore::create`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewHandoff {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub phase: Option<HandoffPhase>,
    #[serde(default)]
    pub agent: Option<String>,
}

impl NewHandoff {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn phase(mut self, phase: HandoffPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Field-by-field update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HandoffPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<HandoffStatus>,
    pub phase: Option<HandoffPhase>,
    pub agent: Option<String>,
    pub files: Option<Vec<String>>,
    pub checkpoint: Option<String>,
    pub blocked_by: Option<Vec<String>>,
    pub next_steps: Option<Vec<String>>,
    /// Appended to the tried log
    pub tried: Option<TriedStep>,
    pub context: Option<HandoffContext>,
}

impl HandoffPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.phase.is_none()
            && self.agent.is_none()
            && self.files.is_none()
            && self.checkpoint.is_none()
            && self.blocked_by.is_none()
            && self.next_steps.is_none()
            && self.tried.is_none()
            && self.context.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// One item of an external todo list mirrored into a handoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

/// Lesson candidate produced by a [`CompletionHook`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSuggestion {
    pub title: String,
    pub content: String,
}

/// Called after a handoff is marked completed; extraction lives outside
/// this crate
pub trait CompletionHook: Send + Sync {
    fn on_complete(&self, handoff: &Handoff) -> Vec<LessonSuggestion>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffCompleted {
    pub handoff: Handoff,
    pub suggestions: Vec<LessonSuggestion>,
}

/// Selection for [`HandoffStore::list`]
#[derive(Debug, Clone, Default)]
pub struct HandoffFilter {
    pub status: Option<HandoffStatus>,
    /// Completed handoffs are hidden unless this is set or the status
    /// filter asks for them
    pub include_completed: bool,
}

impl HandoffFilter {
    fn matches(&self, handoff: &Handoff) -> bool {
        if let Some(status) = self.status {
            return handoff.status == status;
        }
        self.include_completed || !handoff.is_completed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HandoffStore
// ─────────────────────────────────────────────────────────────────────────────

/// Handoff operations over the active file, the archive and session links
#[derive(Clone)]
pub struct HandoffStore {
    active: LockedFile,
    archive: LockedFile,
    sessions: SessionLinks,
    policy: HandoffPolicy,
    clock: Clock,
    hook: Option<Arc<dyn CompletionHook>>,
}

impl HandoffStore {
    pub fn new(config: &RecallConfig, paths: &Paths) -> Self {
        let lock = &config.lock;
        Self {
            active: LockedFile::new(paths.handoffs(), lock.clone()),
            archive: LockedFile::new(paths.handoffs_archive(), lock.clone()),
            sessions: SessionLinks::new(LockedFile::new(paths.session_links(), lock.clone())),
            policy: config.handoffs.clone(),
            clock: system_clock(),
            hook: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn read_active(&self) -> Result<Document<Handoff>> {
        self.active.read_document(ACTIVE_PREAMBLE)
    }

    fn read_archive(&self) -> Result<Document<Handoff>> {
        self.archive.read_document(ARCHIVE_PREAMBLE)
    }

    /// Create a handoff with a fresh identifier
    pub fn create(&self, new: NewHandoff) -> Result<Handoff> {
        let title = single_line(&new.title);
        if title.is_empty() {
            return Err(RecallError::invalid_format(new.title, "non-empty title"));
        }

        let now = self.now();
        let archived: HashSet<String> = self
            .read_archive()?
            .records
            .into_iter()
            .map(|h| h.id)
            .collect();

        let handoff = self
            .active
            .update_document(ACTIVE_PREAMBLE, |doc: &mut Document<Handoff>| {
                let stamp = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
                let id = (0u32..)
                    .map(|attempt| {
                        derive_handoff_id(
                            &title,
                            &format!("{stamp}:{}:{attempt}", std::process::id()),
                        )
                    })
                    .find(|id| doc.find(id).is_none() && !archived.contains(id))
                    .ok_or_else(|| {
                        RecallError::invalid_format(&title, "title with a free identifier")
                    })?;

                let mut handoff = Handoff::new(id, title.clone(), now.date_naive());
                handoff.description = new.description;
                handoff.files = clean_items(new.files, single_line);
                if let Some(phase) = new.phase {
                    handoff.phase = phase;
                }
                if let Some(agent) = new.agent.as_deref().map(single_line)
                    && !agent.is_empty()
                {
                    handoff.agent = agent;
                }

                doc.records.push(handoff.clone());
                Ok(handoff)
            })?;

        tracing::info!(id = %handoff.id, title = %handoff.title, "handoff created");
        Ok(handoff)
    }

    /// Fetch an active handoff
    pub fn get(&self, id: &str) -> Result<Handoff> {
        check_handoff_id(id)?;
        self.read_active()?
            .records
            .into_iter()
            .find(|h| h.id == id)
            .ok_or_else(|| RecallError::not_found(id))
    }

    /// Fetch an archived handoff
    pub fn get_archived(&self, id: &str) -> Result<Handoff> {
        check_handoff_id(id)?;
        self.read_archive()?
            .records
            .into_iter()
            .find(|h| h.id == id)
            .ok_or_else(|| RecallError::not_found(id))
    }

    /// Apply a patch and refresh the update date
    pub fn update(&self, id: &str, patch: HandoffPatch) -> Result<Handoff> {
        check_handoff_id(id)?;
        let blocked_by = patch
            .blocked_by
            .clone()
            .map(|ids| clean_blocked_by(id, ids))
            .transpose()?;
        let title = match patch.title.as_deref().map(single_line) {
            Some(t) if t.is_empty() => {
                return Err(RecallError::invalid_format("", "non-empty title"));
            }
            other => other,
        };
        let today = self.today();
        let max_tried = self.policy.max_tried_steps;

        let updated = self
            .active
            .update_document(ACTIVE_PREAMBLE, |doc: &mut Document<Handoff>| {
                let handoff = doc.find_mut(id).ok_or_else(|| RecallError::not_found(id))?;
                apply_patch(handoff, patch, title, blocked_by, max_tried);
                handoff.updated = today;
                Ok(handoff.clone())
            })?;

        tracing::debug!(id, status = %updated.status, "handoff updated");
        Ok(updated)
    }

    pub fn set_status(&self, id: &str, status: HandoffStatus) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                status: Some(status),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_phase(&self, id: &str, phase: HandoffPhase) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                phase: Some(phase),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_agent(&self, id: &str, agent: &str) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                agent: Some(agent.to_string()),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_description(&self, id: &str, description: &str) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                description: Some(description.to_string()),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_checkpoint(&self, id: &str, checkpoint: &str) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                checkpoint: Some(checkpoint.to_string()),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_files(&self, id: &str, files: Vec<String>) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                files: Some(files),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_blocked_by(&self, id: &str, blocked_by: Vec<String>) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                blocked_by: Some(blocked_by),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_next_steps(&self, id: &str, next_steps: Vec<String>) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                next_steps: Some(next_steps),
                ..HandoffPatch::default()
            },
        )
    }

    pub fn set_context(&self, id: &str, context: HandoffContext) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                context: Some(context),
                ..HandoffPatch::default()
            },
        )
    }

    /// Append to the tried log
    pub fn add_tried(&self, id: &str, outcome: TriedOutcome, description: &str) -> Result<Handoff> {
        self.update(
            id,
            HandoffPatch {
                tried: Some(TriedStep {
                    outcome,
                    description: description.to_string(),
                }),
                ..HandoffPatch::default()
            },
        )
    }

    /// Mirror an external todo list: finished items become successful tried
    /// steps, the in-progress item becomes the checkpoint, pending items
    /// replace the next steps.
    pub fn sync_todos(&self, id: &str, todos: &[TodoItem]) -> Result<Handoff> {
        check_handoff_id(id)?;
        let today = self.today();
        let max_tried = self.policy.max_tried_steps;

        let updated = self
            .active
            .update_document(ACTIVE_PREAMBLE, |doc: &mut Document<Handoff>| {
                let handoff = doc.find_mut(id).ok_or_else(|| RecallError::not_found(id))?;

                for todo in todos.iter().filter(|t| t.status == TodoStatus::Completed) {
                    let description = todo.content.trim();
                    let already_logged = handoff.tried.iter().any(|step| {
                        step.outcome == TriedOutcome::Success && step.description == description
                    });
                    if !description.is_empty() && !already_logged {
                        handoff.tried.push(TriedStep {
                            outcome: TriedOutcome::Success,
                            description: description.to_string(),
                        });
                    }
                }
                cap_tried(handoff, max_tried);

                if let Some(current) = todos.iter().find(|t| t.status == TodoStatus::InProgress) {
                    handoff.checkpoint = current.content.trim().to_string();
                    if handoff.status == HandoffStatus::NotStarted {
                        handoff.status = HandoffStatus::InProgress;
                    }
                }

                handoff.next_steps = clean_items(
                    todos
                        .iter()
                        .filter(|t| t.status == TodoStatus::Pending)
                        .map(|t| t.content.clone()),
                    |s| s.trim().to_string(),
                );
                handoff.updated = today;
                Ok(handoff.clone())
            })?;

        tracing::debug!(id, todos = todos.len(), "todos synced into handoff");
        Ok(updated)
    }

    /// Mark completed and run the completion hook
    pub fn complete(&self, id: &str) -> Result<HandoffCompleted> {
        let handoff = self.set_status(id, HandoffStatus::Completed)?;
        let suggestions = self
            .hook
            .as_ref()
            .map(|hook| hook.on_complete(&handoff))
            .unwrap_or_default();

        tracing::info!(id, suggestions = suggestions.len(), "handoff completed");
        Ok(HandoffCompleted {
            handoff,
            suggestions,
        })
    }

    /// Move a handoff to the archive
    pub fn archive(&self, id: &str) -> Result<Handoff> {
        let handoff = self.get(id)?;
        let moved = self.move_to_archive(vec![handoff], |_| true)?;
        moved
            .into_iter()
            .next()
            .ok_or_else(|| RecallError::not_found(id))
    }

    /// Archive completed handoffs not updated for `archive_after_days`
    pub fn archive_stale_completed(&self) -> Result<Vec<String>> {
        let today = self.today();
        let max_age = self.policy.archive_after_days;
        let is_stale =
            |h: &Handoff| h.is_completed() && (today - h.updated).num_days() >= max_age;
        let stale: Vec<Handoff> = self
            .read_active()?
            .records
            .into_iter()
            .filter(|h| is_stale(h))
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }
        let moved = self.move_to_archive(stale, is_stale)?;
        Ok(moved.into_iter().map(|h| h.id).collect())
    }

    /// Archive first, then take the current records out of the active file.
    ///
    /// `snapshot` is what the caller read before either lock was held. Only
    /// records still present and still satisfying `qualifies` under the
    /// active lock are moved, and the archive is reconciled to hold exactly
    /// those current versions.
    fn move_to_archive(
        &self,
        snapshot: Vec<Handoff>,
        qualifies: impl Fn(&Handoff) -> bool,
    ) -> Result<Vec<Handoff>> {
        self.archive
            .update_document(ARCHIVE_PREAMBLE, |doc: &mut Document<Handoff>| {
                for handoff in &snapshot {
                    upsert(doc, handoff.clone());
                }
                Ok(())
            })?;

        let moved = self
            .active
            .update_document(ACTIVE_PREAMBLE, |doc: &mut Document<Handoff>| {
                let mut moved = Vec::with_capacity(snapshot.len());
                for handoff in &snapshot {
                    if doc.find(&handoff.id).is_some_and(&qualifies) {
                        moved.extend(doc.remove(&handoff.id));
                    }
                }
                Ok(moved)
            })?;

        let withdrawn: Vec<&Handoff> = snapshot
            .iter()
            .filter(|s| !moved.iter().any(|m| m.id == s.id))
            .collect();
        let changed: Vec<&Handoff> = moved.iter().filter(|m| !snapshot.contains(m)).collect();
        if !withdrawn.is_empty() || !changed.is_empty() {
            self.archive
                .update_document(ARCHIVE_PREAMBLE, |doc: &mut Document<Handoff>| {
                    for handoff in &withdrawn {
                        // Leave an older archived copy alone
                        if doc.find(&handoff.id) == Some(*handoff) {
                            doc.remove(&handoff.id);
                        }
                    }
                    for handoff in &changed {
                        upsert(doc, (*handoff).clone());
                    }
                    Ok(())
                })?;
            tracing::debug!(
                withdrawn = withdrawn.len(),
                changed = changed.len(),
                "archive reconciled with active file"
            );
        }

        let ids: Vec<String> = moved.iter().map(|h| h.id.clone()).collect();
        if !ids.is_empty() {
            self.drop_links(&ids);
        }
        for id in &ids {
            tracing::info!(id = %id, "handoff archived");
        }
        Ok(moved)
    }

    /// Remove a handoff and any session links to it
    pub fn delete(&self, id: &str) -> Result<Handoff> {
        check_handoff_id(id)?;
        let removed = self
            .active
            .update_document(ACTIVE_PREAMBLE, |doc: &mut Document<Handoff>| {
                doc.remove(id).ok_or_else(|| RecallError::not_found(id))
            })?;

        self.drop_links(&[removed.id.clone()]);
        tracing::info!(id, "handoff deleted");
        Ok(removed)
    }

    /// Active handoffs in file order
    pub fn list(&self, filter: &HandoffFilter) -> Result<Vec<Handoff>> {
        Ok(self
            .read_active()?
            .records
            .into_iter()
            .filter(|h| filter.matches(h))
            .collect())
    }

    pub fn list_archived(&self) -> Result<Vec<Handoff>> {
        Ok(self.read_archive()?.records)
    }

    /// Open, unblocked handoffs whose every prerequisite is completed.
    ///
    /// Prerequisites resolve against both the active file and the archive;
    /// an identifier found in neither keeps the handoff waiting.
    pub fn ready(&self) -> Result<Vec<Handoff>> {
        let active = self.read_active()?.records;
        let completed: HashSet<String> = active
            .iter()
            .chain(self.read_archive()?.records.iter())
            .filter(|h| h.is_completed())
            .map(|h| h.id.clone())
            .collect();

        Ok(active
            .into_iter()
            .filter(|h| !h.is_completed() && h.status != HandoffStatus::Blocked)
            .filter(|h| h.blocked_by.iter().all(|dep| completed.contains(dep)))
            .collect())
    }

    /// Associate an external session with an active handoff
    pub fn link_session(&self, session_id: &str, id: &str) -> Result<()> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(RecallError::invalid_format(session_id, "non-empty session id"));
        }
        self.get(id)?;
        self.sessions.link(session_id, id, self.now())?;
        tracing::debug!(session_id, id, "session linked");
        Ok(())
    }

    /// Forget a session; returns the handoff it pointed at
    pub fn unlink_session(&self, session_id: &str) -> Result<Option<String>> {
        self.sessions.unlink(session_id.trim())
    }

    /// The active handoff a session is linked to, if any
    pub fn handoff_for_session(&self, session_id: &str) -> Result<Option<Handoff>> {
        let Some(link) = self.sessions.get(session_id.trim())? else {
            return Ok(None);
        };
        match self.get(&link.handoff) {
            Ok(handoff) => Ok(Some(handoff)),
            Err(RecallError::NotFound { .. }) | Err(RecallError::InvalidFormat { .. }) => {
                tracing::debug!(
                    session_id,
                    handoff = %link.handoff,
                    "session link points at a missing handoff"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn drop_links(&self, ids: &[String]) {
        match self.sessions.remove_handoffs(ids) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "session links dropped"),
            Err(e) => tracing::warn!(error = %e, "failed to drop session links"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn apply_patch(
    handoff: &mut Handoff,
    patch: HandoffPatch,
    title: Option<String>,
    blocked_by: Option<Vec<String>>,
    max_tried: Option<usize>,
) {
    if let Some(title) = title {
        handoff.title = title;
    }
    if let Some(description) = patch.description {
        handoff.description = description;
    }
    if let Some(status) = patch.status {
        handoff.status = status;
    }
    if let Some(phase) = patch.phase {
        handoff.phase = phase;
    }
    if let Some(agent) = patch.agent.as_deref().map(single_line)
        && !agent.is_empty()
    {
        handoff.agent = agent;
    }
    if let Some(files) = patch.files {
        handoff.files = clean_items(files, single_line);
    }
    if let Some(checkpoint) = patch.checkpoint {
        handoff.checkpoint = checkpoint;
    }
    if let Some(blocked_by) = blocked_by {
        handoff.blocked_by = blocked_by;
    }
    if let Some(next_steps) = patch.next_steps {
        handoff.next_steps = clean_items(next_steps, |s| s.trim().to_string());
    }
    if let Some(step) = patch.tried {
        handoff.tried.push(step);
        cap_tried(handoff, max_tried);
    }
    if let Some(context) = patch.context {
        handoff.context = Some(context);
    }
}

/// Drop the oldest tried steps above the cap
fn upsert(doc: &mut Document<Handoff>, handoff: Handoff) {
    match doc.find_mut(&handoff.id) {
        Some(existing) => *existing = handoff,
        None => doc.records.push(handoff),
    }
}

fn cap_tried(handoff: &mut Handoff, max_tried: Option<usize>) {
    if let Some(max) = max_tried
        && handoff.tried.len() > max
    {
        let excess = handoff.tried.len() - max;
        handoff.tried.drain(..excess);
    }
}

fn clean_items<I, S>(items: I, clean: impl Fn(&str) -> String) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| clean(item.as_ref()))
        .filter(|item| !item.is_empty())
        .collect()
}

/// Validate, dedupe and reject self-references
fn clean_blocked_by(id: &str, ids: Vec<String>) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(ids.len());
    for dep in ids {
        let dep = dep.trim().to_string();
        check_handoff_id(&dep)?;
        if dep == id {
            return Err(RecallError::invalid_format(dep, "a different handoff id"));
        }
        if seen.insert(dep.clone()) {
            out.push(dep);
        }
    }
    Ok(out)
}
