//! Lesson lifecycle manager
//!
//! Every operation is one locked read-modify-write cycle on one scope file.
//! Promotion touches both scopes as two separate cycles: the system copy is
//! appended first, then the project original is removed. A crash in between
//! leaves the lesson in both files, never in neither.

use super::model::{Lesson, LessonType, Level, Source, parse_lesson_id};
use crate::config::{LessonPolicy, RecallConfig};
use crate::errors::{RecallError, Result};
use crate::format::{Document, single_line};
use crate::lock::LockedFile;
use crate::paths::Paths;
use crate::{Clock, system_clock};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Highest number ever allocated in a scope file
const LAST_ID_DIRECTIVE: &str = "last-id";
/// When a sweep last decayed a scope file
const DECAYED_AT_DIRECTIVE: &str = "decayed-at";
const DEFAULT_CATEGORY: &str = "pattern";
/// Substring duplicate matching applies only above this many characters
const SUBSTRING_MIN_CHARS: usize = 10;

const PROJECT_PREAMBLE: &str = "\
# LESSONS.md - Project Level

> **Lesson System**: Cite lessons with [L###] when applying them.
> Stars: uses (left) | velocity (right)

## Active Lessons

";

const SYSTEM_PREAMBLE: &str = "\
# LESSONS.md - System Level

> **Lesson System**: Cite lessons with [S###] when applying them.
> Stars: uses (left) | velocity (right)

## Active Lessons

";

fn preamble(level: Level) -> &'static str {
    match level {
        Level::Project => PROJECT_PREAMBLE,
        Level::System => SYSTEM_PREAMBLE,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs and results
// ─────────────────────────────────────────────────────────────────────────────

/// Input to [`LessonStore::add`]
#[derive(Debug, Clone)]
pub struct NewLesson {
    pub level: Level,
    pub title: String,
    pub content: String,
    pub category: String,
    pub source: Source,
    pub promotable: bool,
    pub lesson_type: Option<LessonType>,
    /// Skip the duplicate check
    pub force: bool,
}

impl NewLesson {
    pub fn new(level: Level, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            content: content.into(),
            category: DEFAULT_CATEGORY.to_string(),
            source: Source::Human,
            promotable: true,
            lesson_type: None,
            force: false,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn lesson_type(mut self, lesson_type: LessonType) -> Self {
        self.lesson_type = Some(lesson_type);
        self
    }

    pub fn promotable(mut self, promotable: bool) -> Self {
        self.promotable = promotable;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonAdded {
    pub id: String,
    pub level: Level,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationResult {
    pub id: String,
    pub uses: u32,
    pub velocity: f64,
    /// Project-scoped, promotable and cited at least `promotion_threshold`
    /// times
    pub promotion_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionResult {
    pub from: String,
    pub to: String,
}

/// Outcome of one decay sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecayReport {
    /// No activity since the previous sweep; nothing was touched
    pub skipped: bool,
    /// Lessons whose velocity was reduced
    pub decayed: usize,
    /// Lessons whose use count dropped for staleness
    pub uses_decremented: usize,
    pub evicted: Vec<String>,
}

/// Selection for [`LessonStore::list`]
#[derive(Debug, Clone, Default)]
pub struct LessonFilter {
    /// `None` lists both scopes, project first
    pub level: Option<Level>,
    /// Case-insensitive substring of id, title or content
    pub search: Option<String>,
    /// Exact category match
    pub category: Option<String>,
    /// Only lessons uncited for longer than `stale_days`
    pub stale: bool,
}

impl LessonFilter {
    fn levels(&self) -> Vec<Level> {
        match self.level {
            Some(level) => vec![level],
            None => vec![Level::Project, Level::System],
        }
    }

    fn matches(
        &self,
        lesson: &Lesson,
        needle: Option<&str>,
        today: NaiveDate,
        stale_days: i64,
    ) -> bool {
        if let Some(needle) = needle {
            let hit = lesson.id.to_lowercase().contains(needle)
                || lesson.title.to_lowercase().contains(needle)
                || lesson.content.to_lowercase().contains(needle);
            if !hit {
                return false;
            }
        }
        if let Some(category) = &self.category
            && lesson.category != *category
        {
            return false;
        }
        !self.stale || lesson.days_since_use(today) > stale_days
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LessonStore
// ─────────────────────────────────────────────────────────────────────────────

/// Lesson operations over the project and system scope files
#[derive(Clone)]
pub struct LessonStore {
    project: LockedFile,
    system: LockedFile,
    decay_last_run: LockedFile,
    last_activity: LockedFile,
    policy: LessonPolicy,
    clock: Clock,
}

impl LessonStore {
    pub fn new(config: &RecallConfig, paths: &Paths) -> Self {
        let lock = &config.lock;
        Self {
            project: LockedFile::new(paths.project_lessons(), lock.clone()),
            system: LockedFile::new(paths.system_lessons(), lock.clone()),
            decay_last_run: LockedFile::new(paths.decay_last_run(), lock.clone()),
            last_activity: LockedFile::new(paths.last_activity(), lock.clone()),
            policy: config.lessons.clone(),
            clock: system_clock(),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &LessonPolicy {
        &self.policy
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn file(&self, level: Level) -> &LockedFile {
        match level {
            Level::Project => &self.project,
            Level::System => &self.system,
        }
    }

    fn capacity(&self, level: Level) -> Option<usize> {
        match level {
            Level::Project => self.policy.max_project_lessons,
            Level::System => self.policy.max_system_lessons,
        }
    }

    fn read(&self, level: Level) -> Result<Document<Lesson>> {
        let mut doc = self.file(level).read_document(preamble(level))?;
        confine_to_scope(&mut doc, level);
        Ok(doc)
    }

    /// Locked read-modify-write of one scope file. Blocks carrying the other
    /// scope's id prefix are dropped before `f` sees the document.
    fn update<T>(
        &self,
        level: Level,
        f: impl FnOnce(&mut Document<Lesson>) -> Result<T>,
    ) -> Result<T> {
        self.file(level)
            .update_document(preamble(level), |doc: &mut Document<Lesson>| {
                confine_to_scope(doc, level);
                f(doc)
            })
    }

    /// Add a lesson after the duplicate check; returns the new identifier
    pub fn add(&self, new: NewLesson) -> Result<LessonAdded> {
        let NewLesson {
            level,
            title,
            content,
            category,
            source,
            promotable,
            lesson_type,
            force,
        } = new;

        let title = single_line(&title);
        if title.is_empty() {
            return Err(RecallError::invalid_format(title, "non-empty title"));
        }
        let category = match single_line(&category).replace('|', "/") {
            c if c.is_empty() => DEFAULT_CATEGORY.to_string(),
            c => c,
        };
        let content = content.replace("\r\n", "\n");
        let today = self.today();

        let added = self.update(level, |doc| {
            if !force && let Some(existing) = find_duplicate(&title, &doc.records) {
                return Err(RecallError::Duplicate {
                    title: title.clone(),
                    existing_id: existing.id.clone(),
                });
            }

            let id = allocate_id(doc, level);
            doc.records.push(Lesson {
                id: id.clone(),
                title: title.clone(),
                content,
                category,
                source,
                level,
                uses: 1,
                velocity: 0.0,
                learned: today,
                last_used: today,
                promotable,
                lesson_type,
            });

            Ok(LessonAdded {
                id,
                level,
                title: title.clone(),
            })
        })?;

        tracing::info!(id = %added.id, level = %level, "lesson added");
        self.touch_activity();
        Ok(added)
    }

    /// Record one use of a lesson
    pub fn cite(&self, id: &str) -> Result<CitationResult> {
        let (level, _) = parse_lesson_id(id)?;
        let today = self.today();
        let policy = &self.policy;

        let result = self.update(level, |doc| {
            let lesson = doc.find_mut(id).ok_or_else(|| RecallError::not_found(id))?;
            lesson.uses = lesson.uses.saturating_add(1).min(policy.max_uses);
            lesson.velocity += 1.0;
            lesson.last_used = today;

            Ok(CitationResult {
                id: lesson.id.clone(),
                uses: lesson.uses,
                velocity: lesson.velocity,
                promotion_ready: is_promotion_ready(policy, lesson),
            })
        })?;

        tracing::debug!(id, uses = result.uses, ready = result.promotion_ready, "lesson cited");
        self.touch_activity();
        Ok(result)
    }

    /// Replace a lesson's content
    pub fn edit(&self, id: &str, content: &str) -> Result<()> {
        let (level, _) = parse_lesson_id(id)?;
        let content = content.replace("\r\n", "\n");

        self.update(level, |doc| {
            let lesson = doc.find_mut(id).ok_or_else(|| RecallError::not_found(id))?;
            lesson.content = content;
            Ok(())
        })?;

        tracing::info!(id, "lesson edited");
        self.touch_activity();
        Ok(())
    }

    /// Remove a lesson; its number is never reallocated
    pub fn delete(&self, id: &str) -> Result<Lesson> {
        let (level, _) = parse_lesson_id(id)?;

        let removed = self.update(level, |doc| {
            bump_high_water(doc);
            doc.remove(id).ok_or_else(|| RecallError::not_found(id))
        })?;

        tracing::info!(id, "lesson deleted");
        Ok(removed)
    }

    /// Move a project lesson to the system scope under a new identifier
    pub fn promote(&self, id: &str) -> Result<PromotionResult> {
        let (level, _) = parse_lesson_id(id)?;
        if level != Level::Project {
            return Err(RecallError::invalid_format(id, "project lesson id (L###)"));
        }

        let source = self.get(id)?;

        let to = self.update(Level::System, |doc| {
            let new_id = allocate_id(doc, Level::System);
            let mut promoted = source;
            promoted.id = new_id.clone();
            promoted.level = Level::System;
            doc.records.push(promoted);
            Ok(new_id)
        })?;

        let removed = self.update(Level::Project, |doc| {
            bump_high_water(doc);
            Ok(doc.remove(id).is_some())
        })?;
        if !removed {
            tracing::warn!(id, "promoted lesson was already gone from the project scope");
        }

        tracing::info!(from = id, to = %to, "lesson promoted");
        Ok(PromotionResult {
            from: id.to_string(),
            to,
        })
    }

    pub fn get(&self, id: &str) -> Result<Lesson> {
        let (level, _) = parse_lesson_id(id)?;
        self.read(level)?
            .records
            .into_iter()
            .find(|lesson| lesson.id == id)
            .ok_or_else(|| RecallError::not_found(id))
    }

    /// Lessons in file order, project scope first
    pub fn list(&self, filter: &LessonFilter) -> Result<Vec<Lesson>> {
        let today = self.today();
        let needle = filter.search.as_deref().map(str::to_lowercase);

        let mut lessons = Vec::new();
        for level in filter.levels() {
            let doc = self.read(level)?;
            lessons.extend(doc.records.into_iter().filter(|lesson| {
                filter.matches(lesson, needle.as_deref(), today, self.policy.stale_days)
            }));
        }
        Ok(lessons)
    }

    /// Both scopes, unfiltered
    pub fn all(&self) -> Result<Vec<Lesson>> {
        self.list(&LessonFilter::default())
    }

    /// Most-used lessons first, then fastest, then by id
    pub fn top(&self, limit: usize) -> Result<Vec<Lesson>> {
        let mut lessons = self.all()?;
        lessons.sort_by(|a, b| {
            b.uses
                .cmp(&a.uses)
                .then_with(|| b.velocity.total_cmp(&a.velocity))
                .then_with(|| compare_ids(&a.id, &b.id))
        });
        lessons.truncate(limit);
        Ok(lessons)
    }

    /// Age velocity and stale use counts in both scopes, then evict.
    ///
    /// Skipped when a previous sweep exists and no activity was recorded
    /// after it. The sweep-timestamp lock is held for the whole sweep so
    /// concurrent sweeps serialize.
    ///
    /// Each scope file is stamped with `decayed-at` in the same write as its
    /// decay. A scope stamped after the last completed sweep was already
    /// decayed by a sweep that failed later on, so a retry only evicts it.
    pub fn decay(&self) -> Result<DecayReport> {
        let now = self.now();
        let today = now.date_naive();

        self.decay_last_run.update_text(|last_run| {
            let last_run = last_run.as_deref().and_then(parse_timestamp);
            if let Some(last_run) = last_run {
                let activity = self
                    .last_activity
                    .read_text()?
                    .as_deref()
                    .and_then(parse_timestamp);
                if activity.is_none_or(|at| at <= last_run) {
                    tracing::info!(%last_run, "no activity since last decay sweep; skipping");
                    return Ok((
                        None,
                        DecayReport {
                            skipped: true,
                            ..DecayReport::default()
                        },
                    ));
                }
            }

            let mut report = DecayReport::default();
            for level in [Level::Project, Level::System] {
                let capacity = self.capacity(level);
                self.update(level, |doc| {
                    let decayed_at = doc.directive(DECAYED_AT_DIRECTIVE).and_then(parse_timestamp);
                    let already_decayed = match (decayed_at, last_run) {
                        (Some(at), Some(last_run)) => at > last_run,
                        (Some(_), None) => true,
                        (None, _) => false,
                    };

                    if already_decayed {
                        tracing::debug!(
                            level = %level,
                            "scope already decayed by an unfinished sweep"
                        );
                    } else if !doc.records.is_empty() {
                        for lesson in &mut doc.records {
                            decay_lesson(&self.policy, lesson, today, &mut report);
                        }
                        doc.set_directive(DECAYED_AT_DIRECTIVE, timestamp(now));
                    }

                    if let Some(capacity) = capacity {
                        report.evicted.extend(evict_in(doc, capacity));
                    }
                    Ok(())
                })?;
            }

            tracing::info!(
                decayed = report.decayed,
                uses_decremented = report.uses_decremented,
                evicted = report.evicted.len(),
                "decay sweep finished"
            );
            Ok((Some(format_timestamp(now)), report))
        })
    }

    /// Enforce per-scope capacity, least recently used first
    pub fn evict(&self) -> Result<Vec<String>> {
        let mut evicted = Vec::new();
        for level in [Level::Project, Level::System] {
            let Some(capacity) = self.capacity(level) else {
                continue;
            };
            let removed = self.update(level, |doc| Ok(evict_in(doc, capacity)))?;
            evicted.extend(removed);
        }
        Ok(evicted)
    }

    /// Mark activity so the next decay sweep runs
    pub fn record_activity(&self) -> Result<()> {
        let stamp = format_timestamp(self.now());
        self.last_activity.update_text(|_| Ok((Some(stamp), ())))
    }

    fn touch_activity(&self) {
        if let Err(e) = self.record_activity() {
            tracing::warn!(error = %e, "failed to record activity marker");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Counts citations, not uses: a new lesson starts at one use
fn is_promotion_ready(policy: &LessonPolicy, lesson: &Lesson) -> bool {
    lesson.level == Level::Project
        && lesson.promotable
        && lesson.uses.saturating_sub(1) >= policy.promotion_threshold
}

fn decay_lesson(
    policy: &LessonPolicy,
    lesson: &mut Lesson,
    today: NaiveDate,
    report: &mut DecayReport,
) {
    if lesson.velocity > 0.0 {
        let decayed = lesson.velocity * policy.decay_factor;
        lesson.velocity = if decayed < policy.velocity_epsilon {
            0.0
        } else {
            decayed
        };
        report.decayed += 1;
    }

    if lesson.days_since_use(today) > policy.staleness_days && lesson.uses > 1 {
        lesson.uses -= 1;
        report.uses_decremented += 1;
    }
}

/// Remove the least recently used records above `capacity`
fn evict_in(doc: &mut Document<Lesson>, capacity: usize) -> Vec<String> {
    let excess = doc.records.len().saturating_sub(capacity);
    if excess == 0 {
        return Vec::new();
    }

    let mut by_age: Vec<(NaiveDate, u32, String)> = doc
        .records
        .iter()
        .map(|lesson| (lesson.last_used, lesson_number(&lesson.id), lesson.id.clone()))
        .collect();
    by_age.sort();

    let victims: Vec<String> = by_age
        .into_iter()
        .take(excess)
        .map(|(_, _, id)| id)
        .collect();

    bump_high_water(doc);
    doc.records.retain(|lesson| !victims.contains(&lesson.id));
    for id in &victims {
        tracing::info!(id = %id, capacity, "lesson evicted");
    }
    victims
}

fn lesson_number(id: &str) -> u32 {
    parse_lesson_id(id).map_or(u32::MAX, |(_, n)| n)
}

fn compare_ids(a: &str, b: &str) -> Ordering {
    lesson_number(a).cmp(&lesson_number(b)).then_with(|| a.cmp(b))
}

fn high_water(doc: &Document<Lesson>) -> u32 {
    let from_records = doc
        .records
        .iter()
        .filter_map(|lesson| parse_lesson_id(&lesson.id).ok())
        .map(|(_, n)| n)
        .max()
        .unwrap_or(0);
    let recorded = doc
        .directive(LAST_ID_DIRECTIVE)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    from_records.max(recorded)
}

fn confine_to_scope(doc: &mut Document<Lesson>, level: Level) {
    let before = doc.records.len();
    doc.records.retain(|lesson| {
        let in_scope = lesson.level == level;
        if !in_scope {
            tracing::warn!(
                id = %lesson.id,
                scope = %level,
                "skipping lesson filed in the wrong scope"
            );
        }
        in_scope
    });
    doc.skipped += before - doc.records.len();
}

/// Persist the high-water mark before records disappear
fn bump_high_water(doc: &mut Document<Lesson>) {
    let high = high_water(doc);
    if high > 0 {
        doc.set_directive(LAST_ID_DIRECTIVE, high.to_string());
    }
}

fn allocate_id(doc: &mut Document<Lesson>, level: Level) -> String {
    let next = high_water(doc).saturating_add(1);
    doc.set_directive(LAST_ID_DIRECTIVE, next.to_string());
    level.format_id(next)
}

/// Case-fold, strip punctuation, collapse whitespace
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_duplicate<'a>(title: &str, existing: &'a [Lesson]) -> Option<&'a Lesson> {
    let candidate = normalize_title(title);
    let long_candidate = candidate.chars().count() > SUBSTRING_MIN_CHARS;

    existing.iter().find(|lesson| {
        let other = normalize_title(&lesson.title);
        if other.is_empty() {
            return false;
        }
        if other == candidate {
            return true;
        }
        long_candidate
            && other.chars().count() > SUBSTRING_MIN_CHARS
            && (other.contains(&candidate) || candidate.contains(&other))
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    format!("{}\n", timestamp(at))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
