//! End-to-end lesson and handoff lifecycles through the `Recall` facade.

// Test helpers outside #[test] fns unwrap too
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use recall_store::format::Document;
use recall_store::handoffs::{HandoffOp, LessonSuggestion, NewHandoff};
use recall_store::lessons::LessonFilter;
use recall_store::render::{HandoffView, LessonList};
use recall_store::{
    CompletionHook, ErrorCategory, Handoff, HandoffStatus, Lesson, Level, NewLesson, Outcome,
    OutputFormat, Paths, Recall, RecallConfig, Render,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    recall: Recall,
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Harness {
    fn new(config: RecallConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let paths = Paths::new(dir.path().join("state"), dir.path().join("project"));
        let now = Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap(),
        ));
        let clock_now = Arc::clone(&now);
        let recall =
            Recall::open(config, paths).with_clock(Arc::new(move || *clock_now.lock().unwrap()));
        Self {
            _dir: dir,
            recall,
            now,
        }
    }

    fn advance_days(&self, days: i64) {
        *self.now.lock().unwrap() += chrono::Duration::days(days);
    }
}

struct CheckpointSuggester;

impl CompletionHook for CheckpointSuggester {
    fn on_complete(&self, handoff: &Handoff) -> Vec<LessonSuggestion> {
        if handoff.checkpoint.is_empty() {
            return Vec::new();
        }
        vec![LessonSuggestion {
            title: handoff.title.clone(),
            content: handoff.checkpoint.clone(),
        }]
    }
}

#[test]
fn lesson_reaches_threshold_and_is_promoted() {
    let mut config = RecallConfig::default();
    config.lessons.promotion_threshold = 50;
    let h = Harness::new(config);
    let lessons = h.recall.lessons();

    let id = lessons
        .add(NewLesson::new(Level::Project, "Run clippy before pushing", "CI rejects warnings"))
        .expect("add")
        .id;

    let mut flags = Vec::new();
    for _ in 1..=60u32 {
        let cited = lessons.cite(&id).expect("cite");
        flags.push((cited.uses, cited.promotion_ready));
    }
    assert_eq!(flags[48], (50, false));
    assert_eq!(flags[49], (51, true));
    let first_ready = flags.iter().position(|(_, ready)| *ready).map(|i| i + 1);
    assert_eq!(first_ready, Some(50));
    assert!(flags[49..].iter().all(|(_, ready)| *ready));
    assert_eq!(lessons.get(&id).expect("get").uses, 61);

    let promoted = lessons.promote(&id).expect("promote");
    let system = lessons.get(&promoted.to).expect("system copy");
    assert_eq!(system.uses, 61);
    assert_eq!(system.content, "CI rejects warnings");
    assert_eq!(
        lessons.get(&id).unwrap_err().category(),
        ErrorCategory::NotFound
    );

    let text = Outcome::from(promoted).render(OutputFormat::Text);
    assert_eq!(text, format!("Promoted {id} → S001\n"));
}

#[test]
fn uses_are_capped_at_max() {
    let h = Harness::new(RecallConfig::default());
    let lessons = h.recall.lessons();
    let id = lessons
        .add(NewLesson::new(Level::System, "Heavily cited", "x"))
        .expect("add")
        .id;

    for _ in 0..120 {
        lessons.cite(&id).expect("cite");
    }
    assert_eq!(lessons.get(&id).expect("get").uses, 100);
}

#[test]
fn hand_edited_file_keeps_preamble_and_drops_broken_blocks() {
    let h = Harness::new(RecallConfig::default());
    let path = h.recall.paths().project_lessons();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        "\
# My lessons

Notes written by hand.

### [L001] [*----|-----] Good lesson
- **Uses**: 3 | **Velocity**: 0.5 | **Learned**: 2026-08-01 | **Last**: 2026-08-02 | **Category**: pattern | **Source**: human
> keep me

### [L002] Broken lesson
this block has no metadata
",
    )
    .unwrap();

    let lessons = h.recall.lessons();
    let listed = lessons.list(&LessonFilter::default()).expect("list");
    assert_eq!(listed.len(), 1);

    let added = lessons
        .add(NewLesson::new(Level::Project, "Fresh lesson", "new"))
        .expect("add");
    assert_eq!(added.id, "L002");

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# My lessons\n\nNotes written by hand.\n\n"));
    assert!(!text.contains("this block has no metadata"));

    let doc: Document<Lesson> = Document::parse(&text);
    let ids: Vec<&str> = doc.records.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["L001", "L002"]);
    assert_eq!(doc.skipped, 0);
}

#[test]
fn decay_skips_when_idle_and_evicts_after_sweep() {
    let mut config = RecallConfig::default();
    config.lessons.max_project_lessons = Some(2);
    let h = Harness::new(config);
    let lessons = h.recall.lessons();

    for title in ["First lesson", "Second lesson", "Third lesson"] {
        lessons
            .add(NewLesson::new(Level::Project, title, "x"))
            .expect("add");
        h.advance_days(1);
    }

    let report = lessons.decay().expect("decay");
    assert!(!report.skipped);
    assert_eq!(report.evicted, vec!["L001".to_string()]);

    h.advance_days(1);
    assert!(lessons.decay().expect("decay").skipped);
}

#[test]
fn relevance_ranks_across_scopes() {
    let h = Harness::new(RecallConfig::default());
    let lessons = h.recall.lessons();
    lessons
        .add(NewLesson::new(Level::Project, "Quote shell variables", "unquoted globbing bites"))
        .expect("add");
    lessons
        .add(NewLesson::new(Level::System, "Lock files before writing", "use advisory locks"))
        .expect("add");
    lessons
        .add(NewLesson::new(Level::Project, "Prefer lock-free reads", "shared locks for readers"))
        .expect("add");

    let ranked = h.recall.relevance("advisory lock", 10, 1).expect("rank");
    let ids: Vec<&str> = ranked.results.iter().map(|s| s.lesson.id.as_str()).collect();
    assert_eq!(ids[0], "S001");
    assert!(!ids.contains(&"L001"));

    let json: serde_json::Value =
        serde_json::from_str(&ranked.render(OutputFormat::Json)).expect("json");
    assert_eq!(json["query"], "advisory lock");
}

#[test]
fn handoff_lifecycle_with_dependencies_sessions_and_archive() {
    let h = Harness::new(RecallConfig::default());
    let recall = h.recall.clone().with_completion_hook(Arc::new(CheckpointSuggester));
    let handoffs = recall.handoffs();

    let schema = handoffs
        .create(NewHandoff::new("Design schema").files(["docs/schema.md"]))
        .expect("create");
    let api = handoffs.create(NewHandoff::new("Build API")).expect("create");
    handoffs
        .set_blocked_by(&api.id, vec![schema.id.clone()])
        .expect("block");
    handoffs.link_session("session-a", &schema.id).expect("link");

    let ready: Vec<String> = handoffs.ready().expect("ready").into_iter().map(|h| h.id).collect();
    assert_eq!(ready, vec![schema.id.clone()]);

    let report = handoffs.batch(vec![
        HandoffOp::Update {
            id: schema.id.clone(),
            patch: recall_store::HandoffPatch {
                status: Some(HandoffStatus::InProgress),
                checkpoint: Some("tables drafted".into()),
                ..Default::default()
            },
        },
        HandoffOp::Complete {
            id: schema.id.clone(),
        },
    ]);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.items[1].suggestions.len(), 1);

    h.advance_days(8);
    let archived = handoffs.archive_stale_completed().expect("archive");
    assert_eq!(archived, vec![schema.id.clone()]);
    assert_eq!(handoffs.handoff_for_session("session-a").expect("lookup"), None);

    let ready: Vec<String> = handoffs.ready().expect("ready").into_iter().map(|h| h.id).collect();
    assert_eq!(ready, vec![api.id.clone()]);

    let view = HandoffView {
        handoff: handoffs.get(&api.id).expect("get"),
    };
    assert!(view.to_text().contains(&format!("blocked by: {}", schema.id)));

    let archive_text =
        std::fs::read_to_string(recall.paths().handoffs_archive()).expect("archive file");
    assert!(archive_text.contains(&format!("### [{}] Design schema", schema.id)));
    assert!(archive_text.contains("- **Status**: completed"));
}

#[test]
fn list_rendering_counts_lessons() {
    let h = Harness::new(RecallConfig::default());
    let lessons = h.recall.lessons();
    lessons
        .add(NewLesson::new(Level::Project, "One lesson", "first line\nsecond line"))
        .expect("add");

    let list = LessonList {
        lessons: lessons.all().expect("all"),
    };
    let text = list.to_text();
    assert!(text.contains("[L001] [*----|-----] One lesson"));
    assert!(text.contains("    first line"));
    assert!(text.ends_with("1 lesson(s)\n"));
}
