//! Cross-handle contention on the same files.
//!
//! Each thread opens its own store, so every lock attempt goes through a
//! separate open file description and contends exactly like a separate
//! process would.

// Test helpers outside #[test] fns unwrap too
#![allow(clippy::expect_used, clippy::unwrap_used)]

use recall_store::handoffs::NewHandoff;
use recall_store::{
    HandoffStore, LessonStore, Level, LockPolicy, NewLesson, Paths, RecallConfig, TriedOutcome,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use tempfile::TempDir;

const THREADS: usize = 8;

fn patient_config() -> RecallConfig {
    RecallConfig {
        lock: LockPolicy {
            timeout_ms: 30_000,
            initial_backoff_ms: 1,
            max_backoff_ms: 20,
            jitter_factor: 0.5,
        },
        ..RecallConfig::default()
    }
}

fn paths(dir: &TempDir) -> (PathBuf, PathBuf) {
    (dir.path().join("state"), dir.path().join("project"))
}

fn lesson_store(state: &Path, project: &Path) -> LessonStore {
    LessonStore::new(&patient_config(), &Paths::new(state, project))
}

fn handoff_store(state: &Path, project: &Path) -> HandoffStore {
    HandoffStore::new(&patient_config(), &Paths::new(state, project))
}

#[test]
fn interleaved_citations_never_lose_increments() {
    let dir = TempDir::new().expect("temp dir");
    let (state, project) = paths(&dir);
    let id = lesson_store(&state, &project)
        .add(NewLesson::new(Level::Project, "Shared lesson", "cited from many threads"))
        .expect("add")
        .id;

    let per_thread = 10;
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (state, project, id) = (state.clone(), project.clone(), id.clone());
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let store = lesson_store(&state, &project);
                barrier.wait();
                for _ in 0..per_thread {
                    store.cite(&id).expect("cite");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let lesson = lesson_store(&state, &project).get(&id).expect("get");
    let citations = (THREADS * per_thread) as u32;
    assert_eq!(lesson.uses, 1 + citations);
    assert_eq!(lesson.velocity, f64::from(citations));
}

#[test]
fn concurrent_adds_allocate_unique_ids() {
    let dir = TempDir::new().expect("temp dir");
    let (state, project) = paths(&dir);

    let per_thread = 5;
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let (state, project) = (state.clone(), project.clone());
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let store = lesson_store(&state, &project);
                barrier.wait();
                (0..per_thread)
                    .map(|n| {
                        store
                            .add(NewLesson::new(
                                Level::Project,
                                format!("Thread {t} lesson {n}"),
                                "body",
                            ))
                            .expect("add")
                            .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().expect("thread") {
            assert!(ids.insert(id.clone()), "duplicate id {id}");
        }
    }

    let stored = lesson_store(&state, &project).all().expect("list");
    assert_eq!(stored.len(), THREADS * per_thread);
    assert_eq!(ids.len(), THREADS * per_thread);
}

#[test]
fn concurrent_tried_steps_are_all_kept() {
    let dir = TempDir::new().expect("temp dir");
    let (state, project) = paths(&dir);
    let id = handoff_store(&state, &project)
        .create(NewHandoff::new("Shared handoff"))
        .expect("create")
        .id;

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let (state, project, id) = (state.clone(), project.clone(), id.clone());
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let store = handoff_store(&state, &project);
                barrier.wait();
                store
                    .add_tried(&id, TriedOutcome::Partial, &format!("attempt from thread {t}"))
                    .expect("add tried");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let handoff = handoff_store(&state, &project).get(&id).expect("get");
    assert_eq!(handoff.tried.len(), THREADS);
}

#[test]
fn readers_see_whole_files_during_writes() {
    let dir = TempDir::new().expect("temp dir");
    let (state, project) = paths(&dir);
    let writer = lesson_store(&state, &project);
    let id = writer
        .add(NewLesson::new(Level::Project, "Read under write", "body"))
        .expect("add")
        .id;

    let reader_state = state.clone();
    let reader_project = project.clone();
    let reader_id = id.clone();
    let reader = std::thread::spawn(move || {
        let store = lesson_store(&reader_state, &reader_project);
        for _ in 0..50 {
            let lesson = store.get(&reader_id).expect("reader sees the lesson");
            assert_eq!(lesson.title, "Read under write");
        }
    });

    for _ in 0..50 {
        writer.cite(&id).expect("cite");
    }
    reader.join().expect("reader");
}
