//! Lessons: record model and lifecycle manager

mod model;
mod store;

pub use model::{ID_DIGITS, Lesson, LessonType, Level, Source, is_lesson_id, parse_lesson_id};
pub use store::{
    CitationResult, DecayReport, LessonAdded, LessonFilter, LessonStore, NewLesson,
    PromotionResult, normalize_title,
};
