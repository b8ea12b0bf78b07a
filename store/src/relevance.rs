//! BM25 relevance engine
//!
//! Ranks an in-memory lesson corpus against a free-text query with no
//! external calls and no storage access.
//!
//! - BM25 term frequency with `k1 = 1.5`, `b = 0.75`
//! - IDF: `ln((N - df + 0.5) / (df + 0.5) + 1)`, always positive
//! - Raw scores rescaled to integers `0..=10` against the corpus maximum
//! - Ordering: score desc, then uses desc, then id

use crate::lessons::Lesson;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Highest rescaled score
pub const MAX_SCORE: u8 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// BM25 parameters
#[derive(Debug, Clone)]
pub struct Bm25Config {
    /// Term frequency saturation
    pub k1: f64,

    /// Length normalization (0 = none, 1 = full)
    pub b: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct IndexedDoc {
    tf: HashMap<String, usize>,
    length: usize,
}

impl IndexedDoc {
    fn from_text(text: &str) -> Self {
        let tokens = tokenize(text);
        let length = tokens.len();

        let mut tf = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }

        Self { tf, length }
    }
}

/// A lesson with its rescaled relevance score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredLesson {
    pub score: u8,
    pub lesson: Lesson,
}

/// Immutable BM25 index over one corpus snapshot
pub struct Bm25Index<'a> {
    config: Bm25Config,
    lessons: &'a [Lesson],
    docs: Vec<IndexedDoc>,
    df: HashMap<String, usize>,
    avg_doc_length: f64,
}

impl<'a> Bm25Index<'a> {
    pub fn new(lessons: &'a [Lesson]) -> Self {
        Self::with_config(lessons, Bm25Config::default())
    }

    pub fn with_config(lessons: &'a [Lesson], config: Bm25Config) -> Self {
        let docs: Vec<IndexedDoc> = lessons
            .iter()
            .map(|lesson| IndexedDoc::from_text(&lesson.search_text()))
            .collect();

        let mut df: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;
        for doc in &docs {
            for token in doc.tf.keys() {
                *df.entry(token.clone()).or_insert(0) += 1;
            }
            total_length += doc.length;
        }

        let avg_doc_length = if docs.is_empty() {
            0.0
        } else {
            total_length as f64 / docs.len() as f64
        };

        Self {
            config,
            lessons,
            docs,
            df,
            avg_doc_length,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Unscaled BM25 score of every document, in corpus order
    pub fn raw_scores(&self, query: &str) -> Vec<f64> {
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        self.docs
            .iter()
            .map(|doc| self.score_document(doc, &terms))
            .collect()
    }

    fn score_document(&self, doc: &IndexedDoc, terms: &BTreeSet<String>) -> f64 {
        let n = self.docs.len() as f64;
        if n == 0.0 || self.avg_doc_length == 0.0 {
            return 0.0;
        }

        let k1 = self.config.k1;
        let b = self.config.b;
        let doc_len = doc.length as f64;

        let mut score = 0.0;
        for term in terms {
            let tf = *doc.tf.get(term).unwrap_or(&0) as f64;
            if tf == 0.0 {
                continue;
            }

            let doc_freq = *self.df.get(term).unwrap_or(&0) as f64;
            let idf = ((n - doc_freq + 0.5) / (doc_freq + 0.5) + 1.0).ln();
            let tf_norm =
                (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * doc_len / self.avg_doc_length));

            score += idf * tf_norm;
        }

        score
    }

    /// Every lesson with its score, best first
    pub fn rank(&self, query: &str) -> Vec<ScoredLesson> {
        let raw = self.raw_scores(query);
        let max = raw.iter().copied().fold(0.0_f64, f64::max);

        let mut scored: Vec<ScoredLesson> = self
            .lessons
            .iter()
            .zip(raw)
            .map(|(lesson, raw)| ScoredLesson {
                score: rescale(raw, max),
                lesson: lesson.clone(),
            })
            .collect();

        scored.sort_by(compare_ranked);
        scored
    }

    /// Results scoring at least `min_score`, truncated to `limit`
    pub fn top(&self, query: &str, limit: usize, min_score: u8) -> Vec<ScoredLesson> {
        let mut ranked = self.rank(query);
        ranked.retain(|s| s.score >= min_score);
        ranked.truncate(limit);
        ranked
    }
}

fn rescale(raw: f64, max: f64) -> u8 {
    if max <= 0.0 || !raw.is_finite() {
        return 0;
    }
    ((raw / max) * f64::from(MAX_SCORE))
        .round()
        .clamp(0.0, f64::from(MAX_SCORE)) as u8
}

fn compare_ranked(a: &ScoredLesson, b: &ScoredLesson) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.lesson.uses.cmp(&a.lesson.uses))
        .then_with(|| a.lesson.id.cmp(&b.lesson.id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenization
// ─────────────────────────────────────────────────────────────────────────────

/// Lower-case, split on non-alphanumeric runs, drop short and stop words
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() >= 2)
        .filter(|s| !is_stop_word(s))
        .map(str::to_string)
        .collect()
}

fn is_stop_word(word: &str) -> bool {
    const STOP_WORDS: &[&str] = &[
        "the", "be", "to", "of", "and", "in", "that", "have", "it", "for", "not", "on", "with",
        "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we", "say",
        "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their", "what",
        "so", "up", "out", "if", "about", "who", "get", "which", "go", "me", "when", "make", "can",
        "like", "no", "just", "him", "into", "your", "some", "could", "them", "other", "than",
        "then", "now", "only", "its", "over", "also", "after", "how", "our", "any", "these",
        "because", "most", "us", "is", "was", "are", "been", "being", "were", "am", "has", "had",
        "does", "did", "should", "may", "must", "such", "each", "very",
    ];

    STOP_WORDS.contains(&word)
}
