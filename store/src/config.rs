//! Recall configuration loading
//!
//! Loads configuration from `<state_dir>/config.toml` (or `RECALL_CONFIG` env).
//! The value is built once at process start and passed down to every store;
//! nothing below this module reads the environment.

use crate::errors::{RecallError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the recall store
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecallConfig {
    /// Base path overrides
    #[serde(default)]
    pub paths: PathsConfig,

    /// Lesson lifecycle policy
    #[serde(default)]
    pub lessons: LessonPolicy,

    /// Handoff lifecycle policy
    #[serde(default)]
    pub handoffs: HandoffPolicy,

    /// Lock acquisition policy
    #[serde(default)]
    pub lock: LockPolicy,
}

/// Explicit base paths; environment overrides still win (see `paths`)
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PathsConfig {
    /// Directory holding system-scope lessons and decay bookkeeping
    #[serde(default)]
    pub state_dir: Option<String>,

    /// Project root holding the `.recall/` directory
    #[serde(default)]
    pub project_root: Option<String>,
}

/// Lesson scoring, decay and capacity settings
#[derive(Debug, Deserialize, Clone)]
pub struct LessonPolicy {
    /// Citations after which a promotable project lesson is flagged for
    /// promotion
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: u32,

    /// Hard cap on a lesson's use count
    #[serde(default = "default_max_uses")]
    pub max_uses: u32,

    /// Multiplier applied to velocity on every decay sweep
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Velocities below this snap to zero
    #[serde(default = "default_velocity_epsilon")]
    pub velocity_epsilon: f64,

    /// Days since last use after which a decay sweep decrements uses
    #[serde(default = "default_staleness_days")]
    pub staleness_days: i64,

    /// Days since last use after which `list --stale` reports a lesson
    #[serde(default = "default_stale_days")]
    pub stale_days: i64,

    /// Capacity of the project scope (None = unbounded)
    #[serde(default)]
    pub max_project_lessons: Option<usize>,

    /// Capacity of the system scope (None = unbounded)
    #[serde(default)]
    pub max_system_lessons: Option<usize>,
}

fn default_promotion_threshold() -> u32 {
    50
}
fn default_max_uses() -> u32 {
    100
}
fn default_decay_factor() -> f64 {
    0.5
}
fn default_velocity_epsilon() -> f64 {
    0.01
}
fn default_staleness_days() -> i64 {
    30
}
fn default_stale_days() -> i64 {
    60
}

impl Default for LessonPolicy {
    fn default() -> Self {
        Self {
            promotion_threshold: default_promotion_threshold(),
            max_uses: default_max_uses(),
            decay_factor: default_decay_factor(),
            velocity_epsilon: default_velocity_epsilon(),
            staleness_days: default_staleness_days(),
            stale_days: default_stale_days(),
            max_project_lessons: None,
            max_system_lessons: None,
        }
    }
}

/// Handoff housekeeping settings
#[derive(Debug, Deserialize, Clone)]
pub struct HandoffPolicy {
    /// Completed handoffs untouched this many days are archived by
    /// `archive_stale_completed`
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,

    /// Keep at most this many tried steps per handoff (oldest dropped)
    #[serde(default)]
    pub max_tried_steps: Option<usize>,
}

fn default_archive_after_days() -> i64 {
    7
}

impl Default for HandoffPolicy {
    fn default() -> Self {
        Self {
            archive_after_days: default_archive_after_days(),
            max_tried_steps: None,
        }
    }
}

/// Bounded lock acquisition
#[derive(Debug, Deserialize, Clone)]
pub struct LockPolicy {
    /// Give up and report `LockUnavailable` after this long
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// First sleep between acquisition attempts
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the exponential backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Random +/- fraction applied to each sleep
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_initial_backoff_ms() -> u64 {
    10
}
fn default_max_backoff_ms() -> u64 {
    200
}
fn default_jitter_factor() -> f64 {
    0.25
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl LockPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RecallConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "RECALL_CONFIG";

    /// Default config filename inside the state directory
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "config.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `RECALL_CONFIG` environment variable
    /// 2. `<default state dir>/config.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = match std::env::var(Self::ENV_CONFIG_PATH) {
            Ok(path) => PathBuf::from(path),
            Err(_) => crate::paths::default_state_dir(|key| std::env::var(key).ok())
                .join(Self::DEFAULT_CONFIG_FILENAME),
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "recall config not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RecallError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: RecallConfig = toml::from_str(contents)
            .map_err(|e| RecallError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let lessons = &self.lessons;

        if !(lessons.decay_factor > 0.0 && lessons.decay_factor <= 1.0) {
            return Err(RecallError::config(format!(
                "lessons.decay_factor must be in (0, 1], got {}",
                lessons.decay_factor
            )));
        }

        if lessons.max_uses == 0 {
            return Err(RecallError::config("lessons.max_uses must be positive"));
        }

        if lessons.velocity_epsilon < 0.0 {
            return Err(RecallError::config(
                "lessons.velocity_epsilon must not be negative",
            ));
        }

        if lessons.promotion_threshold >= lessons.max_uses {
            tracing::warn!(
                threshold = lessons.promotion_threshold,
                max_uses = lessons.max_uses,
                "promotion threshold not below max uses; lessons will never be promotion-ready"
            );
        }

        if self.lock.timeout_ms == 0 {
            tracing::warn!("lock.timeout_ms is 0; contended operations fail immediately");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RecallConfig::default();
        assert_eq!(cfg.lessons.promotion_threshold, 50);
        assert_eq!(cfg.lessons.max_uses, 100);
        assert_eq!(cfg.lessons.stale_days, 60);
        assert!(cfg.lessons.max_project_lessons.is_none());
        assert_eq!(cfg.lock.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [lessons]
            promotion_threshold = 10
            max_project_lessons = 40

            [lock]
            timeout_ms = 250
        "#;

        let cfg = RecallConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.lessons.promotion_threshold, 10);
        assert_eq!(cfg.lessons.max_project_lessons, Some(40));
        // Defaults should be applied
        assert_eq!(cfg.lessons.max_uses, 100);
        assert_eq!(cfg.lock.timeout_ms, 250);
        assert_eq!(cfg.handoffs.archive_after_days, 7);
    }

    #[test]
    fn test_parse_paths() {
        let toml = r#"
            [paths]
            state_dir = "~/.local/state/recall-test"
        "#;

        let cfg = RecallConfig::parse(toml).expect("should parse");
        assert_eq!(
            cfg.paths.state_dir.as_deref(),
            Some("~/.local/state/recall-test")
        );
        assert!(cfg.paths.project_root.is_none());
    }

    #[test]
    fn test_rejects_bad_decay_factor() {
        let err = RecallConfig::parse("[lessons]\ndecay_factor = 1.5\n").unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::ConfigError);

        let err = RecallConfig::parse("[lessons]\ndecay_factor = 0.0\n").unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::ConfigError);
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(RecallConfig::parse("[lessons\nmax_uses = ").is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[handoffs]\nmax_tried_steps = 5\n").unwrap();

        let cfg = RecallConfig::load_from_path(&path).unwrap();
        assert_eq!(cfg.handoffs.max_tried_steps, Some(5));
    }
}
