//! Base path resolution and one-time migration of legacy file locations
//!
//! State dir precedence: `RECALL_STATE` → `[paths].state_dir` →
//! `$XDG_STATE_HOME/recall` → `~/.local/state/recall` → `./.recall-state`.
//!
//! Project root precedence: `RECALL_PROJECT_DIR` → `[paths].project_root` →
//! nearest ancestor of the working directory holding `.git` → working directory.

use crate::config::RecallConfig;
use crate::errors::{RecallError, Result};
use crate::lock::LockedFile;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const ENV_STATE_DIR: &str = "RECALL_STATE";
pub const ENV_PROJECT_DIR: &str = "RECALL_PROJECT_DIR";

/// Directory under the project root holding project-scope files
pub const PROJECT_DIR_NAME: &str = ".recall";
/// Project directory name used before `.recall/`
pub const LEGACY_PROJECT_DIR_NAME: &str = ".coding-agent-lessons";

pub const LESSONS_FILE: &str = "LESSONS.md";
pub const HANDOFFS_FILE: &str = "HANDOFFS.md";
pub const HANDOFFS_ARCHIVE_FILE: &str = "HANDOFFS_ARCHIVE.md";
pub const SESSION_LINKS_FILE: &str = "session-handoffs.json";
pub const DECAY_LAST_RUN_FILE: &str = ".decay-last-run";
pub const LAST_ACTIVITY_FILE: &str = ".last-activity";

/// Resolved storage locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub project_root: PathBuf,
}

/// A file moved from a legacy location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl Paths {
    pub fn new(state_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            project_root: project_root.into(),
        }
    }

    /// Resolve from the process environment and working directory
    pub fn from_env(cfg: &RecallConfig) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| RecallError::io(".", e))?;
        Ok(Self::resolve(cfg, |key| std::env::var(key).ok(), &cwd))
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve<F>(cfg: &RecallConfig, env: F, cwd: &Path) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let state_dir = match non_empty(env(ENV_STATE_DIR)) {
            Some(dir) => expand_tilde(&dir),
            None => match &cfg.paths.state_dir {
                Some(dir) => expand_tilde(dir),
                None => default_state_dir(&env),
            },
        };

        let project_root = match non_empty(env(ENV_PROJECT_DIR)) {
            Some(dir) => expand_tilde(&dir),
            None => match &cfg.paths.project_root {
                Some(dir) => expand_tilde(dir),
                None => find_project_root(cwd),
            },
        };

        Self {
            state_dir,
            project_root,
        }
    }

    pub fn project_dir(&self) -> PathBuf {
        self.project_root.join(PROJECT_DIR_NAME)
    }

    pub fn project_lessons(&self) -> PathBuf {
        self.project_dir().join(LESSONS_FILE)
    }

    pub fn system_lessons(&self) -> PathBuf {
        self.state_dir.join(LESSONS_FILE)
    }

    pub fn handoffs(&self) -> PathBuf {
        self.project_dir().join(HANDOFFS_FILE)
    }

    pub fn handoffs_archive(&self) -> PathBuf {
        self.project_dir().join(HANDOFFS_ARCHIVE_FILE)
    }

    pub fn session_links(&self) -> PathBuf {
        self.project_dir().join(SESSION_LINKS_FILE)
    }

    pub fn decay_last_run(&self) -> PathBuf {
        self.state_dir.join(DECAY_LAST_RUN_FILE)
    }

    pub fn last_activity(&self) -> PathBuf {
        self.state_dir.join(LAST_ACTIVITY_FILE)
    }

    /// Move files from the legacy locations (`~/.config/recall/` and
    /// `<project_root>/.coding-agent-lessons/`) into the current layout.
    pub fn migrate_legacy(&self, cfg: &RecallConfig) -> Result<Vec<Migration>> {
        let legacy_state = dirs::home_dir().map(|h| h.join(".config").join("recall"));
        self.migrate_legacy_from(cfg, legacy_state.as_deref())
    }

    /// Migration with an explicit legacy state directory
    ///
    /// Never overwrites: a file is moved only when its new location is
    /// missing. Each move happens under the destination's lock.
    pub fn migrate_legacy_from(
        &self,
        cfg: &RecallConfig,
        legacy_state_dir: Option<&Path>,
    ) -> Result<Vec<Migration>> {
        let mut candidates = Vec::new();

        if let Some(legacy) = legacy_state_dir
            && legacy != self.state_dir.as_path()
        {
            candidates.push((legacy.join(LESSONS_FILE), self.system_lessons()));
        }

        let legacy_project = self.project_root.join(LEGACY_PROJECT_DIR_NAME);
        for name in [
            LESSONS_FILE,
            HANDOFFS_FILE,
            HANDOFFS_ARCHIVE_FILE,
            SESSION_LINKS_FILE,
        ] {
            candidates.push((legacy_project.join(name), self.project_dir().join(name)));
        }

        let mut moved = Vec::new();
        for (from, to) in candidates {
            if !from.is_file() {
                continue;
            }

            let store = LockedFile::new(&to, cfg.lock.clone());
            let did_move = store.exclusive(|target| {
                if target.exists() {
                    return Ok(false);
                }
                move_file(&from, target)?;
                Ok(true)
            })?;

            if did_move {
                tracing::warn!(
                    from = %from.display(),
                    to = %to.display(),
                    "migrated legacy recall file"
                );
                moved.push(Migration { from, to });
            }
        }

        Ok(moved)
    }
}

/// Default state directory when neither env nor config names one
pub fn default_state_dir<F>(env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = non_empty(env(ENV_STATE_DIR)) {
        return expand_tilde(&dir);
    }
    if let Some(xdg) = non_empty(env("XDG_STATE_HOME")) {
        return PathBuf::from(xdg).join("recall");
    }
    dirs::home_dir()
        .map(|h| h.join(".local").join("state").join("recall"))
        .unwrap_or_else(|| PathBuf::from(".recall-state"))
}

/// Nearest ancestor of `start` containing `.git`, else `start`
pub fn find_project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(start)
        .to_path_buf()
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RecallError::io(parent, e))?;
    }

    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    // Cross-device: copy then remove
    std::fs::copy(from, to).map_err(|e| RecallError::io(to, e))?;
    std::fs::remove_file(from).map_err(|e| RecallError::io(from, e))?;
    Ok(())
}
