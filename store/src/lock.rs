//! Locked file store
//!
//! Scoped, cross-process exclusive access to one logical file.
//!
//! ## Design
//! - The lock is an advisory OS lock (`flock`/`LockFileEx` via `fs2`) on a
//!   sidecar `<file>.lock`, so the data file itself can be replaced by rename.
//! - Writers hold the lock exclusively for the whole read → mutate → write
//!   cycle; readers hold it shared.
//! - Acquisition is bounded: non-blocking attempts with exponential backoff
//!   and jitter until [`LockPolicy::timeout_ms`], then
//!   [`RecallError::LockUnavailable`].
//! - Release is tied to [`LockGuard`]'s `Drop`, so early returns, `?` and
//!   panics all unlock.
//! - A crashed holder cannot leave a live lock: the OS drops advisory locks
//!   with the process. The sidecar file stays behind and is simply reused.
//! - Writes go to a temp file in the same directory, are fsynced, then
//!   renamed over the target.
//!
//! Each file is locked on its own; there is no multi-file lock.

use crate::config::LockPolicy;
use crate::errors::{RecallError, Result};
use crate::format::{Document, Record};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Diagnostics written into the sidecar by an exclusive holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// A held lock; released on drop
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        } else {
            tracing::trace!(path = %self.path.display(), "lock released");
        }
    }
}

/// One logical file guarded by its own lock
#[derive(Debug, Clone)]
pub struct LockedFile {
    path: PathBuf,
    lock_path: PathBuf,
    policy: LockPolicy,
}

impl LockedFile {
    pub fn new(path: impl Into<PathBuf>, policy: LockPolicy) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Run `f` while holding the exclusive lock; `f` receives the data path
    pub fn exclusive<T>(&self, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let _guard = self.acquire(LockMode::Exclusive)?;
        f(&self.path)
    }

    /// Read the whole file under a shared lock; `None` if it does not exist
    pub fn read_text(&self) -> Result<Option<String>> {
        let _guard = self.acquire(LockMode::Shared)?;
        self.read_unlocked()
    }

    /// Exclusive read-modify-write of the raw text.
    ///
    /// `f` receives the current contents (`None` if the file is missing) and
    /// returns the replacement text, or `None` to leave the file untouched.
    pub fn update_text<T>(
        &self,
        f: impl FnOnce(Option<String>) -> Result<(Option<String>, T)>,
    ) -> Result<T> {
        let _guard = self.acquire(LockMode::Exclusive)?;
        let current = self.read_unlocked()?;
        let (replacement, value) = f(current)?;
        if let Some(text) = replacement {
            self.write_unlocked(&text)?;
        }
        Ok(value)
    }

    /// Parse the file under a shared lock
    pub fn read_document<R: Record>(&self, default_preamble: &str) -> Result<Document<R>> {
        let text = self.read_text()?;
        Ok(parse_or_default(text.as_deref(), default_preamble))
    }

    /// Exclusive read → parse → mutate → serialize → write cycle.
    ///
    /// If `f` fails nothing is written. If the serialized result equals the
    /// text on disk (or, for a missing file, the bare default preamble) the
    /// file is not rewritten.
    pub fn update_document<R, T>(
        &self,
        default_preamble: &str,
        f: impl FnOnce(&mut Document<R>) -> Result<T>,
    ) -> Result<T>
    where
        R: Record,
    {
        self.update_text(|current| {
            let mut doc = parse_or_default(current.as_deref(), default_preamble);
            if doc.skipped > 0 {
                tracing::warn!(
                    path = %self.path.display(),
                    skipped = doc.skipped,
                    "rewriting file without malformed blocks"
                );
            }
            let value = f(&mut doc)?;
            let text = doc.serialize();
            let changed = match current.as_deref() {
                Some(old) => old != text,
                None => text != default_preamble,
            };
            Ok((changed.then_some(text), value))
        })
    }

    fn acquire(&self, mode: LockMode) -> Result<LockGuard> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RecallError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| RecallError::io(&self.lock_path, e))?;

        let start = Instant::now();
        let timeout = self.policy.timeout();
        let mut backoff = Duration::from_millis(self.policy.initial_backoff_ms.max(1));
        let max_backoff = Duration::from_millis(self.policy.max_backoff_ms.max(1));
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };

            match attempt {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        let holder = read_holder(&mut file);
                        tracing::warn!(
                            path = %self.path.display(),
                            attempts,
                            waited_ms = waited.as_millis() as u64,
                            holder_pid = holder.as_ref().map(|h| h.pid),
                            "lock unavailable"
                        );
                        return Err(RecallError::LockUnavailable {
                            path: self.path.clone(),
                            waited,
                        });
                    }

                    let sleep = apply_jitter(backoff, self.policy.jitter_factor)
                        .min(timeout.saturating_sub(waited))
                        .max(Duration::from_millis(1));
                    std::thread::sleep(sleep);
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => return Err(RecallError::io(&self.lock_path, e)),
            }
        }

        if mode == LockMode::Exclusive {
            write_holder(&mut file);
        }

        tracing::trace!(
            path = %self.path.display(),
            ?mode,
            attempts,
            "lock acquired"
        );

        Ok(LockGuard {
            file,
            path: self.lock_path.clone(),
        })
    }

    fn read_unlocked(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RecallError::io(&self.path, e)),
        }
    }

    /// Temp file + fsync + rename
    fn write_unlocked(&self, text: &str) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| RecallError::io(dir, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recall".to_string());
        let temp_path = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

        let mut file = File::create(&temp_path).map_err(|e| RecallError::io(&temp_path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| RecallError::io(&temp_path, e))?;
        file.sync_all().map_err(|e| RecallError::io(&temp_path, e))?;
        drop(file);

        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(RecallError::io(&self.path, e));
        }

        tracing::debug!(path = %self.path.display(), bytes = text.len(), "file rewritten");
        Ok(())
    }
}

fn parse_or_default<R: Record>(text: Option<&str>, default_preamble: &str) -> Document<R> {
    match text {
        Some(text) if !text.trim().is_empty() => Document::parse(text),
        _ => Document::new(default_preamble),
    }
}

/// Sidecar lock path: `<path>.lock`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error().is_some()
            && e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    let factor = jitter_factor.clamp(0.0, 1.0);
    if factor == 0.0 {
        return duration;
    }
    let jitter = rand::rng().random_range(-factor..=factor);
    let jittered_ms = (duration.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}

fn write_holder(file: &mut File) {
    let Ok(json) = serde_json::to_string(&LockHolder::current()) else {
        return;
    };
    let written = file
        .set_len(0)
        .and_then(|()| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(json.as_bytes()));
    if let Err(e) = written {
        tracing::trace!(error = %e, "could not record lock holder");
    }
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}
