//! Session → handoff links
//!
//! A small JSON object keyed by external session id, rewritten under the
//! same lock discipline as the record files.

use crate::errors::{RecallError, Result};
use crate::lock::LockedFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLink {
    pub handoff: String,
    pub linked_at: DateTime<Utc>,
}

type LinkMap = BTreeMap<String, SessionLink>;

#[derive(Debug, Clone)]
pub(crate) struct SessionLinks {
    file: LockedFile,
}

impl SessionLinks {
    pub(crate) fn new(file: LockedFile) -> Self {
        Self { file }
    }

    pub(crate) fn get(&self, session_id: &str) -> Result<Option<SessionLink>> {
        let text = self.file.read_text()?;
        let mut map = self.decode(text.as_deref())?;
        Ok(map.remove(session_id))
    }

    /// Point `session_id` at `handoff`, replacing any previous link
    pub(crate) fn link(&self, session_id: &str, handoff: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(|map| {
            map.insert(
                session_id.to_string(),
                SessionLink {
                    handoff: handoff.to_string(),
                    linked_at: at,
                },
            );
            Ok(())
        })
    }

    pub(crate) fn unlink(&self, session_id: &str) -> Result<Option<String>> {
        self.update(|map| Ok(map.remove(session_id).map(|link| link.handoff)))
    }

    /// Drop every link pointing at one of `handoffs`; returns the count removed
    pub(crate) fn remove_handoffs(&self, handoffs: &[String]) -> Result<usize> {
        self.update(|map| {
            let before = map.len();
            map.retain(|_, link| !handoffs.contains(&link.handoff));
            Ok(before - map.len())
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut LinkMap) -> Result<T>) -> Result<T> {
        self.file.update_text(|current| {
            let mut map = self.decode(current.as_deref())?;
            let before = map.clone();
            let value = f(&mut map)?;
            if map == before {
                return Ok((None, value));
            }
            let mut json = serde_json::to_string_pretty(&map).map_err(|e| {
                RecallError::serialization_with_source("failed to encode session links", e)
            })?;
            json.push('\n');
            Ok((Some(json), value))
        })
    }

    fn decode(&self, text: Option<&str>) -> Result<LinkMap> {
        match text {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(text).map_err(|e| {
                RecallError::serialization_with_source(
                    format!("malformed session links in {}", self.file.path().display()),
                    e,
                )
            }),
            _ => Ok(LinkMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockPolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_link_unlink_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let links = SessionLinks::new(LockedFile::new(
            dir.path().join("session-handoffs.json"),
            LockPolicy::default(),
        ));
        let at = Utc::now();

        assert_eq!(links.get("s1").unwrap(), None);
        links.link("s1", "hf-0000001", at).unwrap();
        links.link("s2", "hf-0000001", at).unwrap();
        links.link("s3", "hf-0000002", at).unwrap();
        assert_eq!(links.get("s1").unwrap().unwrap().handoff, "hf-0000001");

        assert_eq!(links.unlink("s3").unwrap().as_deref(), Some("hf-0000002"));
        assert_eq!(links.unlink("s3").unwrap(), None);

        assert_eq!(links.remove_handoffs(&["hf-0000001".to_string()]).unwrap(), 2);
        assert_eq!(links.get("s2").unwrap(), None);
    }

    #[test]
    fn test_malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-handoffs.json");
        std::fs::write(&path, "{not json").unwrap();
        let links = SessionLinks::new(LockedFile::new(&path, LockPolicy::default()));

        let err = links.get("s1").unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::SerializationError);
    }
}
