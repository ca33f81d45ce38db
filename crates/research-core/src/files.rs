//! Run-scoped, in-memory store of named text artifacts.
//!
//! The store is shared (behind an `Arc`) by the root agent and every
//! sub-agent of the same run. Mutations happen inside one exclusive critical
//! section, so a reader never observes a half-applied write and concurrent
//! writers to the same key are applied one after another. The last committed
//! write wins; callers that care can use [`VirtualFileStore::write_if_revision`].

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualFile {
    pub content: String,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct VirtualFileStore {
    files: RwLock<BTreeMap<String, VirtualFile>>,
}

impl VirtualFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole content of `key` and returns the new revision.
    pub fn write(&self, key: &str, content: impl Into<String>) -> Result<u64, ActionError> {
        let key = checked_key("write_file", key)?;
        let mut files = self.write_guard();
        let revision = commit(&mut files, key, content.into());
        tracing::debug!(key, revision, "file written");
        Ok(revision)
    }

    /// Like [`write`](Self::write) but only commits when the current revision
    /// equals `expected` (`0` meaning the file must not exist yet).
    pub fn write_if_revision(
        &self,
        key: &str,
        content: impl Into<String>,
        expected: u64,
    ) -> Result<u64, ActionError> {
        let key = checked_key("write_file", key)?;
        let mut files = self.write_guard();
        let found = files.get(key).map(|f| f.revision).unwrap_or(0);
        if found != expected {
            tracing::debug!(key, expected, found, "revision check failed");
            return Err(ActionError::RevisionConflict {
                key: key.to_string(),
                expected,
                found,
            });
        }
        Ok(commit(&mut files, key, content.into()))
    }

    /// Replaces `old` with `new` inside an existing file. Without
    /// `replace_all` the match must be unique. Returns the new revision and
    /// the number of replacements made.
    pub fn edit(
        &self,
        key: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<(u64, usize), ActionError> {
        let key = checked_key("edit_file", key)?;
        if old.is_empty() {
            return Err(ActionError::validation("edit_file", "old_string must not be empty"));
        }
        let mut files = self.write_guard();
        let existing = files
            .get(key)
            .ok_or_else(|| ActionError::NotFound(key.to_string()))?;

        let occurrences = existing.content.matches(old).count();
        if occurrences == 0 {
            return Err(ActionError::validation(
                "edit_file",
                format!("string not found in '{key}': '{old}'"),
            ));
        }
        if occurrences > 1 && !replace_all {
            return Err(ActionError::validation(
                "edit_file",
                format!(
                    "string '{old}' appears {occurrences} times in '{key}'; use replace_all=true or give more context"
                ),
            ));
        }

        let (updated, replaced) = if replace_all {
            (existing.content.replace(old, new), occurrences)
        } else {
            (existing.content.replacen(old, new, 1), 1)
        };
        let revision = commit(&mut files, key, updated);
        Ok((revision, replaced))
    }

    pub fn read(&self, key: &str) -> Result<String, ActionError> {
        self.read_guard()
            .get(key)
            .map(|f| f.content.clone())
            .ok_or_else(|| ActionError::NotFound(key.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<VirtualFile> {
        self.read_guard().get(key).cloned()
    }

    pub fn revision(&self, key: &str) -> Option<u64> {
        self.read_guard().get(key).map(|f| f.revision)
    }

    /// Sorted list of every key in the store.
    pub fn list(&self) -> Vec<String> {
        self.read_guard().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read_guard()
            .iter()
            .map(|(k, f)| (k.clone(), f.content.clone()))
            .collect()
    }

    pub fn revisions(&self) -> BTreeMap<String, u64> {
        self.read_guard()
            .iter()
            .map(|(k, f)| (k.clone(), f.revision))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_guard().is_empty()
    }

    // A panic while holding the lock cannot leave a half-written entry:
    // every mutation is a single map insert.
    fn read_guard(&self) -> RwLockReadGuard<'_, BTreeMap<String, VirtualFile>> {
        self.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, BTreeMap<String, VirtualFile>> {
        self.files.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn checked_key<'a>(action: &str, key: &'a str) -> Result<&'a str, ActionError> {
    if key.trim().is_empty() {
        Err(ActionError::validation(action, "file key must not be empty"))
    } else {
        Ok(key)
    }
}

fn commit(files: &mut BTreeMap<String, VirtualFile>, key: &str, content: String) -> u64 {
    let revision = files.get(key).map(|f| f.revision).unwrap_or(0) + 1;
    files.insert(
        key.to_string(),
        VirtualFile {
            content,
            revision,
            updated_at: Utc::now(),
        },
    );
    revision
}
