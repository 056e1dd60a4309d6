//! Ordered, append-only sequence of transform ids with a set-membership
//! index (§3 TransformLog). Every mutation emits an event naming the
//! discarded ids; `Source` wires these onto its `EventBus` as `"truncate"`,
//! `"rollback"`, and `"clear"`.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{OrbitError, Result};

/// What a mutating log operation discarded, for the emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ids", rename_all = "camelCase")]
pub enum LogEvent {
    Truncated(Vec<String>),
    RolledBack(Vec<String>),
    Cleared(Vec<String>),
}

#[derive(Debug, Default)]
pub struct TransformLog {
    entries: Vec<String>,
    index: HashSet<String>,
}

impl TransformLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id`. Caller must ensure uniqueness (I1); violating it is a
    /// programmer error, not a recoverable one.
    pub fn append(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if self.index.contains(&id) {
            return Err(OrbitError::Assertion(format!(
                "transform {id} already appended to this log"
            )));
        }
        self.index.insert(id.clone());
        self.entries.push(id);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn head(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e == id)
            .ok_or_else(|| OrbitError::NotLogged(id.to_string()))
    }

    /// Entries strictly after `id`, in order.
    pub fn after(&self, id: &str) -> Result<Vec<String>> {
        let pos = self.position(id)?;
        Ok(self.entries[pos + 1..].to_vec())
    }

    /// Entries strictly before `id`, in order.
    pub fn before(&self, id: &str) -> Result<Vec<String>> {
        let pos = self.position(id)?;
        Ok(self.entries[..pos].to_vec())
    }

    fn resolve(&self, id: &str, relative: isize) -> Result<usize> {
        let pos = self.position(id)? as isize;
        let target = pos + relative;
        if target < 0 || target as usize >= self.entries.len() {
            return Err(OrbitError::OutOfRange {
                id: id.to_string(),
                relative,
            });
        }
        Ok(target as usize)
    }

    /// Discard every entry at and before the marker (optionally offset by
    /// `relative`). Returns the discarded ids.
    pub fn truncate(&mut self, id: &str, relative: isize) -> Result<Vec<String>> {
        let target = self.resolve(id, relative)?;
        let discarded: Vec<String> = self.entries.drain(..=target).collect();
        for d in &discarded {
            self.index.remove(d);
        }
        Ok(discarded)
    }

    /// Discard every entry strictly after the marker (optionally offset by
    /// `relative`). Returns the discarded ids.
    pub fn rollback(&mut self, id: &str, relative: isize) -> Result<Vec<String>> {
        let target = self.resolve(id, relative)?;
        let discarded: Vec<String> = self.entries.drain(target + 1..).collect();
        for d in &discarded {
            self.index.remove(d);
        }
        Ok(discarded)
    }

    /// Discard everything. Returns the discarded ids.
    pub fn clear(&mut self) -> Vec<String> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}
