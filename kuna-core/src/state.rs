//! Sync state tracking: which entry mirrors which task, and how far the
//! remote pull has progressed.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryId};
use crate::tag::OwnershipTag;
use crate::task::{Task, TaskId};

/// Task id <-> entry id lookup.
///
/// A cache only: the tags on the entries themselves are the ground truth.
/// The engine calls [`IdentifierMap::rebuild`] when it starts without a
/// persisted map. An entry id maps to at most one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<TaskId, EntryId>", into = "BTreeMap<TaskId, EntryId>")]
pub struct IdentifierMap {
    by_task: BTreeMap<TaskId, EntryId>,
    by_entry: HashMap<EntryId, TaskId>,
}

impl From<BTreeMap<TaskId, EntryId>> for IdentifierMap {
    fn from(by_task: BTreeMap<TaskId, EntryId>) -> Self {
        let by_entry = by_task.iter().map(|(t, e)| (e.clone(), *t)).collect();
        IdentifierMap { by_task, by_entry }
    }
}

impl From<IdentifierMap> for BTreeMap<TaskId, EntryId> {
    fn from(map: IdentifierMap) -> Self {
        map.by_task
    }
}

impl IdentifierMap {
    /// Scan entries for tags and map each task to its entry. If a task has
    /// several entries, the first one wins.
    pub fn rebuild(entries: &[Entry]) -> Self {
        let mut map = IdentifierMap::default();
        for entry in entries {
            if let Some(tag) = OwnershipTag::decode(&entry.fields) {
                if map.entry_id(tag.task_id).is_none() {
                    map.add(tag.task_id, entry.id.clone());
                }
            }
        }
        map
    }

    pub fn add(&mut self, task_id: TaskId, entry_id: EntryId) {
        if let Some(old) = self.by_task.insert(task_id, entry_id.clone()) {
            self.by_entry.remove(&old);
        }
        if let Some(old_task) = self.by_entry.insert(entry_id, task_id) {
            if old_task != task_id {
                self.by_task.remove(&old_task);
            }
        }
    }

    pub fn remove(&mut self, task_id: TaskId) -> Option<EntryId> {
        let entry_id = self.by_task.remove(&task_id)?;
        self.by_entry.remove(&entry_id);
        Some(entry_id)
    }

    pub fn entry_id(&self, task_id: TaskId) -> Option<&EntryId> {
        self.by_task.get(&task_id)
    }

    pub fn len(&self) -> usize {
        self.by_task.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_task.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &EntryId)> {
        self.by_task.iter().map(|(t, e)| (*t, e))
    }

    pub fn clear(&mut self) {
        self.by_task.clear();
        self.by_entry.clear();
    }
}

/// Last known state of every mirrored task.
///
/// Incremental pulls only return tasks changed since the cursor, so the
/// desired set is built from this cache instead. A full pull replaces it,
/// which is how remote deletions show up.
pub type TaskCache = BTreeMap<TaskId, Task>;

/// High-water mark of remote task updates already mirrored locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor(Option<DateTime<Utc>>);

impl SyncCursor {
    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    /// Move the cursor forward. Returns false (and keeps the current value)
    /// if `to` is not later than what we already have.
    pub fn advance(&mut self, to: DateTime<Utc>) -> bool {
        match self.0 {
            Some(current) if to <= current => false,
            _ => {
                self.0 = Some(to);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryFields;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap()
    }

    fn owned(id: &str, task_id: TaskId) -> Entry {
        let tag = OwnershipTag::new(task_id, 1);
        Entry {
            id: id.to_string(),
            calendar_id: "cal".to_string(),
            fields: EntryFields {
                title: "t".to_string(),
                notes: Some(tag.compose_notes("")),
                url: Some(tag.url()),
                start: at(1),
                end: at(2),
                all_day: false,
                reminders: vec![],
            },
            last_modified: None,
        }
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut cursor = SyncCursor::default();
        assert_eq!(cursor.current(), None);

        assert!(cursor.advance(at(5)));
        assert!(!cursor.advance(at(3)));
        assert!(!cursor.advance(at(5)));
        assert_eq!(cursor.current(), Some(at(5)));

        assert!(cursor.advance(at(9)));
        assert_eq!(cursor.current(), Some(at(9)));
    }

    #[test]
    fn cursor_is_monotonic_for_any_order() {
        let days = [4, 1, 9, 2, 9, 7, 3];
        let mut cursor = SyncCursor::default();
        let mut seen_max = None;
        for day in days {
            cursor.advance(at(day));
            seen_max = seen_max.max(Some(at(day)));
            assert_eq!(cursor.current(), seen_max);
        }
    }

    #[test]
    fn remapping_a_task_drops_its_old_entry() {
        let mut map = IdentifierMap::default();
        map.add(42, "e1".to_string());
        assert_eq!(map.entry_id(42).map(String::as_str), Some("e1"));

        map.add(42, "e2".to_string());
        assert_eq!(map.entry_id(42).map(String::as_str), Some("e2"));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(42).as_deref(), Some("e2"));
        assert!(map.is_empty());
    }

    #[test]
    fn an_entry_belongs_to_one_task() {
        let mut map = IdentifierMap::default();
        map.add(1, "shared".to_string());
        map.add(2, "shared".to_string());
        assert_eq!(map.entry_id(1), None);
        assert_eq!(map.entry_id(2).map(String::as_str), Some("shared"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn rebuild_from_tags() {
        let entries = vec![owned("a", 1), owned("b", 2), owned("dup", 1)];
        let map = IdentifierMap::rebuild(&entries);
        assert_eq!(map.len(), 2);
        assert_eq!(map.entry_id(1).map(String::as_str), Some("a"));
        assert_eq!(map.entry_id(2).map(String::as_str), Some("b"));
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut map = IdentifierMap::default();
        map.add(42, "e1".to_string());
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"42":"e1"}"#);

        let back: IdentifierMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
