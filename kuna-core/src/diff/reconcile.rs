use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::calendar_store::CalendarStore;
use crate::dates::EntryTimes;
use crate::diff::{DiffKind, EntryChange, EntryDiff};
use crate::entry::{CalendarId, Entry, EntryDraft, EntryFields, EntryId};
use crate::error::{KunaError, KunaResult};
use crate::state::IdentifierMap;
use crate::tag::OwnershipTag;
use crate::task::{Task, TaskId};

/// What one task's entry should look like after the pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredEntry {
    pub tag: OwnershipTag,
    pub calendar_id: CalendarId,
    pub fields: EntryFields,
}

impl DesiredEntry {
    pub fn for_task(task: &Task, calendar_id: &str, times: EntryTimes) -> Self {
        let tag = OwnershipTag::new(task.id, task.project_id);
        DesiredEntry {
            tag,
            calendar_id: calendar_id.to_string(),
            fields: EntryFields {
                title: task.title.clone(),
                notes: Some(tag.compose_notes(&task.description)),
                url: Some(tag.url()),
                start: times.start,
                end: times.end,
                all_day: times.all_day,
                reminders: task.reminders.clone(),
            },
        }
    }

    /// Keep what the calendar currently shows for this task, with both tag
    /// channels restored.
    pub fn keep_entry(tag: OwnershipTag, calendar_id: &str, entry: &Entry) -> Self {
        let mut fields = entry.fields.clone();
        fields.notes = Some(tag.compose_notes(&entry.fields.description()));
        fields.url = Some(tag.url());
        DesiredEntry {
            tag,
            calendar_id: calendar_id.to_string(),
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

impl std::ops::AddAssign for ReconcileOutcome {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.removed += other.removed;
    }
}

/// The changes that turn the existing owned entries into the desired set.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub diffs: Vec<EntryDiff>,
    /// Tasks whose current entry is kept (updated in place or untouched)
    pub matched: BTreeMap<TaskId, EntryId>,
}

impl ReconcilePlan {
    /// Compare `desired` against `existing`.
    ///
    /// Entries without a readable ownership tag are never looked at again.
    /// Each task keeps at most one entry, in its desired calendar, preferring
    /// the one the identifier map already points at. Every other owned entry
    /// is removed.
    pub fn build(
        desired: &BTreeMap<TaskId, DesiredEntry>,
        existing: &[Entry],
        id_map: &IdentifierMap,
    ) -> Self {
        let mut diffs = Vec::new();
        let mut owned: BTreeMap<TaskId, Vec<&Entry>> = BTreeMap::new();

        for entry in existing {
            if let Some(tag) = OwnershipTag::decode(&entry.fields) {
                owned.entry(tag.task_id).or_default().push(entry);
            }
        }

        let mut matched = BTreeMap::new();
        for (task_id, want) in desired {
            let mut candidates = owned.remove(task_id).unwrap_or_default();
            let mapped = id_map.entry_id(*task_id);

            let keeper = candidates
                .iter()
                .position(|e| e.calendar_id == want.calendar_id && Some(&e.id) == mapped)
                .or_else(|| {
                    candidates
                        .iter()
                        .position(|e| e.calendar_id == want.calendar_id)
                });

            match keeper {
                Some(index) => {
                    let kept = candidates.remove(index);
                    if kept.fields.differs_from(&want.fields) {
                        diffs.push(EntryDiff::update(
                            *task_id,
                            kept.clone(),
                            kept.update_with(want.fields.clone()),
                        ));
                    }
                    matched.insert(*task_id, kept.id.clone());
                }
                None => diffs.push(EntryDiff::create(
                    *task_id,
                    EntryDraft {
                        id: None,
                        calendar_id: want.calendar_id.clone(),
                        fields: want.fields.clone(),
                    },
                )),
            }

            for extra in candidates {
                diffs.push(EntryDiff::delete(Some(*task_id), extra.clone()));
            }
        }

        for (task_id, leftovers) in owned {
            for entry in leftovers {
                diffs.push(EntryDiff::delete(Some(task_id), entry.clone()));
            }
        }

        ReconcilePlan { diffs, matched }
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn outcome(&self) -> ReconcileOutcome {
        let count = |kind: DiffKind| self.diffs.iter().filter(|d| d.kind() == kind).count();
        ReconcileOutcome {
            created: count(DiffKind::Create),
            updated: count(DiffKind::Update),
            removed: count(DiffKind::Delete),
        }
    }

    /// Stage every change and return the identifier map that holds once the
    /// batch is committed.
    fn stage<S: CalendarStore>(&self, store: &mut S) -> KunaResult<IdentifierMap> {
        let mut map = IdentifierMap::default();
        for (task_id, entry_id) in &self.matched {
            map.add(*task_id, entry_id.clone());
        }

        for diff in &self.diffs {
            match &diff.change {
                EntryChange::Create(draft) => {
                    let id = store.save(draft.clone())?;
                    if let Some(task_id) = diff.task_id {
                        map.add(task_id, id);
                    }
                }
                EntryChange::Update { new, .. } => {
                    store.save(new.clone())?;
                }
                EntryChange::Delete(old) => store.remove(old)?,
            }
        }

        Ok(map)
    }
}

/// Bring the owned entries in `existing` in line with `desired`, committing
/// all changes as one batch.
///
/// `id_map` is replaced only after the commit succeeds. If staging or the
/// commit fails, nothing is written and the map is left as it was.
#[instrument(skip_all, fields(desired = desired.len(), existing = existing.len()))]
pub async fn reconcile<S: CalendarStore>(
    store: &mut S,
    desired: &BTreeMap<TaskId, DesiredEntry>,
    existing: &[Entry],
    id_map: &mut IdentifierMap,
) -> KunaResult<ReconcileOutcome> {
    let plan = ReconcilePlan::build(desired, existing, id_map);
    let outcome = plan.outcome();

    for diff in &plan.diffs {
        debug!(%diff, task = ?diff.task_id, "planned");
    }

    let staged = match plan.stage(store) {
        Ok(map) => map,
        Err(e) => {
            store.reset();
            return Err(e);
        }
    };

    if !plan.is_empty() {
        if let Err(e) = store.commit().await {
            store.reset();
            return Err(match e {
                KunaError::PermissionDenied | KunaError::StoreCommitFailed(_) => e,
                other => KunaError::StoreCommitFailed(other.to_string()),
            });
        }
    }

    *id_map = staged;

    info!(
        created = outcome.created,
        updated = outcome.updated,
        removed = outcome.removed,
        "reconciled calendar entries"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar_store::StoreCalendar;
    use crate::dates::map_dates;
    use crate::testing::{MemoryStore, at, foreign_fields, task};
    use chrono::Duration;
    use chrono_tz::Tz;

    fn desired_for(tasks: &[Task], calendar: &StoreCalendar) -> BTreeMap<TaskId, DesiredEntry> {
        tasks
            .iter()
            .filter_map(|t| {
                let times = map_dates(t, Tz::UTC)?;
                Some((t.id, DesiredEntry::for_task(t, &calendar.id, times)))
            })
            .collect()
    }

    fn all(store: &MemoryStore) -> Vec<Entry> {
        store.entries.values().cloned().collect()
    }

    async fn run(
        store: &mut MemoryStore,
        desired: &BTreeMap<TaskId, DesiredEntry>,
        id_map: &mut IdentifierMap,
    ) -> ReconcileOutcome {
        let existing = all(store);
        reconcile(store, desired, &existing, id_map).await.unwrap()
    }

    #[tokio::test]
    async fn creates_tagged_entry_for_new_task() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let mut id_map = IdentifierMap::default();

        let mut t = task(42, 7, Some(at(2025, 3, 1, 10, 0)));
        t.title = "Write report".to_string();
        let outcome = run(&mut store, &desired_for(&[t], &calendar), &mut id_map).await;

        assert_eq!(outcome.created, 1);
        let entries = store.entries_in(&calendar.id);
        assert_eq!(entries.len(), 1);
        let entry = entries[0];
        assert_eq!(entry.fields.title, "Write report");
        assert_eq!(entry.fields.start, at(2025, 3, 1, 9, 0));
        assert_eq!(entry.fields.end, at(2025, 3, 1, 10, 0));
        assert_eq!(entry.fields.url.as_deref(), Some("kuna://task/42?project=7"));
        assert!(
            entry
                .fields
                .notes
                .as_deref()
                .unwrap()
                .contains("KUNA_EVENT: task=42 project=7")
        );
        assert_eq!(id_map.entry_id(42), Some(&entry.id));
    }

    #[tokio::test]
    async fn second_pass_changes_nothing() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let mut id_map = IdentifierMap::default();
        let tasks = vec![
            task(1, 7, Some(at(2025, 3, 1, 10, 0))),
            task(2, 7, Some(at(2025, 3, 2, 10, 0))),
        ];
        let desired = desired_for(&tasks, &calendar);

        run(&mut store, &desired, &mut id_map).await;
        let commits = store.commits;
        let outcome = run(&mut store, &desired, &mut id_map).await;

        assert!(outcome.is_empty());
        assert_eq!(store.commits, commits);
        assert_eq!(id_map.len(), 2);
    }

    #[tokio::test]
    async fn completing_a_due_only_task_makes_it_all_day() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let mut id_map = IdentifierMap::default();
        let mut t = task(42, 7, Some(at(2025, 3, 1, 10, 0)));
        run(&mut store, &desired_for(&[t.clone()], &calendar), &mut id_map).await;

        t.done = true;
        let outcome = run(&mut store, &desired_for(&[t], &calendar), &mut id_map).await;

        assert_eq!(outcome.updated, 1);
        let entry = store.entries_in(&calendar.id)[0];
        assert!(entry.fields.all_day);
        assert_eq!(entry.fields.start, at(2025, 3, 1, 0, 0));
        assert_eq!(entry.fields.end, at(2025, 3, 2, 0, 0));
    }

    #[tokio::test]
    async fn removed_task_loses_its_entry_and_map_row() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let mut id_map = IdentifierMap::default();
        let tasks = vec![
            task(1, 7, Some(at(2025, 3, 1, 10, 0))),
            task(2, 7, Some(at(2025, 3, 2, 10, 0))),
        ];
        run(&mut store, &desired_for(&tasks, &calendar), &mut id_map).await;

        let outcome = run(&mut store, &desired_for(&tasks[1..], &calendar), &mut id_map).await;

        assert_eq!(outcome.removed, 1);
        assert_eq!(store.entries.len(), 1);
        assert_eq!(id_map.entry_id(1), None);
        assert!(id_map.entry_id(2).is_some());
    }

    #[tokio::test]
    async fn foreign_entries_are_never_touched() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let dentist = store.insert(&calendar.id, foreign_fields("Dentist", at(2025, 3, 1, 9, 0)));
        let mut untagged = foreign_fields("Standup", at(2025, 3, 1, 10, 0));
        untagged.notes = Some("task=42 project=7".to_string());
        untagged.url = None;
        let standup = store.insert(&calendar.id, untagged);
        let mut id_map = IdentifierMap::default();

        let tasks = vec![task(42, 7, Some(at(2025, 3, 1, 10, 0)))];
        run(&mut store, &desired_for(&tasks, &calendar), &mut id_map).await;
        run(&mut store, &BTreeMap::new(), &mut id_map).await;

        assert!(store.entries.contains_key(&dentist));
        assert!(store.entries.contains_key(&standup));
        assert!(!store.touched.contains(&dentist));
        assert!(!store.touched.contains(&standup));
        assert!(store.owned_entries().is_empty());
    }

    #[tokio::test]
    async fn duplicates_collapse_to_the_mapped_entry() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let t = task(5, 7, Some(at(2025, 3, 1, 10, 0)));
        let desired = desired_for(&[t], &calendar);
        let fields = desired[&5].fields.clone();
        let first = store.insert(&calendar.id, fields.clone());
        let second = store.insert(&calendar.id, fields);

        let mut id_map = IdentifierMap::default();
        id_map.add(5, second.clone());
        let outcome = run(&mut store, &desired, &mut id_map).await;

        assert_eq!(outcome.removed, 1);
        assert!(!store.entries.contains_key(&first));
        assert!(store.entries.contains_key(&second));
        assert_eq!(id_map.entry_id(5), Some(&second));
    }

    #[tokio::test]
    async fn entry_in_the_wrong_calendar_is_moved() {
        let mut store = MemoryStore::new();
        let old = store.add_calendar("Kuna – Home");
        let new = store.add_calendar("Kuna – Work");
        let t = task(5, 7, Some(at(2025, 3, 1, 10, 0)));
        let mut id_map = IdentifierMap::default();
        run(&mut store, &desired_for(&[t.clone()], &old), &mut id_map).await;

        let outcome = run(&mut store, &desired_for(&[t], &new), &mut id_map).await;

        assert_eq!((outcome.created, outcome.removed), (1, 1));
        assert!(store.entries_in(&old.id).is_empty());
        assert_eq!(store.entries_in(&new.id).len(), 1);
    }

    #[tokio::test]
    async fn look_alike_tags_are_left_alone() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");

        let mut note = foreign_fields("Call Bob", at(2025, 3, 1, 9, 0));
        note.notes = Some("KUNA_EVENT: call Bob".to_string());
        let note_id = store.insert(&calendar.id, note);

        let mut link = foreign_fields("Settings", at(2025, 3, 2, 9, 0));
        link.url = Some("kuna://settings".to_string());
        let link_id = store.insert(&calendar.id, link);

        let mut broken = foreign_fields("Half tagged", at(2025, 3, 3, 9, 0));
        broken.url = Some("kuna://task/not-a-number".to_string());
        let broken_id = store.insert(&calendar.id, broken);

        let outcome = run(&mut store, &BTreeMap::new(), &mut IdentifierMap::default()).await;

        assert_eq!(outcome.removed, 0);
        assert!(store.entries.contains_key(&note_id));
        assert!(store.entries.contains_key(&link_id));
        assert!(store.entries.contains_key(&broken_id));
    }

    #[tokio::test]
    async fn lost_url_is_repaired_in_place() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let mut id_map = IdentifierMap::default();
        let desired = desired_for(&[task(42, 7, Some(at(2025, 3, 1, 10, 0)))], &calendar);
        run(&mut store, &desired, &mut id_map).await;

        let id = id_map.entry_id(42).unwrap().clone();
        store.edit(&id, at(2025, 3, 1, 0, 0), |f| f.url = None);
        let outcome = run(&mut store, &desired, &mut id_map).await;

        assert_eq!(outcome.updated, 1);
        assert_eq!(
            store.entries[&id].fields.url.as_deref(),
            Some("kuna://task/42?project=7")
        );
    }

    #[tokio::test]
    async fn failed_commit_leaves_store_and_map_untouched() {
        let mut store = MemoryStore::new();
        let calendar = store.add_calendar("Kuna");
        let mut id_map = IdentifierMap::default();
        id_map.add(99, "stale".to_string());
        store.fail_commit = true;

        let desired = desired_for(&[task(1, 7, Some(at(2025, 3, 1, 10, 0)))], &calendar);
        let result = reconcile(&mut store, &desired, &[], &mut id_map).await;

        assert!(matches!(result, Err(KunaError::StoreCommitFailed(_))));
        assert!(store.entries.is_empty());
        assert_eq!(store.pending_len(), 0);
        assert_eq!(id_map.entry_id(99).map(String::as_str), Some("stale"));
    }

    #[tokio::test]
    async fn staging_failure_resets_the_batch() {
        let mut store = MemoryStore::new();
        store.add_calendar("Kuna");
        let ghost = StoreCalendar {
            id: "gone".to_string(),
            name: "Gone".to_string(),
            source_id: "local".to_string(),
        };
        let mut id_map = IdentifierMap::default();

        let desired = desired_for(&[task(1, 7, Some(at(2025, 3, 1, 10, 0)))], &ghost);
        let result = reconcile(&mut store, &desired, &[], &mut id_map).await;

        assert!(result.is_err());
        assert_eq!(store.pending_len(), 0);
        assert!(id_map.is_empty());
    }

    #[test]
    fn plan_counts_by_kind() {
        let calendar = StoreCalendar {
            id: "cal".to_string(),
            name: "Kuna".to_string(),
            source_id: "local".to_string(),
        };
        let t = task(1, 7, Some(at(2025, 3, 1, 10, 0)));
        let desired = desired_for(&[t], &calendar);

        let mut moved = desired[&1].fields.clone();
        moved.start = moved.start - Duration::hours(2);
        let existing = vec![Entry {
            id: "e1".to_string(),
            calendar_id: "cal".to_string(),
            fields: moved,
            last_modified: None,
        }];

        let plan = ReconcilePlan::build(&desired, &existing, &IdentifierMap::default());
        assert_eq!(
            plan.outcome(),
            ReconcileOutcome {
                created: 0,
                updated: 1,
                removed: 0
            }
        );
        assert_eq!(plan.matched.get(&1).map(String::as_str), Some("e1"));
    }
}
