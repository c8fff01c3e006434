//! Moving owned entries between calendars when the sync mode changes.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::calendar_store::{CalendarStore, StoreCalendar};
use crate::entry::Entry;
use crate::error::{KunaError, KunaResult};
use crate::preferences::{ScopeKey, SyncMode};
use crate::state::IdentifierMap;
use crate::tag::OwnershipTag;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub moved: usize,
    /// Owned entries with no resolved target calendar
    pub skipped: usize,
}

/// Copy every owned entry into its calendar under `to`, then remove the
/// originals.
///
/// Copies and removals are committed as two separate batches, copies first,
/// so an interrupted migration leaves duplicates (collapsed by the next
/// reconciliation) rather than losing entries.
#[instrument(skip_all, fields(%from, %to, entries = entries.len()))]
pub async fn migrate<S: CalendarStore>(
    store: &mut S,
    entries: &[Entry],
    from: SyncMode,
    to: SyncMode,
    targets: &BTreeMap<ScopeKey, StoreCalendar>,
    id_map: &mut IdentifierMap,
) -> KunaResult<MigrationOutcome> {
    let mut outcome = MigrationOutcome::default();
    if from == to {
        return Ok(outcome);
    }

    let mut moves = Vec::new();
    for entry in entries {
        let Some(tag) = OwnershipTag::decode(&entry.fields) else {
            continue;
        };
        let scope = match to {
            SyncMode::Single => ScopeKey::Single,
            SyncMode::PerProject => ScopeKey::Project(tag.project_id),
        };
        let Some(target) = targets.get(&scope) else {
            debug!(entry = %entry, %scope, "no calendar for scope");
            outcome.skipped += 1;
            continue;
        };
        if entry.calendar_id != target.id {
            moves.push((tag, entry, target));
        }
    }

    if moves.is_empty() {
        return Ok(outcome);
    }

    let mut copies = Vec::with_capacity(moves.len());
    for (tag, entry, target) in &moves {
        match store.save(entry.copy_to(&target.id)) {
            Ok(id) => copies.push((tag.task_id, id)),
            Err(e) => {
                store.reset();
                return Err(e);
            }
        }
    }
    commit(store).await?;

    for (task_id, id) in copies {
        id_map.add(task_id, id);
    }

    for (_, entry, _) in &moves {
        if let Err(e) = store.remove(entry) {
            store.reset();
            return Err(e);
        }
    }
    commit(store).await?;

    outcome.moved = moves.len();
    info!(moved = outcome.moved, skipped = outcome.skipped, "migrated entries");
    Ok(outcome)
}

async fn commit<S: CalendarStore>(store: &mut S) -> KunaResult<()> {
    store.commit().await.map_err(|e| {
        store.reset();
        match e {
            KunaError::PermissionDenied | KunaError::StoreCommitFailed(_) => e,
            other => KunaError::StoreCommitFailed(other.to_string()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::map_dates;
    use crate::diff::DesiredEntry;
    use crate::testing::{MemoryStore, at, foreign_fields, task};
    use crate::task::TaskId;
    use chrono_tz::Tz;
    use std::collections::BTreeSet;

    struct Fixture {
        store: MemoryStore,
        targets_single: BTreeMap<ScopeKey, StoreCalendar>,
        targets_projects: BTreeMap<ScopeKey, StoreCalendar>,
    }

    fn fixture() -> Fixture {
        let mut store = MemoryStore::new();
        let single = store.add_calendar("Kuna");
        let work = store.add_calendar("Kuna – Work");
        let home = store.add_calendar("Kuna – Home");

        for (id, project) in [(1, 7), (2, 7), (3, 8)] {
            let t = task(id, project, Some(at(2025, 3, id as u32, 10, 0)));
            let times = map_dates(&t, Tz::UTC).unwrap();
            let fields = DesiredEntry::for_task(&t, &single.id, times).fields;
            store.insert(&single.id, fields);
        }

        Fixture {
            store,
            targets_single: BTreeMap::from([(ScopeKey::Single, single)]),
            targets_projects: BTreeMap::from([
                (ScopeKey::Project(7), work),
                (ScopeKey::Project(8), home),
            ]),
        }
    }

    fn associations(store: &MemoryStore) -> BTreeSet<(TaskId, String)> {
        store
            .owned_entries()
            .into_iter()
            .filter_map(|e| {
                OwnershipTag::decode(&e.fields).map(|t| (t.task_id, e.calendar_id.clone()))
            })
            .collect()
    }

    fn snapshot(store: &MemoryStore) -> Vec<Entry> {
        store.entries.values().cloned().collect()
    }

    #[tokio::test]
    async fn single_to_per_project_moves_by_project() {
        let mut f = fixture();
        let mut id_map = IdentifierMap::default();
        let entries = snapshot(&f.store);

        let outcome = migrate(
            &mut f.store,
            &entries,
            SyncMode::Single,
            SyncMode::PerProject,
            &f.targets_projects,
            &mut id_map,
        )
        .await
        .unwrap();

        assert_eq!(outcome, MigrationOutcome { moved: 3, skipped: 0 });
        let work = &f.targets_projects[&ScopeKey::Project(7)].id;
        let home = &f.targets_projects[&ScopeKey::Project(8)].id;
        assert_eq!(f.store.entries_in(work).len(), 2);
        assert_eq!(f.store.entries_in(home).len(), 1);
        assert!(f.store.entries_in(&f.targets_single[&ScopeKey::Single].id).is_empty());
        assert_eq!(id_map.len(), 3);
        assert_eq!(f.store.commits, 2);
    }

    #[tokio::test]
    async fn round_trip_conserves_entries() {
        let mut f = fixture();
        let mut id_map = IdentifierMap::default();
        let before = associations(&f.store);

        let entries = snapshot(&f.store);
        migrate(
            &mut f.store,
            &entries,
            SyncMode::Single,
            SyncMode::PerProject,
            &f.targets_projects,
            &mut id_map,
        )
        .await
        .unwrap();
        let entries = snapshot(&f.store);
        migrate(
            &mut f.store,
            &entries,
            SyncMode::PerProject,
            SyncMode::Single,
            &f.targets_single,
            &mut id_map,
        )
        .await
        .unwrap();

        assert_eq!(associations(&f.store), before);
        assert_eq!(f.store.owned_entries().len(), 3);
    }

    #[tokio::test]
    async fn same_mode_is_a_no_op() {
        let mut f = fixture();
        let entries = snapshot(&f.store);
        let outcome = migrate(
            &mut f.store,
            &entries,
            SyncMode::PerProject,
            SyncMode::PerProject,
            &f.targets_projects,
            &mut IdentifierMap::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MigrationOutcome::default());
        assert_eq!(f.store.commits, 0);
    }

    #[tokio::test]
    async fn unresolved_targets_and_foreign_entries_stay_put() {
        let mut f = fixture();
        let single = f.targets_single[&ScopeKey::Single].id.clone();
        let foreign = f.store.insert(&single, foreign_fields("Lunch", at(2025, 3, 1, 12, 0)));
        let mut look_alike = foreign_fields("Call Bob", at(2025, 3, 1, 15, 0));
        look_alike.notes = Some("KUNA_EVENT: call Bob".to_string());
        let look_alike = f.store.insert(&single, look_alike);
        f.targets_projects.remove(&ScopeKey::Project(8));

        let entries = snapshot(&f.store);
        let outcome = migrate(
            &mut f.store,
            &entries,
            SyncMode::Single,
            SyncMode::PerProject,
            &f.targets_projects,
            &mut IdentifierMap::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, MigrationOutcome { moved: 2, skipped: 1 });
        assert_eq!(f.store.entries_in(&single).len(), 3);
        assert!(f.store.entries.contains_key(&foreign));
        assert!(!f.store.touched.contains(&foreign));
        assert!(!f.store.touched.contains(&look_alike));
    }

    #[tokio::test]
    async fn failed_copy_commit_loses_nothing() {
        let mut f = fixture();
        f.store.fail_commit = true;
        let before = associations(&f.store);

        let entries = snapshot(&f.store);
        let result = migrate(
            &mut f.store,
            &entries,
            SyncMode::Single,
            SyncMode::PerProject,
            &f.targets_projects,
            &mut IdentifierMap::default(),
        )
        .await;

        assert!(matches!(result, Err(KunaError::StoreCommitFailed(_))));
        assert_eq!(associations(&f.store), before);
    }
}
