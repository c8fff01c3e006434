//! In-memory calendar store and task service for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

use crate::calendar_store::{CalendarStore, Source, SourceKind, StoreCalendar};
use crate::config::EngineConfig;
use crate::entry::{CalendarId, Entry, EntryDraft, EntryFields, EntryId};
use crate::error::{KunaError, KunaResult};
use crate::remote::TaskService;
use crate::task::{Project, ProjectId, Task, TaskId, TaskPatch};

pub fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
}

pub fn task(id: TaskId, project_id: ProjectId, due: Option<DateTime<Utc>>) -> Task {
    Task {
        id,
        project_id,
        title: format!("Task {id}"),
        description: String::new(),
        start: None,
        due,
        end: None,
        reminders: vec![],
        done: false,
        updated: at(2025, 2, 1, 0, 0),
    }
}

/// Engine settings with a window wide enough that fixture dates always fall
/// inside it.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        app_name: "Kuna".to_string(),
        time_zone: Tz::UTC,
        window_past: Duration::days(3650),
        window_future: Duration::days(3650),
        full_refresh: Duration::hours(24),
        debounce: std::time::Duration::from_millis(50),
    }
}

/// Plain foreign entry fields, as another app would write them.
pub fn foreign_fields(title: &str, start: DateTime<Utc>) -> EntryFields {
    EntryFields {
        title: title.to_string(),
        notes: Some("Bring snacks".to_string()),
        url: Some("https://example.com/meeting".to_string()),
        start,
        end: start + Duration::hours(1),
        all_day: false,
        reminders: vec![],
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Save(EntryId, EntryDraft),
    Remove(EntryId),
    RemoveCalendar(CalendarId),
}

#[derive(Debug)]
pub struct MemoryStore {
    pub granted: bool,
    pub deny_access: bool,
    pub sources: Vec<Source>,
    pub calendars: BTreeMap<CalendarId, StoreCalendar>,
    pub entries: BTreeMap<EntryId, Entry>,
    pub fail_commit: bool,
    /// Calendar names whose creation fails
    pub fail_ensure: BTreeSet<String>,
    pub commits: usize,
    /// Entry ids written or removed by committed batches, in order
    pub touched: Vec<EntryId>,
    /// Modification time stamped on committed saves
    pub now: DateTime<Utc>,
    pending: Vec<Pending>,
    next_id: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            granted: true,
            deny_access: false,
            sources: vec![Source {
                id: "local".to_string(),
                title: "On My Computer".to_string(),
                kind: SourceKind::Local,
                writable: true,
            }],
            calendars: BTreeMap::new(),
            entries: BTreeMap::new(),
            fail_commit: false,
            fail_ensure: BTreeSet::new(),
            commits: 0,
            touched: vec![],
            now: at(2025, 1, 1, 0, 0),
            pending: vec![],
            next_id: 1,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store without granted access.
    pub fn locked() -> Self {
        MemoryStore {
            granted: false,
            ..Self::default()
        }
    }

    fn next(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}-{}", self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_calendar(&mut self, name: &str) -> StoreCalendar {
        let calendar = StoreCalendar {
            id: self.next("cal"),
            name: name.to_string(),
            source_id: "local".to_string(),
        };
        self.calendars.insert(calendar.id.clone(), calendar.clone());
        calendar
    }

    pub fn calendar_named(&self, name: &str) -> Option<&StoreCalendar> {
        self.calendars.values().find(|c| c.name == name)
    }

    /// Insert an entry directly, bypassing staging (another app or the user
    /// editing the calendar).
    pub fn insert(&mut self, calendar_id: &str, fields: EntryFields) -> EntryId {
        let id = self.next("entry");
        self.entries.insert(
            id.clone(),
            Entry {
                id: id.clone(),
                calendar_id: calendar_id.to_string(),
                fields,
                last_modified: Some(self.now),
            },
        );
        id
    }

    /// Edit an entry directly, as the user would.
    pub fn edit(&mut self, id: &str, at: DateTime<Utc>, edit: impl FnOnce(&mut EntryFields)) {
        let entry = self.entries.get_mut(id).unwrap();
        edit(&mut entry.fields);
        entry.last_modified = Some(at);
    }

    pub fn entries_in(&self, calendar_id: &str) -> Vec<&Entry> {
        self.entries
            .values()
            .filter(|e| e.calendar_id == calendar_id)
            .collect()
    }

    pub fn owned_entries(&self) -> Vec<&Entry> {
        self.entries
            .values()
            .filter(|e| crate::tag::is_owned(&e.fields))
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl CalendarStore for MemoryStore {
    async fn request_access(&mut self) -> KunaResult<()> {
        if self.deny_access {
            self.granted = false;
            return Err(KunaError::PermissionDenied);
        }
        self.granted = true;
        Ok(())
    }

    fn has_access(&self) -> bool {
        self.granted
    }

    fn sources(&self) -> Vec<Source> {
        self.sources.clone()
    }

    fn ensure_calendar(&mut self, name: &str, source: &Source) -> KunaResult<StoreCalendar> {
        if self.fail_ensure.contains(name) {
            return Err(KunaError::Store(format!("cannot create '{name}'")));
        }
        if let Some(existing) = self
            .calendars
            .values()
            .find(|c| c.name == name && c.source_id == source.id)
        {
            return Ok(existing.clone());
        }
        let calendar = StoreCalendar {
            id: self.next("cal"),
            name: name.to_string(),
            source_id: source.id.clone(),
        };
        self.calendars.insert(calendar.id.clone(), calendar.clone());
        Ok(calendar)
    }

    fn calendars(&self, ids: &[CalendarId]) -> Vec<StoreCalendar> {
        ids.iter()
            .filter_map(|id| self.calendars.get(id).cloned())
            .collect()
    }

    fn rename_calendar(
        &mut self,
        calendar: &StoreCalendar,
        name: &str,
    ) -> KunaResult<StoreCalendar> {
        let stored = self
            .calendars
            .get_mut(&calendar.id)
            .ok_or_else(|| KunaError::CalendarUnavailable(calendar.name.clone()))?;
        stored.name = name.to_string();
        Ok(stored.clone())
    }

    fn entries(
        &self,
        calendars: &[StoreCalendar],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> KunaResult<Vec<Entry>> {
        if !self.granted {
            return Err(KunaError::PermissionDenied);
        }
        let ids: BTreeSet<&str> = calendars.iter().map(|c| c.id.as_str()).collect();
        Ok(self
            .entries
            .values()
            .filter(|e| ids.contains(e.calendar_id.as_str()) && e.fields.overlaps(start, end))
            .cloned()
            .collect())
    }

    fn save(&mut self, draft: EntryDraft) -> KunaResult<EntryId> {
        if !self.calendars.contains_key(&draft.calendar_id) {
            return Err(KunaError::CalendarUnavailable(draft.calendar_id));
        }
        let id = match &draft.id {
            Some(id) if self.entries.contains_key(id) => id.clone(),
            Some(id) => return Err(KunaError::Store(format!("no entry {id}"))),
            None => self.next("entry"),
        };
        self.pending.push(Pending::Save(id.clone(), draft));
        Ok(id)
    }

    fn remove(&mut self, entry: &Entry) -> KunaResult<()> {
        self.pending.push(Pending::Remove(entry.id.clone()));
        Ok(())
    }

    fn remove_calendar(&mut self, calendar: &StoreCalendar) -> KunaResult<()> {
        self.pending.push(Pending::RemoveCalendar(calendar.id.clone()));
        Ok(())
    }

    async fn commit(&mut self) -> KunaResult<()> {
        let pending = std::mem::take(&mut self.pending);
        if self.fail_commit {
            return Err(KunaError::StoreCommitFailed("injected failure".to_string()));
        }
        for op in pending {
            match op {
                Pending::Save(id, draft) => {
                    self.touched.push(id.clone());
                    self.entries.insert(
                        id.clone(),
                        Entry {
                            id,
                            calendar_id: draft.calendar_id,
                            fields: draft.fields,
                            last_modified: Some(self.now),
                        },
                    );
                }
                Pending::Remove(id) => {
                    if self.entries.remove(&id).is_some() {
                        self.touched.push(id);
                    }
                }
                Pending::RemoveCalendar(id) => {
                    self.calendars.remove(&id);
                    self.entries.retain(|_, e| e.calendar_id != id);
                }
            }
        }
        self.commits += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Task service backed by a map, recording every call.
#[derive(Debug, Default)]
pub struct FakeTasks {
    pub tasks: Mutex<BTreeMap<TaskId, Task>>,
    pub projects: Mutex<Vec<Project>>,
    pub patches: Mutex<Vec<(TaskId, TaskPatch)>>,
    /// `updated_since` of every task fetch
    pub fetches: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub fail_fetch: AtomicBool,
    pub fail_patch: AtomicBool,
    /// `updated` stamped on patched tasks
    pub clock: Mutex<Option<DateTime<Utc>>>,
}

impl FakeTasks {
    pub fn with(tasks: Vec<Task>) -> Self {
        let fake = FakeTasks::default();
        for task in tasks {
            fake.upsert(task);
        }
        fake
    }

    pub fn upsert(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    pub fn delete(&self, id: TaskId) {
        self.tasks.lock().unwrap().remove(&id);
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn add_project(&self, id: ProjectId, title: &str) {
        self.projects.lock().unwrap().push(Project {
            id,
            title: title.to_string(),
        });
    }

    pub fn patches(&self) -> Vec<(TaskId, TaskPatch)> {
        self.patches.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<Option<DateTime<Utc>>> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_patch(&self, fail: bool) {
        self.fail_patch.store(fail, Ordering::SeqCst);
    }
}

impl TaskService for FakeTasks {
    async fn fetch_projects(&self) -> KunaResult<Vec<Project>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(KunaError::RemoteFetchFailed("offline".to_string()));
        }
        Ok(self.projects.lock().unwrap().clone())
    }

    async fn fetch_tasks(
        &self,
        projects: &BTreeSet<ProjectId>,
        updated_since: Option<DateTime<Utc>>,
    ) -> KunaResult<Vec<Task>> {
        self.fetches.lock().unwrap().push(updated_since);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(KunaError::RemoteFetchFailed("offline".to_string()));
        }
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| projects.is_empty() || projects.contains(&t.project_id))
            .filter(|t| updated_since.is_none_or(|since| t.updated > since))
            .cloned()
            .collect())
    }

    async fn patch_task(&self, id: TaskId, patch: &TaskPatch) -> KunaResult<Task> {
        if self.fail_patch.load(Ordering::SeqCst) {
            return Err(KunaError::Remote("patch rejected".to_string()));
        }
        self.patches.lock().unwrap().push((id, patch.clone()));
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| KunaError::Remote(format!("no task {id}")))?;
        patch.apply_to(task);
        if let Some(now) = *self.clock.lock().unwrap() {
            task.updated = now;
        }
        Ok(task.clone())
    }
}
