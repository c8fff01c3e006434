//! Conflict detection and resolution for two-way sync.
//!
//! A conflict is any content difference between the entry a task should
//! produce and the owned entry currently in the calendar. Conflicts live for
//! one pass only: [`ConflictSet::resolve_all`] drains the set whatever the
//! outcome.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dates::default_span;
use crate::diff::DesiredEntry;
use crate::entry::{Entry, EntryFields, FieldKind};
use crate::error::KunaError;
use crate::remote::TaskService;
use crate::task::{Task, TaskId, TaskPatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// Overwrite the entry with the task
    PreferTask,
    /// Patch the task from the entry
    PreferCalendar,
    /// Whichever side changed last; ties go to the calendar
    #[default]
    PreferNewest,
    /// Leave both sides alone and report the conflict
    Manual,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictPolicy::PreferTask => "prefer-task",
            ConflictPolicy::PreferCalendar => "prefer-calendar",
            ConflictPolicy::PreferNewest => "prefer-newest",
            ConflictPolicy::Manual => "manual",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefer-task" | "task" => Ok(ConflictPolicy::PreferTask),
            "prefer-calendar" | "calendar" => Ok(ConflictPolicy::PreferCalendar),
            "prefer-newest" | "newest" => Ok(ConflictPolicy::PreferNewest),
            "manual" => Ok(ConflictPolicy::Manual),
            _ => Err(format!("Unknown conflict policy '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConflict {
    pub task_id: TaskId,
    pub task_title: String,
    pub task_modified: DateTime<Utc>,
    pub entry_modified: Option<DateTime<Utc>>,
    /// Title, description, start, end or reminders
    pub category: FieldKind,
}

impl fmt::Display for SyncConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({} differs)",
            self.task_id, self.task_title, self.category
        )
    }
}

/// Compare the entry a task should produce against the entry we found.
///
/// Differences in the ownership tag alone are repairs, not conflicts. An
/// all-day flip with identical times is reported as a start conflict.
pub fn detect(task: &Task, desired: &EntryFields, entry: &Entry) -> Option<SyncConflict> {
    let category = match desired.first_difference(&entry.fields)? {
        FieldKind::Tag => return None,
        FieldKind::AllDay => FieldKind::Start,
        category => category,
    };
    Some(SyncConflict {
        task_id: task.id,
        task_title: task.title.clone(),
        task_modified: task.updated,
        entry_modified: entry.last_modified,
        category,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    UseTask,
    UseEntry,
    Deferred,
}

pub fn decide(policy: ConflictPolicy, conflict: &SyncConflict) -> Resolution {
    match policy {
        ConflictPolicy::PreferTask => Resolution::UseTask,
        ConflictPolicy::PreferCalendar => Resolution::UseEntry,
        ConflictPolicy::Manual => Resolution::Deferred,
        ConflictPolicy::PreferNewest => match conflict.entry_modified {
            Some(entry_modified) if entry_modified >= conflict.task_modified => {
                Resolution::UseEntry
            }
            _ => Resolution::UseTask,
        },
    }
}

/// Task fields to change so the task matches `entry`.
///
/// `desired` is the entry the task currently maps to; dates are only patched
/// when the entry's times moved away from it. Moved times are mapped back
/// onto the task's dates:
/// - all-day: the entry's date at the original time of day
/// - a default-length span on a task with only a due (or only a start)
///   date: just that date
/// - anything else: start from the entry start, due from the entry end
pub fn patch_from_entry(
    task: &Task,
    desired: &EntryFields,
    entry: &EntryFields,
    tz: Tz,
) -> TaskPatch {
    let mut patch = TaskPatch::default();

    if entry.title != task.title {
        patch.title = Some(entry.title.clone());
    }

    let description = entry.description();
    if description.trim() != task.description.trim() {
        patch.description = Some(description);
    }

    let moved =
        entry.start != desired.start || entry.end != desired.end || entry.all_day != desired.all_day;
    if moved {
        let (start, due) = dates_from_entry(task, entry, tz);
        if start != task.start {
            patch.start = start;
        }
        if due != task.due {
            patch.due = due;
        }
    }

    let mut ours = task.reminders.clone();
    let mut theirs = entry.reminders.clone();
    ours.sort();
    ours.dedup();
    theirs.sort();
    theirs.dedup();
    if ours != theirs {
        patch.reminders = Some(theirs);
    }

    patch
}

fn dates_from_entry(
    task: &Task,
    entry: &EntryFields,
    tz: Tz,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    if entry.all_day {
        return (
            task.start.map(|start| same_time_on(start, entry.start, tz)),
            task.due.map(|due| same_time_on(due, entry.start, tz)),
        );
    }

    let default_length = entry.end - entry.start == default_span();
    match (task.start, task.due) {
        (None, Some(_)) if default_length => (None, Some(entry.end)),
        (Some(_), None) if default_length => (Some(entry.start), None),
        (None, None) => (None, None),
        _ => (Some(entry.start), Some(entry.end)),
    }
}

/// `at`'s local time of day on the date of the all-day span starting at
/// `day_start`.
fn same_time_on(at: DateTime<Utc>, day_start: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let time = at.with_timezone(&tz).time();
    tz.from_local_datetime(&day_start.date_naive().and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(day_start)
}

/// A detected conflict with everything needed to resolve it.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub conflict: SyncConflict,
    pub task: Task,
    pub desired: DesiredEntry,
    pub entry: Entry,
}

#[derive(Debug, Default)]
pub struct ConflictOutcome {
    pub task_wins: Vec<PendingConflict>,
    /// Conflicts settled in the entry's favour, with the task as it is
    /// remotely afterwards
    pub calendar_wins: Vec<(PendingConflict, Task)>,
    pub deferred: Vec<PendingConflict>,
    pub failed: Vec<(PendingConflict, KunaError)>,
}

#[derive(Debug, Default)]
pub struct ConflictSet {
    pending: Vec<PendingConflict>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pending: PendingConflict) {
        self.pending.push(pending);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolve every conflict under `policy` and empty the set.
    ///
    /// Patch failures are collected per conflict and never abort the rest.
    pub async fn resolve_all<R: TaskService>(
        &mut self,
        policy: ConflictPolicy,
        remote: &R,
        tz: Tz,
    ) -> ConflictOutcome {
        let mut outcome = ConflictOutcome::default();

        for pending in std::mem::take(&mut self.pending) {
            let resolution = decide(policy, &pending.conflict);
            debug!(conflict = %pending.conflict, ?resolution, "resolving");

            match resolution {
                Resolution::UseTask => outcome.task_wins.push(pending),
                Resolution::Deferred => outcome.deferred.push(pending),
                Resolution::UseEntry => {
                    let patch = patch_from_entry(
                        &pending.task,
                        &pending.desired.fields,
                        &pending.entry.fields,
                        tz,
                    );
                    if patch.is_empty() {
                        let task = pending.task.clone();
                        outcome.calendar_wins.push((pending, task));
                        continue;
                    }
                    match remote.patch_task(pending.task.id, &patch).await {
                        Ok(task) => outcome.calendar_wins.push((pending, task)),
                        Err(e) => {
                            warn!(task = pending.task.id, error = %e, "patching task failed");
                            outcome.failed.push((pending, e));
                        }
                    }
                }
            }
        }

        outcome
    }
}
