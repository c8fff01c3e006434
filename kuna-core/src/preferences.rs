//! User-facing sync preferences, persisted as a versioned blob.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictPolicy;
use crate::entry::CalendarId;
use crate::task::{ProjectId, Task};

/// Current layout of [`SyncPreferences`]. Bump when the persisted shape
/// changes and a migration is needed.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// Every task goes into one calendar
    #[default]
    Single,
    /// One calendar per project
    PerProject,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Single => write!(f, "single"),
            SyncMode::PerProject => write!(f, "per-project"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(SyncMode::Single),
            "per-project" | "perProject" | "projects" => Ok(SyncMode::PerProject),
            _ => Err(format!("Unknown sync mode '{s}'")),
        }
    }
}

/// Selects the calendar a task's entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    Single,
    Project(ProjectId),
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Single => write!(f, "single"),
            ScopeKey::Project(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for ScopeKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "single" {
            return Ok(ScopeKey::Single);
        }
        s.parse()
            .map(ScopeKey::Project)
            .map_err(|_| format!("Invalid scope key '{s}'"))
    }
}

/// A calendar we created, by display name and store identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarRef {
    pub name: String,
    pub id: CalendarId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPreferences {
    pub version: u32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SyncMode,
    /// Selected projects. Empty means every project.
    #[serde(default)]
    pub projects: BTreeSet<ProjectId>,
    #[serde(default)]
    pub single_calendar: Option<CalendarRef>,
    /// Kept across mode switches so switching back reuses the calendars.
    #[serde(default)]
    pub project_calendars: BTreeMap<ProjectId, CalendarRef>,
    #[serde(default)]
    pub two_way: bool,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default = "default_include_completed")]
    pub include_completed: bool,
}

fn default_include_completed() -> bool {
    true
}

impl Default for SyncPreferences {
    fn default() -> Self {
        SyncPreferences {
            version: SCHEMA_VERSION,
            enabled: false,
            mode: SyncMode::Single,
            projects: BTreeSet::new(),
            single_calendar: None,
            project_calendars: BTreeMap::new(),
            two_way: false,
            conflict_policy: ConflictPolicy::default(),
            include_completed: true,
        }
    }
}

impl SyncPreferences {
    pub fn includes_project(&self, project_id: ProjectId) -> bool {
        self.projects.is_empty() || self.projects.contains(&project_id)
    }

    /// Scope for a task under the current mode, `None` if filtered out.
    pub fn scope_for(&self, task: &Task) -> Option<ScopeKey> {
        if !self.includes_project(task.project_id) {
            return None;
        }
        if task.done && !self.include_completed {
            return None;
        }
        Some(match self.mode {
            SyncMode::Single => ScopeKey::Single,
            SyncMode::PerProject => ScopeKey::Project(task.project_id),
        })
    }

    pub fn calendar_ref(&self, scope: ScopeKey) -> Option<&CalendarRef> {
        match scope {
            ScopeKey::Single => self.single_calendar.as_ref(),
            ScopeKey::Project(id) => self.project_calendars.get(&id),
        }
    }

    pub fn set_calendar_ref(&mut self, scope: ScopeKey, calendar: CalendarRef) {
        match scope {
            ScopeKey::Single => self.single_calendar = Some(calendar),
            ScopeKey::Project(id) => {
                self.project_calendars.insert(id, calendar);
            }
        }
    }

    /// Every calendar reference we know of, whichever mode created it.
    pub fn all_calendar_refs(&self) -> impl Iterator<Item = &CalendarRef> {
        self.single_calendar
            .iter()
            .chain(self.project_calendars.values())
    }
}
