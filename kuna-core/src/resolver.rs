//! Materializes the calendars the current preferences need.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::calendar_store::{CalendarStore, StoreCalendar, writable_source};
use crate::error::{KunaError, KunaResult};
use crate::preferences::{CalendarRef, ScopeKey, SyncMode, SyncPreferences};
use crate::task::{Project, ProjectId};

/// Resolved calendars, plus the per-project failures that were skipped.
#[derive(Debug, Default)]
pub struct Resolved {
    pub calendars: BTreeMap<ScopeKey, StoreCalendar>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CalendarResolver {
    app_name: String,
}

impl CalendarResolver {
    pub fn new(app_name: impl Into<String>) -> Self {
        CalendarResolver {
            app_name: app_name.into(),
        }
    }

    /// Display name for the calendar of `scope`.
    pub fn calendar_name(&self, scope: ScopeKey, projects: &[Project]) -> String {
        match scope {
            ScopeKey::Single => self.app_name.clone(),
            ScopeKey::Project(id) => {
                let title = project_title(id, projects)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Project {id}"));
                format!("{} – {}", self.app_name, title)
            }
        }
    }

    /// Scopes the current mode needs: the single calendar, or one per
    /// selected project (every remote project if none are selected).
    pub fn scopes(prefs: &SyncPreferences, projects: &[Project]) -> Vec<ScopeKey> {
        match prefs.mode {
            SyncMode::Single => vec![ScopeKey::Single],
            SyncMode::PerProject if prefs.projects.is_empty() => {
                projects.iter().map(|p| ScopeKey::Project(p.id)).collect()
            }
            SyncMode::PerProject => prefs
                .projects
                .iter()
                .map(|id| ScopeKey::Project(*id))
                .collect(),
        }
    }

    /// Resolve every scope of the current mode, creating calendars where
    /// the stored reference is missing or stale, and write the references
    /// back into `prefs`.
    ///
    /// A single-mode failure is fatal. A failing project calendar is
    /// recorded and left out.
    pub fn resolve<S: CalendarStore>(
        &self,
        store: &mut S,
        prefs: &mut SyncPreferences,
        projects: &[Project],
    ) -> KunaResult<Resolved> {
        let mut resolved = Resolved::default();

        for scope in Self::scopes(prefs, projects) {
            let name = self.calendar_name(scope, projects);
            match self.resolve_scope(store, prefs, scope, &name) {
                Ok(calendar) => {
                    resolved.calendars.insert(scope, calendar);
                }
                Err(KunaError::PermissionDenied) => return Err(KunaError::PermissionDenied),
                Err(e) if scope == ScopeKey::Single => {
                    return Err(match e {
                        KunaError::CalendarUnavailable(_) => e,
                        other => KunaError::CalendarUnavailable(other.to_string()),
                    });
                }
                Err(e) => {
                    warn!(calendar = %name, error = %e, "skipping project calendar");
                    resolved.errors.push(format!("{name}: {e}"));
                }
            }
        }

        Ok(resolved)
    }

    fn resolve_scope<S: CalendarStore>(
        &self,
        store: &mut S,
        prefs: &mut SyncPreferences,
        scope: ScopeKey,
        name: &str,
    ) -> KunaResult<StoreCalendar> {
        if let Some(known) = prefs.calendar_ref(scope).cloned() {
            if let Some(calendar) = store.calendars(&[known.id.clone()]).into_iter().next() {
                // Only follow our own naming; a name the user picked stays.
                let calendar = if known.name != name {
                    info!(from = %known.name, to = %name, "renaming calendar");
                    store.rename_calendar(&calendar, name)?
                } else {
                    calendar
                };
                prefs.set_calendar_ref(scope, calendar_ref(name, &calendar));
                return Ok(calendar);
            }
            debug!(calendar = %known.name, id = %known.id, "stored calendar is gone");
        }

        let sources = store.sources();
        let source = writable_source(&sources).ok_or_else(|| {
            KunaError::CalendarUnavailable("no writable calendar source".to_string())
        })?;

        let calendar = store.ensure_calendar(name, source)?;
        info!(calendar = %name, source = %source.title, "calendar ready");
        prefs.set_calendar_ref(scope, calendar_ref(name, &calendar));
        Ok(calendar)
    }
}

fn calendar_ref(name: &str, calendar: &StoreCalendar) -> CalendarRef {
    CalendarRef {
        name: name.to_string(),
        id: calendar.id.clone(),
    }
}

fn project_title(id: ProjectId, projects: &[Project]) -> Option<&str> {
    projects
        .iter()
        .find(|p| p.id == id)
        .map(|p| p.title.as_str())
}
