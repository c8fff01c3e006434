//! The sync lifecycle controller.
//!
//! [`SyncEngine`] owns every piece of sync state and its three collaborators
//! (calendar store, task service, settings). All mutation goes through
//! `&mut self`, so at most one operation runs at a time; the only suspension
//! points are the collaborators' async calls.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::calendar_store::{CalendarStore, StoreCalendar};
use crate::config::EngineConfig;
use crate::conflict::{
    ConflictOutcome, ConflictPolicy, ConflictSet, PendingConflict, SyncConflict, detect,
};
use crate::dates::map_dates;
use crate::diff::{DesiredEntry, ReconcileOutcome, ReconcilePlan, reconcile};
use crate::entry::{CalendarId, Entry};
use crate::error::{KunaError, KunaResult};
use crate::migrate::{MigrationOutcome, migrate};
use crate::preferences::{ScopeKey, SyncMode, SyncPreferences};
use crate::remote::TaskService;
use crate::resolver::CalendarResolver;
use crate::settings::{SettingsStore, keys, load_json, save_json};
use crate::state::{IdentifierMap, SyncCursor, TaskCache};
use crate::tag::{self, OwnershipTag};
use crate::task::{Project, ProjectId, TaskId};
use crate::window::SyncWindow;

/// Appended to calendar names by [`Disposition::ArchiveCalendars`].
pub const ARCHIVE_SUFFIX: &str = " (Archived)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Disabled,
    Onboarding,
    EnabledIdle,
    Syncing,
    Disabling,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Disabled => "disabled",
            SyncState::Onboarding => "onboarding",
            SyncState::EnabledIdle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Disabling => "disabling",
        };
        write!(f, "{name}")
    }
}

/// What happens to our calendars and entries when sync is turned off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    KeepEverything,
    RemoveKunaEvents,
    ArchiveCalendars,
    DeleteEverything,
}

impl FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" | "keep-everything" => Ok(Disposition::KeepEverything),
            "remove-events" | "remove-kuna-events" => Ok(Disposition::RemoveKunaEvents),
            "archive" | "archive-calendars" => Ok(Disposition::ArchiveCalendars),
            "delete" | "delete-everything" => Ok(Disposition::DeleteEverything),
            _ => Err(format!("Unknown disposition '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTrigger {
    Manual,
    Scheduled,
    StoreChanged,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::StoreChanged => "store-changed",
        };
        write!(f, "{name}")
    }
}

/// Settings picked during onboarding.
#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingChoice {
    pub mode: SyncMode,
    /// Empty selects every project
    pub projects: BTreeSet<ProjectId>,
    pub two_way: bool,
    pub conflict_policy: ConflictPolicy,
    pub include_completed: bool,
}

impl Default for OnboardingChoice {
    fn default() -> Self {
        let prefs = SyncPreferences::default();
        OnboardingChoice {
            mode: prefs.mode,
            projects: prefs.projects,
            two_way: prefs.two_way,
            conflict_policy: prefs.conflict_policy,
            include_completed: prefs.include_completed,
        }
    }
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub full_pull: bool,
    /// Tasks returned by the task service this pass
    pub fetched: usize,
    /// Tasks without any date, which get no entry
    pub skipped: usize,
    #[serde(flatten)]
    pub changes: ReconcileOutcome,
    pub migrated: Option<MigrationOutcome>,
    /// Conflicts settled automatically
    pub conflicts_resolved: usize,
    /// Conflicts left for the user (manual policy)
    pub conflicts: Vec<SyncConflict>,
    pub errors: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(trigger: SyncTrigger, full_pull: bool) -> Self {
        SyncReport {
            trigger,
            full_pull,
            fetched: 0,
            skipped: 0,
            changes: ReconcileOutcome::default(),
            migrated: None,
            conflicts_resolved: 0,
            conflicts: vec![],
            errors: vec![],
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncError {
    pub at: DateTime<Utc>,
    pub message: String,
}

pub struct SyncEngine<S, R, K> {
    store: S,
    remote: R,
    settings: K,
    config: EngineConfig,
    resolver: CalendarResolver,

    state: SyncState,
    prefs: SyncPreferences,
    id_map: IdentifierMap,
    cursor: SyncCursor,
    tasks: TaskCache,
    last_sync: Option<DateTime<Utc>>,
    last_full_pull: Option<DateTime<Utc>>,

    resolved: BTreeMap<ScopeKey, StoreCalendar>,
    errors: Vec<SyncError>,
    surfaced: Vec<PendingConflict>,
}

impl<S, R, K> SyncEngine<S, R, K>
where
    S: CalendarStore,
    R: TaskService,
    K: SettingsStore,
{
    /// Build an engine around its collaborators, picking up whatever state
    /// was persisted by a previous run.
    pub fn new(store: S, remote: R, settings: K, config: EngineConfig) -> KunaResult<Self> {
        let prefs: SyncPreferences = load_json(&settings, keys::PREFERENCES)?.unwrap_or_default();
        let cursor = load_json(&settings, keys::CURSOR)?.unwrap_or_default();
        let id_map = load_json(&settings, keys::IDENTIFIER_MAP)?.unwrap_or_default();
        let tasks = load_json(&settings, keys::TASK_CACHE)?.unwrap_or_default();
        let last_sync = load_json(&settings, keys::LAST_SYNC)?.flatten();
        let last_full_pull = load_json(&settings, keys::LAST_FULL_PULL)?.flatten();

        let state = if prefs.enabled {
            SyncState::EnabledIdle
        } else {
            SyncState::Disabled
        };
        debug!(%state, mode = %prefs.mode, "loaded sync state");

        let mut engine = SyncEngine {
            resolver: CalendarResolver::new(config.app_name.clone()),
            store,
            remote,
            settings,
            config,
            state,
            prefs,
            id_map,
            cursor,
            tasks,
            last_sync,
            last_full_pull,
            resolved: BTreeMap::new(),
            errors: vec![],
            surfaced: vec![],
        };
        engine.rebuild_identifier_map();
        Ok(engine)
    }

    /// Recreate a missing identifier map from the tags on our entries.
    fn rebuild_identifier_map(&mut self) {
        if !self.id_map.is_empty() || !self.prefs.enabled || !self.store.has_access() {
            return;
        }
        match self.owned_entries(&self.prefs, SyncWindow::everything()) {
            Ok(entries) if !entries.is_empty() => {
                self.id_map = IdentifierMap::rebuild(&entries);
                info!(rows = self.id_map.len(), "rebuilt identifier map from tags");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not rebuild identifier map"),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn preferences(&self) -> &SyncPreferences {
        &self.prefs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn errors(&self) -> &[SyncError] {
        &self.errors
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor.current()
    }

    pub fn identifier_map(&self) -> &IdentifierMap {
        &self.id_map
    }

    pub fn task_cache(&self) -> &TaskCache {
        &self.tasks
    }

    pub fn resolved_calendars(&self) -> &BTreeMap<ScopeKey, StoreCalendar> {
        &self.resolved
    }

    /// Conflicts from the last pass that wait for a decision.
    pub fn surfaced_conflicts(&self) -> impl Iterator<Item = &SyncConflict> {
        self.surfaced.iter().map(|p| &p.conflict)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn settings(&self) -> &K {
        &self.settings
    }

    pub fn into_parts(self) -> (S, R, K) {
        (self.store, self.remote, self.settings)
    }

    fn require(&self, action: &'static str, allowed: &[SyncState]) -> KunaResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(KunaError::InvalidState {
                action,
                state: self.state.to_string(),
            })
        }
    }

    fn record(&mut self, error: &KunaError) {
        warn!(error = %error, "sync error");
        self.errors.push(SyncError {
            at: Utc::now(),
            message: error.to_string(),
        });
    }

    fn record_message(&mut self, message: String) {
        self.errors.push(SyncError {
            at: Utc::now(),
            message,
        });
    }

    /// Start (or restart) setup. Allowed while disabled, or while enabled to
    /// change the configuration.
    pub fn begin_onboarding(&mut self) -> KunaResult<()> {
        self.require(
            "begin onboarding",
            &[SyncState::Disabled, SyncState::EnabledIdle],
        )?;
        self.resolved.clear();
        self.surfaced.clear();
        self.state = SyncState::Onboarding;
        info!("onboarding started");
        Ok(())
    }

    pub fn cancel_onboarding(&mut self) -> KunaResult<()> {
        self.require("cancel onboarding", &[SyncState::Onboarding])?;
        self.state = if self.prefs.enabled {
            SyncState::EnabledIdle
        } else {
            SyncState::Disabled
        };
        Ok(())
    }

    /// Finish setup: request calendar access, resolve calendars for the
    /// chosen mode, move existing entries if the mode changed, persist the
    /// preferences and run one full pass.
    ///
    /// Until the preferences are persisted, any failure leaves the engine in
    /// `Onboarding`. A failing first pass leaves sync enabled and returns
    /// its error.
    #[instrument(skip_all, fields(mode = %choice.mode))]
    pub async fn complete_onboarding(&mut self, choice: OnboardingChoice) -> KunaResult<SyncReport> {
        self.require("complete onboarding", &[SyncState::Onboarding])?;

        if let Err(e) = self.store.request_access().await {
            self.record(&e);
            return Err(e);
        }

        let mut prefs = self.prefs.clone();
        let previous_mode = prefs.enabled.then_some(prefs.mode);
        prefs.mode = choice.mode;
        prefs.projects = choice.projects;
        prefs.two_way = choice.two_way;
        prefs.conflict_policy = choice.conflict_policy;
        prefs.include_completed = choice.include_completed;
        prefs.enabled = true;

        let migrated = match self.prepare(&mut prefs, previous_mode).await {
            Ok(migrated) => migrated,
            Err(e) => {
                self.resolved.clear();
                self.record(&e);
                return Err(e);
            }
        };

        self.prefs = prefs;
        self.cursor.reset();
        self.last_full_pull = None;
        self.persist()?;
        self.state = SyncState::EnabledIdle;
        info!(mode = %self.prefs.mode, "sync enabled");

        let mut report = self.sync(SyncTrigger::Manual).await?;
        report.migrated = migrated;
        Ok(report)
    }

    /// Resolve calendars for `prefs` and, when switching modes, move the
    /// owned entries over.
    async fn prepare(
        &mut self,
        prefs: &mut SyncPreferences,
        previous_mode: Option<SyncMode>,
    ) -> KunaResult<Option<MigrationOutcome>> {
        let projects = self.fetch_projects(prefs).await?;
        let resolved = self.resolver.resolve(&mut self.store, prefs, &projects)?;
        for message in resolved.errors {
            self.record_message(message);
        }
        self.resolved = resolved.calendars;

        let Some(from) = previous_mode.filter(|from| *from != prefs.mode) else {
            return Ok(None);
        };

        let entries = self.owned_entries(prefs, SyncWindow::everything())?;
        let outcome = migrate(
            &mut self.store,
            &entries,
            from,
            prefs.mode,
            &self.resolved,
            &mut self.id_map,
        )
        .await?;
        Ok(Some(outcome))
    }

    async fn fetch_projects(&self, prefs: &SyncPreferences) -> KunaResult<Vec<Project>> {
        if prefs.mode != SyncMode::PerProject {
            return Ok(vec![]);
        }
        self.remote
            .fetch_projects()
            .await
            .map_err(as_fetch_failure)
    }

    /// Run one sync pass.
    ///
    /// Manual triggers always pull every task. Other triggers pull only
    /// tasks changed since the cursor, unless the last full pull is older
    /// than the configured refresh interval.
    #[instrument(skip(self))]
    pub async fn sync(&mut self, trigger: SyncTrigger) -> KunaResult<SyncReport> {
        self.require("sync", &[SyncState::EnabledIdle])?;

        if !self.store.has_access() {
            self.lose_permission();
            return Err(KunaError::PermissionDenied);
        }

        self.state = SyncState::Syncing;
        self.surfaced.clear();

        match self.run_pass(trigger).await {
            Ok(report) => {
                self.state = SyncState::EnabledIdle;
                info!(
                    created = report.changes.created,
                    updated = report.changes.updated,
                    removed = report.changes.removed,
                    conflicts = report.conflicts.len(),
                    "sync finished"
                );
                Ok(report)
            }
            Err(KunaError::PermissionDenied) => {
                self.lose_permission();
                Err(KunaError::PermissionDenied)
            }
            Err(e) => {
                self.state = SyncState::EnabledIdle;
                self.record(&e);
                Err(e)
            }
        }
    }

    async fn run_pass(&mut self, trigger: SyncTrigger) -> KunaResult<SyncReport> {
        let now = Utc::now();
        let full = trigger == SyncTrigger::Manual
            || self.cursor.current().is_none()
            || self
                .last_full_pull
                .is_none_or(|at| now - at > self.config.full_refresh);
        let mut report = SyncReport::new(trigger, full);

        // Everything remote comes first so a failed fetch leaves the
        // calendar untouched.
        let projects = self.fetch_projects(&self.prefs).await?;
        let since = if full { None } else { self.cursor.current() };
        let fetched = self
            .remote
            .fetch_tasks(&self.prefs.projects, since)
            .await
            .map_err(as_fetch_failure)?;
        report.fetched = fetched.len();
        debug!(full, fetched = fetched.len(), "pulled tasks");

        let mut prefs = self.prefs.clone();
        let resolved = self.resolver.resolve(&mut self.store, &mut prefs, &projects)?;
        self.prefs = prefs;
        self.resolved = resolved.calendars;
        report.errors.extend(resolved.errors);

        let window = self.config.window(now);
        let existing = self.owned_entries(&self.prefs, window)?;

        let mut tasks = if full { TaskCache::new() } else { self.tasks.clone() };
        let newest = fetched.iter().map(|t| t.updated).max();
        for task in fetched {
            tasks.insert(task.id, task);
        }

        let (mut desired, skipped) = self.desired_set(&tasks, window);
        report.skipped = skipped;

        if self.prefs.two_way {
            let mut conflicts = self.detect_conflicts(&tasks, &desired, &existing);
            let outcome = conflicts
                .resolve_all(self.prefs.conflict_policy, &self.remote, self.config.time_zone)
                .await;
            self.apply_conflicts(outcome, &mut tasks, &mut desired, &mut report);
        }

        report.changes = reconcile(&mut self.store, &desired, &existing, &mut self.id_map).await?;

        if let Some(newest) = newest {
            self.cursor.advance(newest);
        }
        self.tasks = tasks;
        self.last_sync = Some(now);
        if full {
            self.last_full_pull = Some(now);
        }

        self.errors.clear();
        for message in &report.errors {
            self.record_message(message.clone());
        }
        self.persist()?;

        report.finished_at = Utc::now();
        Ok(report)
    }

    /// One desired entry per task that has a scope, a resolved calendar,
    /// at least one date and falls inside the window. Also returns how many
    /// tasks were skipped for having no date at all.
    fn desired_set(
        &self,
        tasks: &TaskCache,
        window: SyncWindow,
    ) -> (BTreeMap<TaskId, DesiredEntry>, usize) {
        let mut desired = BTreeMap::new();
        let mut skipped = 0;

        for task in tasks.values() {
            let Some(scope) = self.prefs.scope_for(task) else {
                continue;
            };
            let Some(calendar) = self.resolved.get(&scope) else {
                continue;
            };
            let Some(times) = map_dates(task, self.config.time_zone) else {
                skipped += 1;
                continue;
            };
            if !window.overlaps(&times) {
                continue;
            }
            desired.insert(task.id, DesiredEntry::for_task(task, &calendar.id, times));
        }

        (desired, skipped)
    }

    fn detect_conflicts(
        &self,
        tasks: &TaskCache,
        desired: &BTreeMap<TaskId, DesiredEntry>,
        existing: &[Entry],
    ) -> ConflictSet {
        let plan = ReconcilePlan::build(desired, existing, &self.id_map);
        let by_id: BTreeMap<&str, &Entry> = existing.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut set = ConflictSet::new();
        for (task_id, entry_id) in &plan.matched {
            let (Some(task), Some(want), Some(entry)) = (
                tasks.get(task_id),
                desired.get(task_id),
                by_id.get(entry_id.as_str()),
            ) else {
                continue;
            };
            if let Some(conflict) = detect(task, &want.fields, entry) {
                debug!(%conflict, "conflict detected");
                set.push(PendingConflict {
                    conflict,
                    task: task.clone(),
                    desired: want.clone(),
                    entry: (*entry).clone(),
                });
            }
        }
        set
    }

    /// Fold conflict decisions into the desired set: anything not won by the
    /// task keeps the calendar's version.
    fn apply_conflicts(
        &mut self,
        outcome: ConflictOutcome,
        tasks: &mut TaskCache,
        desired: &mut BTreeMap<TaskId, DesiredEntry>,
        report: &mut SyncReport,
    ) {
        report.conflicts_resolved += outcome.task_wins.len() + outcome.calendar_wins.len();

        for (pending, task) in outcome.calendar_wins {
            tasks.insert(task.id, task);
            desired.insert(pending.task.id, keep(&pending));
        }
        for pending in outcome.deferred {
            desired.insert(pending.task.id, keep(&pending));
            report.conflicts.push(pending.conflict.clone());
            self.surfaced.push(pending);
        }
        for (pending, error) in outcome.failed {
            desired.insert(pending.task.id, keep(&pending));
            report
                .errors
                .push(format!("Task #{}: {error}", pending.task.id));
        }
    }

    /// Settle a conflict surfaced by the last pass. Returns false if there
    /// is no such conflict or `policy` is manual.
    #[instrument(skip(self))]
    pub async fn resolve_conflict(
        &mut self,
        task_id: TaskId,
        policy: ConflictPolicy,
    ) -> KunaResult<bool> {
        self.require("resolve a conflict", &[SyncState::EnabledIdle])?;

        let Some(index) = self.surfaced.iter().position(|p| p.task.id == task_id) else {
            return Ok(false);
        };
        if policy == ConflictPolicy::Manual {
            return Ok(false);
        }
        let pending = self.surfaced.remove(index);
        let calendar_id = pending.desired.calendar_id.clone();

        let mut set = ConflictSet::new();
        set.push(pending);
        let outcome = set
            .resolve_all(policy, &self.remote, self.config.time_zone)
            .await;

        let want = if let Some(pending) = outcome.task_wins.into_iter().next() {
            pending.desired
        } else if let Some((pending, task)) = outcome.calendar_wins.into_iter().next() {
            self.tasks.insert(task.id, task);
            keep(&pending)
        } else if let Some((_, error)) = outcome.failed.into_iter().next() {
            self.record(&error);
            return Err(error);
        } else {
            return Ok(false);
        };

        let existing: Vec<Entry> = self
            .owned_entries(&self.prefs, SyncWindow::everything())?
            .into_iter()
            .filter(|e| {
                e.calendar_id == calendar_id
                    && OwnershipTag::decode(&e.fields).is_some_and(|t| t.task_id == task_id)
            })
            .collect();

        let mut scratch = IdentifierMap::default();
        if let Some(entry_id) = self.id_map.entry_id(task_id) {
            scratch.add(task_id, entry_id.clone());
        }
        let desired = BTreeMap::from([(task_id, want)]);
        reconcile(&mut self.store, &desired, &existing, &mut scratch).await?;

        self.id_map.remove(task_id);
        if let Some(entry_id) = scratch.entry_id(task_id) {
            self.id_map.add(task_id, entry_id.clone());
        }
        self.persist()?;
        Ok(true)
    }

    /// Turn sync off, handling our calendars according to `disposition`.
    ///
    /// Whatever the disposition, and even if it fails part way, resolved
    /// calendars are forgotten and all persisted sync state is reset.
    #[instrument(skip(self))]
    pub async fn disable(&mut self, disposition: Disposition) -> KunaResult<()> {
        self.require("disable", &[SyncState::EnabledIdle, SyncState::Disabled])?;
        self.state = SyncState::Disabling;

        let result = self.dispose(disposition).await;

        self.resolved.clear();
        self.surfaced.clear();
        self.prefs = SyncPreferences::default();
        self.cursor.reset();
        self.id_map.clear();
        self.tasks.clear();
        self.last_sync = None;
        self.last_full_pull = None;
        self.state = SyncState::Disabled;

        let reset = keys::ALL
            .iter()
            .try_for_each(|key| self.settings.remove(key));

        if let Err(e) = &result {
            self.record(e);
        }
        info!(?disposition, ok = result.is_ok(), "sync disabled");
        result.and(reset)
    }

    async fn dispose(&mut self, disposition: Disposition) -> KunaResult<()> {
        match disposition {
            Disposition::KeepEverything => Ok(()),
            Disposition::RemoveKunaEvents => {
                let entries = self.owned_entries(&self.prefs, SyncWindow::everything())?;
                if entries.is_empty() {
                    return Ok(());
                }
                for entry in &entries {
                    if let Err(e) = self.store.remove(entry) {
                        self.store.reset();
                        return Err(e);
                    }
                }
                self.store.commit().await
            }
            Disposition::ArchiveCalendars => {
                for calendar in self.known_calendars(&self.prefs) {
                    if calendar.name.ends_with(ARCHIVE_SUFFIX) {
                        continue;
                    }
                    let name = format!("{}{ARCHIVE_SUFFIX}", calendar.name);
                    self.store.rename_calendar(&calendar, &name)?;
                }
                Ok(())
            }
            Disposition::DeleteEverything => {
                let calendars = self.known_calendars(&self.prefs);
                if calendars.is_empty() {
                    return Ok(());
                }
                for calendar in &calendars {
                    if let Err(e) = self.store.remove_calendar(calendar) {
                        self.store.reset();
                        return Err(e);
                    }
                }
                self.store.commit().await
            }
        }
    }

    /// React to the platform granting or revoking calendar access.
    pub fn permission_changed(&mut self, granted: bool) {
        if granted {
            if self.prefs.enabled && self.state == SyncState::Disabled {
                info!("calendar access restored");
                self.state = SyncState::EnabledIdle;
            }
        } else if matches!(self.state, SyncState::EnabledIdle | SyncState::Syncing) {
            self.lose_permission();
        }
    }

    /// Sync stays configured but stops until access comes back.
    fn lose_permission(&mut self) {
        self.resolved.clear();
        self.surfaced.clear();
        self.state = SyncState::Disabled;
        self.record(&KunaError::PermissionDenied);
    }

    /// Calendars resolved this session plus every calendar `prefs` still
    /// references, whichever mode created it, as the store reports them now.
    fn known_calendars(&self, prefs: &SyncPreferences) -> Vec<StoreCalendar> {
        let ids: BTreeSet<CalendarId> = self
            .resolved
            .values()
            .map(|c| c.id.clone())
            .chain(prefs.all_calendar_refs().map(|r| r.id.clone()))
            .collect();
        let ids: Vec<CalendarId> = ids.into_iter().collect();
        self.store.calendars(&ids)
    }

    fn owned_entries(&self, prefs: &SyncPreferences, window: SyncWindow) -> KunaResult<Vec<Entry>> {
        let calendars = self.known_calendars(prefs);
        if calendars.is_empty() {
            return Ok(vec![]);
        }
        let entries = self.store.entries(&calendars, window.from, window.to)?;
        Ok(entries
            .into_iter()
            .filter(|e| tag::is_owned(&e.fields))
            .collect())
    }

    fn persist(&mut self) -> KunaResult<()> {
        save_json(&mut self.settings, keys::PREFERENCES, &self.prefs)?;
        save_json(&mut self.settings, keys::CURSOR, &self.cursor)?;
        save_json(&mut self.settings, keys::IDENTIFIER_MAP, &self.id_map)?;
        save_json(&mut self.settings, keys::TASK_CACHE, &self.tasks)?;
        save_json(&mut self.settings, keys::LAST_SYNC, &self.last_sync)?;
        save_json(&mut self.settings, keys::LAST_FULL_PULL, &self.last_full_pull)?;
        Ok(())
    }
}

fn keep(pending: &PendingConflict) -> DesiredEntry {
    DesiredEntry::keep_entry(
        pending.desired.tag,
        &pending.desired.calendar_id,
        &pending.entry,
    )
}

fn as_fetch_failure(error: KunaError) -> KunaError {
    match error {
        KunaError::RemoteFetchFailed(_) => error,
        other => KunaError::RemoteFetchFailed(other.to_string()),
    }
}
