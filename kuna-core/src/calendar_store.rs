//! Capability interface for the local calendar store.
//!
//! Platform adapters implement [`CalendarStore`]. Entry saves and removals
//! (and calendar removals) are buffered by the adapter and only reach the
//! store on [`CalendarStore::commit`], which flushes the whole batch at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{CalendarId, Entry, EntryDraft, EntryId};
use crate::error::KunaResult;

/// Where a calendar's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Synced personal account (iCloud and friends)
    Cloud,
    /// Stored only on this device
    Local,
    /// Whatever the platform hands out by default
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub kind: SourceKind,
    pub writable: bool,
}

/// A calendar as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCalendar {
    pub id: CalendarId,
    pub name: String,
    pub source_id: String,
}

#[allow(async_fn_in_trait)]
pub trait CalendarStore {
    /// Ask for calendar access. Fails with `PermissionDenied` if refused.
    async fn request_access(&mut self) -> KunaResult<()>;

    /// Whether access is currently granted (it can be revoked at any time).
    fn has_access(&self) -> bool;

    fn sources(&self) -> Vec<Source>;

    /// Find or create the calendar called `name` in `source`.
    fn ensure_calendar(&mut self, name: &str, source: &Source) -> KunaResult<StoreCalendar>;

    /// The subset of `ids` that still resolve.
    fn calendars(&self, ids: &[CalendarId]) -> Vec<StoreCalendar>;

    fn rename_calendar(&mut self, calendar: &StoreCalendar, name: &str)
    -> KunaResult<StoreCalendar>;

    /// Entries overlapping `[start, end]` in the given calendars.
    fn entries(
        &self,
        calendars: &[StoreCalendar],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> KunaResult<Vec<Entry>>;

    /// Stage a save. Returns the entry id (assigned now for new entries).
    fn save(&mut self, draft: EntryDraft) -> KunaResult<EntryId>;

    fn remove(&mut self, entry: &Entry) -> KunaResult<()>;

    fn remove_calendar(&mut self, calendar: &StoreCalendar) -> KunaResult<()>;

    /// Flush every staged change as one batch.
    async fn commit(&mut self) -> KunaResult<()>;

    /// Drop every staged change.
    fn reset(&mut self);
}

/// Pick the calendar source to create calendars in: a writable cloud source
/// first, then a local one, then the platform default.
pub fn writable_source(sources: &[Source]) -> Option<&Source> {
    [SourceKind::Cloud, SourceKind::Local, SourceKind::Default]
        .into_iter()
        .find_map(|kind| sources.iter().find(|s| s.writable && s.kind == kind))
}
