//! Calendar store backed by a directory of .ics files.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   kuna/
//!     .kuna/calendar.toml    id, name, source
//!     <entry-id>.ics         one VEVENT per file
//!   kuna-work/
//!     ...
//! ```
//!
//! Saves and removals are staged in memory. `commit` writes every new file
//! to a temporary in its calendar directory first, renames them all into
//! place, and only then deletes removed entries and calendars.

mod calendar_dir;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use kuna_core::calendar_store::{CalendarStore, Source, SourceKind, StoreCalendar};
use kuna_core::entry::{CalendarId, Entry, EntryDraft, EntryFields, EntryId};
use kuna_core::{KunaError, KunaResult};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ics;
use calendar_dir::{CalendarDir, CalendarMeta, entry_path, scan, unique_dir};

const SOURCE_ID: &str = "local";

#[derive(Debug)]
enum PendingOp {
    Write {
        dir: PathBuf,
        id: EntryId,
        fields: EntryFields,
    },
    RemoveEntry {
        path: PathBuf,
    },
    RemoveCalendar {
        dir: PathBuf,
    },
}

#[derive(Debug)]
pub struct IcsDirStore {
    root: PathBuf,
    granted: bool,
    pending: Vec<PendingOp>,
}

impl IcsDirStore {
    /// Open a store rooted at `root`. Access counts as granted if the
    /// directory already exists.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let granted = root.is_dir();
        IcsDirStore {
            root,
            granted,
            pending: vec![],
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every calendar in the store, ours or not.
    pub fn list_calendars(&self) -> KunaResult<Vec<StoreCalendar>> {
        Ok(scan(&self.root)?
            .iter()
            .map(CalendarDir::to_store_calendar)
            .collect())
    }

    fn require_access(&self) -> KunaResult<()> {
        if self.has_access() {
            Ok(())
        } else {
            Err(KunaError::PermissionDenied)
        }
    }

    fn find_calendar(&self, id: &str) -> KunaResult<Option<CalendarDir>> {
        Ok(scan(&self.root)?.into_iter().find(|c| c.meta.id == id))
    }

    /// The calendar directory currently holding entry `id`, if any.
    fn locate_entry(&self, id: &str) -> KunaResult<Option<PathBuf>> {
        Ok(scan(&self.root)?
            .into_iter()
            .map(|c| c.entry_path(id))
            .find(|p| p.exists()))
    }

    fn is_pending_write(&self, id: &str) -> bool {
        self.pending
            .iter()
            .any(|op| matches!(op, PendingOp::Write { id: pending, .. } if pending == id))
    }

    fn read_entries(calendar: &CalendarDir) -> KunaResult<Vec<Entry>> {
        let mut entries = Vec::new();

        for dir_entry in std::fs::read_dir(&calendar.path)? {
            let path = dir_entry?.path();
            if path.extension().is_none_or(|e| e != "ics") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let Some(parsed) = ics::parse_entry(&content) else {
                debug!(path = %path.display(), "skipping file without an event");
                continue;
            };

            let modified = std::fs::metadata(&path)
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            entries.push(Entry {
                id: id.to_string(),
                calendar_id: calendar.meta.id.clone(),
                fields: parsed.fields,
                last_modified: modified.or(parsed.last_modified),
            });
        }

        Ok(entries)
    }
}

impl CalendarStore for IcsDirStore {
    async fn request_access(&mut self) -> KunaResult<()> {
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            warn!(root = %self.root.display(), error = %e, "cannot create calendar directory");
            return Err(KunaError::PermissionDenied);
        }
        let readonly = std::fs::metadata(&self.root)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true);
        if readonly {
            return Err(KunaError::PermissionDenied);
        }

        self.granted = true;
        Ok(())
    }

    fn has_access(&self) -> bool {
        self.granted && self.root.is_dir()
    }

    fn sources(&self) -> Vec<Source> {
        vec![Source {
            id: SOURCE_ID.to_string(),
            title: self.root.display().to_string(),
            kind: SourceKind::Local,
            writable: self.has_access(),
        }]
    }

    fn ensure_calendar(&mut self, name: &str, source: &Source) -> KunaResult<StoreCalendar> {
        self.require_access()?;

        if let Some(existing) = scan(&self.root)?.into_iter().find(|c| c.meta.name == name) {
            return Ok(existing.to_store_calendar());
        }

        let calendar = CalendarDir {
            path: unique_dir(&self.root, name),
            meta: CalendarMeta {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                source: source.id.clone(),
            },
        };
        calendar.meta.save(&calendar.path)?;
        info!(name, path = %calendar.path.display(), "created calendar");

        Ok(calendar.to_store_calendar())
    }

    fn calendars(&self, ids: &[CalendarId]) -> Vec<StoreCalendar> {
        match scan(&self.root) {
            Ok(all) => all
                .iter()
                .filter(|c| ids.contains(&c.meta.id))
                .map(CalendarDir::to_store_calendar)
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not scan calendars");
                vec![]
            }
        }
    }

    fn rename_calendar(
        &mut self,
        calendar: &StoreCalendar,
        name: &str,
    ) -> KunaResult<StoreCalendar> {
        self.require_access()?;

        let mut dir = self
            .find_calendar(&calendar.id)?
            .ok_or_else(|| KunaError::CalendarUnavailable(calendar.name.clone()))?;
        dir.meta.name = name.to_string();
        dir.meta.save(&dir.path)?;

        Ok(dir.to_store_calendar())
    }

    fn entries(
        &self,
        calendars: &[StoreCalendar],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> KunaResult<Vec<Entry>> {
        self.require_access()?;

        let mut entries = Vec::new();
        for calendar in scan(&self.root)? {
            if !calendars.iter().any(|c| c.id == calendar.meta.id) {
                continue;
            }
            entries.extend(
                Self::read_entries(&calendar)?
                    .into_iter()
                    .filter(|e| e.fields.overlaps(start, end)),
            );
        }

        Ok(entries)
    }

    fn save(&mut self, draft: EntryDraft) -> KunaResult<EntryId> {
        self.require_access()?;

        let calendar = self
            .find_calendar(&draft.calendar_id)?
            .ok_or_else(|| KunaError::Store(format!("Unknown calendar {}", draft.calendar_id)))?;

        let id = match draft.id {
            Some(id) => {
                match self.locate_entry(&id)? {
                    Some(current) if current != calendar.entry_path(&id) => {
                        self.pending.push(PendingOp::RemoveEntry { path: current });
                    }
                    Some(_) => {}
                    None if self.is_pending_write(&id) => {}
                    None => return Err(KunaError::Store(format!("Unknown entry {id}"))),
                }
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        self.pending.push(PendingOp::Write {
            dir: calendar.path,
            id: id.clone(),
            fields: draft.fields,
        });
        Ok(id)
    }

    fn remove(&mut self, entry: &Entry) -> KunaResult<()> {
        self.require_access()?;

        let calendar = self
            .find_calendar(&entry.calendar_id)?
            .ok_or_else(|| KunaError::Store(format!("Unknown calendar {}", entry.calendar_id)))?;
        self.pending.push(PendingOp::RemoveEntry {
            path: calendar.entry_path(&entry.id),
        });
        Ok(())
    }

    fn remove_calendar(&mut self, calendar: &StoreCalendar) -> KunaResult<()> {
        self.require_access()?;

        let dir = self
            .find_calendar(&calendar.id)?
            .ok_or_else(|| KunaError::CalendarUnavailable(calendar.name.clone()))?;
        self.pending.push(PendingOp::RemoveCalendar { dir: dir.path });
        Ok(())
    }

    async fn commit(&mut self) -> KunaResult<()> {
        let ops = std::mem::take(&mut self.pending);
        if ops.is_empty() {
            return Ok(());
        }
        self.require_access()?;

        let now = Utc::now();
        let mut staged = Vec::new();
        for op in &ops {
            if let PendingOp::Write { dir, id, fields } = op {
                let content = ics::generate_ics(id, fields, now)
                    .map_err(|e| KunaError::StoreCommitFailed(e.to_string()))?;
                let temp = write_temp(dir, &content).map_err(|e| {
                    KunaError::StoreCommitFailed(format!("{}: {e}", dir.display()))
                })?;
                staged.push((temp, entry_path(dir, id)));
            }
        }

        let written = staged.len();
        for (temp, path) in staged {
            temp.persist(&path).map_err(|e| {
                KunaError::StoreCommitFailed(format!("{}: {}", path.display(), e.error))
            })?;
        }

        let mut removed = 0;
        for op in ops {
            let result = match op {
                PendingOp::Write { .. } => continue,
                PendingOp::RemoveEntry { path } => std::fs::remove_file(&path),
                PendingOp::RemoveCalendar { dir } => std::fs::remove_dir_all(&dir),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(KunaError::StoreCommitFailed(e.to_string())),
            }
        }

        debug!(written, removed, "committed calendar changes");
        Ok(())
    }

    fn reset(&mut self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "dropping staged calendar changes");
        }
        self.pending.clear();
    }
}

fn write_temp(dir: &Path, content: &str) -> std::io::Result<NamedTempFile> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content.as_bytes())?;
    temp.flush()?;
    Ok(temp)
}

/// Latest modification time anywhere in the store: the root, calendar
/// directories, their metadata and entry files. Changes whenever an entry
/// or calendar is added, edited or removed.
pub fn fingerprint(root: &Path) -> Option<SystemTime> {
    fn modified(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    let mut latest = modified(root)?;
    for calendar in std::fs::read_dir(root).ok()?.flatten() {
        let path = calendar.path();
        if !path.is_dir() {
            continue;
        }
        let candidates = std::iter::once(modified(&path))
            .chain(std::iter::once(modified(&CalendarMeta::path(&path))))
            .chain(
                std::fs::read_dir(&path)
                    .into_iter()
                    .flatten()
                    .flatten()
                    .map(|f| modified(&f.path())),
            );
        for time in candidates.flatten() {
            latest = latest.max(time);
        }
    }
    Some(latest)
}
