use std::path::{Path, PathBuf};

use kuna_core::calendar_store::StoreCalendar;
use kuna_core::{KunaError, KunaResult};
use serde::{Deserialize, Serialize};

const META_DIR: &str = ".kuna";
const META_FILE: &str = "calendar.toml";

/// Metadata stored in each calendar's .kuna/calendar.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarMeta {
    pub id: String,
    pub name: String,
    pub source: String,
}

/// A calendar directory found under the store root.
#[derive(Debug, Clone)]
pub struct CalendarDir {
    pub path: PathBuf,
    pub meta: CalendarMeta,
}

impl CalendarMeta {
    pub fn path(calendar_dir: &Path) -> PathBuf {
        calendar_dir.join(META_DIR).join(META_FILE)
    }

    /// Load .kuna/calendar.toml. Directories without one are not calendars.
    pub fn load(calendar_dir: &Path) -> KunaResult<Option<Self>> {
        let path = Self::path(calendar_dir);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let meta = toml::from_str(&content)
            .map_err(|e| KunaError::Store(format!("Invalid {}: {e}", path.display())))?;
        Ok(Some(meta))
    }

    pub fn save(&self, calendar_dir: &Path) -> KunaResult<()> {
        let dir = calendar_dir.join(META_DIR);
        std::fs::create_dir_all(&dir)?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| KunaError::Store(format!("Could not encode calendar metadata: {e}")))?;
        std::fs::write(dir.join(META_FILE), content)?;
        Ok(())
    }
}

impl CalendarDir {
    pub fn to_store_calendar(&self) -> StoreCalendar {
        StoreCalendar {
            id: self.meta.id.clone(),
            name: self.meta.name.clone(),
            source_id: self.meta.source.clone(),
        }
    }

    pub fn entry_path(&self, entry_id: &str) -> PathBuf {
        entry_path(&self.path, entry_id)
    }
}

pub fn entry_path(calendar_dir: &Path, entry_id: &str) -> PathBuf {
    calendar_dir.join(format!("{entry_id}.ics"))
}

/// Every calendar directory directly under `root`, sorted by name.
pub fn scan(root: &Path) -> KunaResult<Vec<CalendarDir>> {
    let mut calendars = Vec::new();
    if !root.is_dir() {
        return Ok(calendars);
    }

    for dir_entry in std::fs::read_dir(root)? {
        let path = dir_entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(meta) = CalendarMeta::load(&path)? {
            calendars.push(CalendarDir { path, meta });
        }
    }

    calendars.sort_by(|a, b| a.meta.name.cmp(&b.meta.name).then(a.path.cmp(&b.path)));
    Ok(calendars)
}

/// A directory name for a new calendar, adding -2, -3, etc. on collision.
pub fn unique_dir(root: &Path, name: &str) -> PathBuf {
    let base = match slug::slugify(name) {
        s if s.is_empty() => "calendar".to_string(),
        s => s,
    };

    let mut candidate = root.join(&base);
    let mut n = 2;
    while candidate.exists() {
        candidate = root.join(format!("{base}-{n}"));
        n += 1;
    }
    candidate
}
