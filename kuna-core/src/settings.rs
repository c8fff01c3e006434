//! Durable key/value storage for preferences and sync state.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{KunaError, KunaResult};

pub mod keys {
    pub const PREFERENCES: &str = "sync.preferences";
    pub const CURSOR: &str = "sync.cursor";
    pub const IDENTIFIER_MAP: &str = "sync.identifier_map";
    pub const TASK_CACHE: &str = "sync.task_cache";
    pub const LAST_SYNC: &str = "sync.last_sync";
    pub const LAST_FULL_PULL: &str = "sync.last_full_pull";

    pub const ALL: [&str; 6] = [
        PREFERENCES,
        CURSOR,
        IDENTIFIER_MAP,
        TASK_CACHE,
        LAST_SYNC,
        LAST_FULL_PULL,
    ];
}

pub trait SettingsStore {
    fn get(&self, key: &str) -> KunaResult<Option<String>>;
    fn set(&mut self, key: &str, value: String) -> KunaResult<()>;
    fn remove(&mut self, key: &str) -> KunaResult<()>;
}

/// Read and decode a JSON value. A value that no longer decodes is treated
/// as missing so a bad blob never wedges the engine.
pub fn load_json<T: DeserializeOwned>(
    settings: &impl SettingsStore,
    key: &str,
) -> KunaResult<Option<T>> {
    let Some(raw) = settings.get(key)? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "discarding undecodable setting");
            Ok(None)
        }
    }
}

pub fn save_json<T: Serialize>(
    settings: &mut impl SettingsStore,
    key: &str,
    value: &T,
) -> KunaResult<()> {
    let raw = serde_json::to_string(value)?;
    settings.set(key, raw)
}

#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: BTreeMap<String, String>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> KunaResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> KunaResult<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> KunaResult<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Settings kept in one JSON object file, rewritten atomically on change.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileSettings {
    pub fn open(path: impl Into<PathBuf>) -> KunaResult<Self> {
        let path = path.into();

        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                KunaError::Config(format!("Could not read {}: {e}", path.display()))
            })?
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), keys = values.len(), "opened settings");
        Ok(FileSettings { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> KunaResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, &self.values)?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|e| KunaError::Io(e.error))?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> KunaResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> KunaResult<()> {
        if self.values.get(key) == Some(&value) {
            return Ok(());
        }
        self.values.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> KunaResult<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
