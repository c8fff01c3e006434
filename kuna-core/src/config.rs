//! Configuration: the user-editable config file and the engine settings
//! derived from it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{KunaError, KunaResult};
use crate::window::SyncWindow;

pub const DEFAULT_APP_NAME: &str = "Kuna";
static DEFAULT_CALENDAR_DIR: &str = "~/calendar/kuna";

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_calendar_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CALENDAR_DIR)
}

fn default_past_days() -> i64 {
    90
}

fn default_future_days() -> i64 {
    365
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_full_refresh_hours() -> i64 {
    24
}

fn default_sync_interval_secs() -> u64 {
    15 * 60
}

/// Configuration at ~/.config/kuna/config.toml, overridable with `KUNA_*`
/// environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KunaConfig {
    /// Used to name the calendars we create
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Where the local calendar store keeps its calendars
    #[serde(default = "default_calendar_dir")]
    pub calendar_dir: PathBuf,

    /// Base URL of the task service, e.g. https://try.vikunja.io
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    /// IANA zone used for all-day entries. Defaults to the system zone.
    #[serde(default)]
    pub time_zone: Option<String>,

    #[serde(default = "default_past_days")]
    pub past_days: i64,

    #[serde(default = "default_future_days")]
    pub future_days: i64,

    /// Quiet period for coalescing store-changed notifications
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum age of the last full task pull before an incremental pass
    /// is upgraded to a full one
    #[serde(default = "default_full_refresh_hours")]
    pub full_refresh_hours: i64,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl Default for KunaConfig {
    fn default() -> Self {
        KunaConfig {
            app_name: default_app_name(),
            calendar_dir: default_calendar_dir(),
            api_url: None,
            api_token: None,
            time_zone: None,
            past_days: default_past_days(),
            future_days: default_future_days(),
            debounce_ms: default_debounce_ms(),
            full_refresh_hours: default_full_refresh_hours(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

impl KunaConfig {
    pub fn config_path() -> KunaResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| KunaError::Config("Could not determine config directory".into()))?
            .join("kuna");

        Ok(config_dir.join("config.toml"))
    }

    /// Where sync state (preferences, cursor, identifier map) is persisted.
    pub fn state_path() -> KunaResult<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| KunaError::Config("Could not determine data directory".into()))?
            .join("kuna");

        Ok(data_dir.join("state.json"))
    }

    /// Load the default config file, creating a commented template first if
    /// there is none.
    pub fn load() -> KunaResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> KunaResult<Self> {
        Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("KUNA").try_parsing(true))
            .build()
            .map_err(|e| KunaError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| KunaError::Config(e.to_string()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> KunaResult<()> {
        let contents = format!(
            "\
# kuna configuration

# Task service:
# api_url = \"https://try.vikunja.io\"
# api_token = \"tk_...\"

# Where mirrored calendars live:
# calendar_dir = \"{DEFAULT_CALENDAR_DIR}\"

# Name used for the calendars kuna creates:
# app_name = \"{DEFAULT_APP_NAME}\"

# Zone for all-day entries (defaults to the system zone):
# time_zone = \"Europe/Berlin\"

# Days of entries to mirror around today:
# past_days = {}
# future_days = {}
",
            default_past_days(),
            default_future_days(),
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KunaError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| KunaError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// The calendar directory with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        let full_path_str =
            shellexpand::tilde(&self.calendar_dir.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    /// Engine settings. `system_zone` is the host's IANA zone name, used when
    /// the config does not pin one.
    pub fn engine_config(&self, system_zone: Option<&str>) -> KunaResult<EngineConfig> {
        let time_zone = match (&self.time_zone, system_zone) {
            (Some(configured), _) => configured
                .parse::<Tz>()
                .map_err(|e| KunaError::Config(format!("Invalid time_zone '{configured}': {e}")))?,
            (None, Some(system)) => system.parse::<Tz>().unwrap_or(Tz::UTC),
            (None, None) => Tz::UTC,
        };

        if self.past_days < 0 || self.future_days < 0 {
            return Err(KunaError::Config(
                "past_days and future_days must not be negative".into(),
            ));
        }

        Ok(EngineConfig {
            app_name: self.app_name.clone(),
            time_zone,
            window_past: Duration::days(self.past_days),
            window_future: Duration::days(self.future_days),
            full_refresh: Duration::hours(self.full_refresh_hours),
            debounce: std::time::Duration::from_millis(self.debounce_ms),
        })
    }
}

/// Runtime settings for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub app_name: String,
    pub time_zone: Tz,
    pub window_past: Duration,
    pub window_future: Duration,
    pub full_refresh: Duration,
    pub debounce: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            app_name: default_app_name(),
            time_zone: Tz::UTC,
            window_past: Duration::days(default_past_days()),
            window_future: Duration::days(default_future_days()),
            full_refresh: Duration::hours(default_full_refresh_hours()),
            debounce: std::time::Duration::from_millis(default_debounce_ms()),
        }
    }
}

impl EngineConfig {
    pub fn window(&self, now: DateTime<Utc>) -> SyncWindow {
        SyncWindow::around(now, self.window_past, self.window_future)
    }
}
