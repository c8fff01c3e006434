pub mod config;
pub mod conflicts;
pub mod disable;
pub mod resolve;
pub mod setup;
pub mod status;
pub mod sync;
pub mod watch;

use anyhow::{Context, Result};
use kuna_core::calendar_store::CalendarStore;
use kuna_core::settings::FileSettings;
use kuna_core::{EngineConfig, KunaConfig, SyncEngine};

use crate::providers::VikunjaClient;
use crate::store::IcsDirStore;

pub type Engine = SyncEngine<IcsDirStore, VikunjaClient, FileSettings>;

pub fn engine_config(config: &KunaConfig) -> Result<EngineConfig> {
    let system_zone = iana_time_zone::get_timezone().ok();
    Ok(config.engine_config(system_zone.as_deref())?)
}

pub fn open_settings() -> Result<FileSettings> {
    let path = KunaConfig::state_path()?;
    FileSettings::open(&path).with_context(|| format!("Could not open {}", path.display()))
}

fn task_service(config: &KunaConfig) -> Result<VikunjaClient> {
    let (Some(url), Some(token)) = (&config.api_url, &config.api_token) else {
        anyhow::bail!(
            "No task service configured.\n\n\
            Set api_url and api_token in your config file:\n  \
            kuna config paths"
        );
    };
    Ok(VikunjaClient::new(url, token)?)
}

/// Build the engine from config, picking up persisted sync state.
pub fn open_engine(config: &KunaConfig) -> Result<Engine> {
    let store = IcsDirStore::open(config.data_path());
    let remote = task_service(config)?;
    let mut engine = SyncEngine::new(store, remote, open_settings()?, engine_config(config)?)
        .context("Could not load sync state")?;

    if engine.store().has_access() {
        engine.permission_changed(true);
    }
    Ok(engine)
}

/// Like [`open_engine`], but fails unless sync has been set up.
pub fn open_enabled_engine(config: &KunaConfig) -> Result<Engine> {
    let engine = open_engine(config)?;
    if !engine.preferences().enabled {
        anyhow::bail!("Sync is off.\n\nTurn it on with:\n  kuna setup");
    }
    Ok(engine)
}
