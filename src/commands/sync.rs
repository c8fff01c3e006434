use anyhow::{Context, Result};
use kuna_core::{KunaConfig, SyncTrigger};

use crate::render::Render;
use crate::utils::tui;

pub async fn run(config: &KunaConfig, incremental: bool) -> Result<()> {
    let mut engine = super::open_enabled_engine(config)?;
    let trigger = if incremental {
        SyncTrigger::Scheduled
    } else {
        SyncTrigger::Manual
    };

    let spinner = tui::create_spinner(format!("Syncing into {}", config.data_path().display()));
    let result = engine.sync(trigger).await;
    spinner.finish_and_clear();

    let report = result.context("Sync failed")?;
    println!("{}", report.render());

    Ok(())
}
