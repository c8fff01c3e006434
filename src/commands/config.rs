use std::path::Path;

use anyhow::{Context, Result};
use kuna_core::KunaConfig;
use owo_colors::OwoColorize;

pub fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists.\n\nOverwrite it with:\n  kuna config init --force",
            config_path.display()
        );
    }

    KunaConfig::create_default_config(config_path)
        .with_context(|| format!("Could not write {}", config_path.display()))?;
    println!("{} Wrote {}", "✓".green(), config_path.display());

    Ok(())
}

pub fn paths(config_path: &Path, config: &KunaConfig) -> Result<()> {
    let state_path = KunaConfig::state_path()?;

    println!("{}", "Paths".bold());
    println!("  Config:     {}", config_path.display());
    println!("  State:      {}", state_path.display());
    println!("  Calendars:  {}", config.data_path().display());
    println!(
        "  Tasks:      {}",
        config.api_url.as_deref().unwrap_or("(not configured)")
    );

    Ok(())
}
