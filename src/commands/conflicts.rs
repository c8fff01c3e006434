use anyhow::{Context, Result};
use kuna_core::conflict::ConflictPolicy;
use kuna_core::{KunaConfig, SyncTrigger};
use owo_colors::OwoColorize;

use super::Engine;
use crate::render::Render;
use crate::utils::tui;

/// Conflicts only exist for the duration of a pass, so each command that
/// needs them runs one first.
pub async fn surface(engine: &mut Engine) -> Result<()> {
    let spinner = tui::create_spinner("Checking for conflicts".to_string());
    let result = engine.sync(SyncTrigger::Manual).await;
    spinner.finish_and_clear();
    result.context("Sync failed")?;
    Ok(())
}

pub async fn run(config: &KunaConfig) -> Result<()> {
    let mut engine = super::open_enabled_engine(config)?;
    let prefs = engine.preferences();

    if !prefs.two_way {
        println!("{}", "Two-way sync is off, calendar edits are not tracked.".dimmed());
        return Ok(());
    }
    if prefs.conflict_policy != ConflictPolicy::Manual {
        println!(
            "{}",
            format!("Conflicts are settled automatically ({}).", prefs.conflict_policy).dimmed()
        );
        return Ok(());
    }

    surface(&mut engine).await?;

    let conflicts: Vec<_> = engine.surfaced_conflicts().collect();
    if conflicts.is_empty() {
        println!("{}", "No conflicts".dimmed());
        return Ok(());
    }

    for conflict in &conflicts {
        println!("   {}", conflict.render());
    }
    println!();
    println!(
        "Settle one with: kuna resolve <task> --use {}|{}",
        "task".bold(),
        "calendar".bold()
    );

    Ok(())
}
