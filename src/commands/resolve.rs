use anyhow::{Context, Result};
use kuna_core::KunaConfig;
use kuna_core::conflict::ConflictPolicy;
use kuna_core::task::TaskId;
use owo_colors::OwoColorize;

pub async fn run(config: &KunaConfig, task: TaskId, side: ConflictPolicy) -> Result<()> {
    if !matches!(side, ConflictPolicy::PreferTask | ConflictPolicy::PreferCalendar) {
        anyhow::bail!("--use must be \"task\" or \"calendar\", got \"{side}\"");
    }

    let mut engine = super::open_enabled_engine(config)?;
    super::conflicts::surface(&mut engine).await?;

    let resolved = engine
        .resolve_conflict(task, side)
        .await
        .with_context(|| format!("Could not resolve the conflict for task #{task}"))?;
    if !resolved {
        anyhow::bail!("No open conflict for task #{task}.\n\nSee open conflicts with:\n  kuna conflicts");
    }

    let winner = match side {
        ConflictPolicy::PreferTask => "task",
        _ => "calendar entry",
    };
    println!("{} Kept the {winner} for #{task}", "✓".green());

    Ok(())
}
