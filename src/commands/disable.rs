use anyhow::{Context, Result};
use kuna_core::{Disposition, KunaConfig};
use owo_colors::OwoColorize;

use crate::utils::tui;

pub async fn run(config: &KunaConfig, disposition: Disposition) -> Result<()> {
    let mut engine = super::open_engine(config)?;

    let spinner = tui::create_spinner("Turning sync off".to_string());
    let result = engine.disable(disposition).await;
    spinner.finish_and_clear();
    result.context("Could not clean up calendars; sync settings were reset anyway")?;

    let outcome = match disposition {
        Disposition::KeepEverything => "Calendars and entries were left in place.",
        Disposition::RemoveKunaEvents => "Mirrored entries were removed.",
        Disposition::ArchiveCalendars => "Calendars were marked as archived.",
        Disposition::DeleteEverything => "Mirrored calendars were deleted.",
    };
    println!("{} Sync is off. {}", "✓".green(), outcome.dimmed());

    Ok(())
}
