use anyhow::{Context, Result};
use kuna_core::conflict::ConflictPolicy;
use kuna_core::preferences::SyncMode;
use kuna_core::task::ProjectId;
use kuna_core::{KunaConfig, OnboardingChoice, SyncState};
use owo_colors::OwoColorize;

use crate::render::Render;
use crate::utils::tui;

pub fn choice(
    mode: SyncMode,
    projects: Vec<ProjectId>,
    two_way: bool,
    conflict_policy: ConflictPolicy,
    skip_completed: bool,
) -> OnboardingChoice {
    OnboardingChoice {
        mode,
        projects: projects.into_iter().collect(),
        two_way,
        conflict_policy,
        include_completed: !skip_completed,
    }
}

pub async fn run(config: &KunaConfig, choice: OnboardingChoice) -> Result<()> {
    let mut engine = super::open_engine(config)?;

    engine.begin_onboarding()?;
    let spinner = tui::create_spinner("Setting up sync".to_string());
    let result = engine.complete_onboarding(choice).await;
    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if engine.state() == SyncState::Onboarding {
                engine.cancel_onboarding()?;
            }
            return Err(e).context("Setup failed");
        }
    };

    let prefs = engine.preferences();
    println!(
        "{} Syncing {} into {}",
        "✓".green(),
        if prefs.projects.is_empty() {
            "all projects".to_string()
        } else {
            format!("{} projects", prefs.projects.len())
        },
        config.data_path().display()
    );
    for calendar in engine.resolved_calendars().values() {
        println!("   {}", calendar.render());
    }
    println!();
    println!("{}", report.render());

    Ok(())
}
