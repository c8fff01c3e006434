use anyhow::Result;
use chrono::{DateTime, Utc};
use kuna_core::KunaConfig;
use kuna_core::calendar_store::{CalendarStore, StoreCalendar};
use kuna_core::preferences::SyncPreferences;
use kuna_core::settings::{keys, load_json};
use kuna_core::state::IdentifierMap;
use kuna_core::tag;
use kuna_core::window::SyncWindow;
use owo_colors::OwoColorize;

use crate::render::{Render, ago};
use crate::store::IcsDirStore;

pub fn run(config: &KunaConfig) -> Result<()> {
    let settings = super::open_settings()?;
    let prefs: SyncPreferences = load_json(&settings, keys::PREFERENCES)?.unwrap_or_default();
    let last_sync: Option<DateTime<Utc>> = load_json(&settings, keys::LAST_SYNC)?.flatten();
    let cursor: Option<DateTime<Utc>> = load_json(&settings, keys::CURSOR)?.flatten();
    let id_map: IdentifierMap = load_json(&settings, keys::IDENTIFIER_MAP)?.unwrap_or_default();

    let store = IcsDirStore::open(config.data_path());

    println!("{}", "Sync".bold());
    if !prefs.enabled {
        println!("  {}", "off (turn it on with: kuna setup)".dimmed());
    } else {
        let direction = if prefs.two_way { "two-way" } else { "one-way" };
        println!("  Mode:       {} ({direction})", prefs.mode);
        if prefs.two_way {
            println!("  Conflicts:  {}", prefs.conflict_policy);
        }
        let projects = if prefs.projects.is_empty() {
            "all".to_string()
        } else {
            prefs
                .projects
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("  Projects:   {projects}");
        println!(
            "  Completed:  {}",
            if prefs.include_completed { "included" } else { "skipped" }
        );
        println!(
            "  Last sync:  {}",
            last_sync.map(ago).unwrap_or_else(|| "never".to_string())
        );
        if let Some(cursor) = cursor {
            println!("  Cursor:     {}", cursor.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        println!("  Tracked:    {} entries", id_map.len());
    }

    println!();
    println!("{}", "Calendars".bold());
    println!("  {}", store.root().display().dimmed());

    if !store.has_access() {
        println!("  {}", "Calendar directory missing or not accessible".red());
        return Ok(());
    }

    let ours: Vec<&str> = prefs.all_calendar_refs().map(|r| r.id.as_str()).collect();
    let calendars = store.list_calendars()?;
    if calendars.is_empty() {
        println!("  {}", "No calendars yet".dimmed());
    }
    for calendar in &calendars {
        let owned = owned_count(&store, calendar)?;
        let marker = if ours.contains(&calendar.id.as_str()) {
            String::new()
        } else {
            " (not in use)".dimmed().to_string()
        };
        println!(
            "  {}{}  {}",
            calendar.render(),
            marker,
            format!("{owned} mirrored").dimmed()
        );
    }

    Ok(())
}

fn owned_count(store: &IcsDirStore, calendar: &StoreCalendar) -> Result<usize> {
    let window = SyncWindow::everything();
    let entries = store.entries(std::slice::from_ref(calendar), window.from, window.to)?;
    Ok(entries.iter().filter(|e| tag::is_owned(&e.fields)).count())
}
