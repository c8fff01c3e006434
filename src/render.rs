//! TUI rendering traits for kuna types.
//!
//! Extension traits that add colored terminal rendering to kuna-core types
//! using owo_colors.

use chrono::{DateTime, Utc};
use kuna_core::calendar_store::StoreCalendar;
use kuna_core::conflict::SyncConflict;
use kuna_core::diff::DiffKind;
use kuna_core::{SyncReport, SyncState};
use owo_colors::OwoColorize;

/// Extension trait for TUI rendering with colors.
pub trait Render {
    fn render(&self) -> String;
}

impl Render for DiffKind {
    fn render(&self) -> String {
        let symbol = self.to_string();
        match self {
            DiffKind::Create => symbol.green().to_string(),
            DiffKind::Update => symbol.yellow().to_string(),
            DiffKind::Delete => symbol.red().to_string(),
        }
    }
}

impl Render for StoreCalendar {
    fn render(&self) -> String {
        format!("📅 {}", self.name)
    }
}

impl Render for SyncState {
    fn render(&self) -> String {
        let label = self.to_string();
        match self {
            SyncState::EnabledIdle => label.green().to_string(),
            SyncState::Disabled => label.dimmed().to_string(),
            _ => label.yellow().to_string(),
        }
    }
}

impl Render for SyncConflict {
    fn render(&self) -> String {
        let entry_modified = self
            .entry_modified
            .map(ago)
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "{} {} {}\n      {}",
            format!("#{}", self.task_id).yellow(),
            self.task_title,
            format!("({} differs)", self.category).dimmed(),
            format!(
                "task changed {}, calendar changed {}",
                ago(self.task_modified),
                entry_modified
            )
            .dimmed()
        )
    }
}

impl Render for SyncReport {
    fn render(&self) -> String {
        let mut lines = Vec::new();

        let counts = [
            (DiffKind::Create, self.changes.created, "created"),
            (DiffKind::Update, self.changes.updated, "updated"),
            (DiffKind::Delete, self.changes.removed, "removed"),
        ];
        for (kind, count, label) in counts {
            if count > 0 {
                lines.push(format!(
                    "   {} {} {} {}",
                    kind.render(),
                    count,
                    pluralize("entry", count),
                    label
                ));
            }
        }

        if let Some(migrated) = self.migrated
            && migrated.moved > 0
        {
            lines.push(format!(
                "   {} {} {} moved to new calendars",
                "»".cyan(),
                migrated.moved,
                pluralize("entry", migrated.moved)
            ));
        }

        if self.conflicts_resolved > 0 {
            lines.push(format!(
                "   {} {} {} settled",
                "✓".green(),
                self.conflicts_resolved,
                pluralize("conflict", self.conflicts_resolved)
            ));
        }

        if !self.conflicts.is_empty() {
            lines.push(format!(
                "   {} {} waiting for a decision (kuna conflicts)",
                "!".yellow(),
                pluralize_count("conflict", self.conflicts.len())
            ));
        }

        for error in &self.errors {
            lines.push(format!("   {}", error.red()));
        }

        if lines.is_empty() {
            lines.push("   No changes".dimmed().to_string());
        }

        let pull = if self.full_pull { "full" } else { "incremental" };
        lines.push(
            format!(
                "   {} fetched ({pull}), {} without dates",
                pluralize_count("task", self.fetched),
                self.skipped
            )
            .dimmed()
            .to_string(),
        );

        lines.join("\n")
    }
}

/// "5 minutes ago" style relative time, to the second.
pub fn ago(at: DateTime<Utc>) -> String {
    let elapsed = (Utc::now() - at).num_seconds();
    if elapsed < 0 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }
    let rounded = std::time::Duration::from_secs(elapsed as u64);
    format!("{} ago", humantime::format_duration(rounded))
}

fn pluralize(word: &str, count: usize) -> String {
    match (word, count) {
        (_, 1) => word.to_string(),
        ("entry", _) => "entries".to_string(),
        _ => format!("{word}s"),
    }
}

fn pluralize_count(word: &str, count: usize) -> String {
    format!("{count} {}", pluralize(word, count))
}
