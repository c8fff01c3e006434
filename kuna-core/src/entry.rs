//! Calendar entry value types.
//!
//! Entries are plain values. The calendar store adapter turns an
//! [`EntryDraft`] into whatever mutable handle the platform needs when it is
//! saved, and hands back [`Entry`] snapshots when enumerating.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::{self, OwnershipTag};

pub type EntryId = String;
pub type CalendarId = String;

/// The user-visible content of a calendar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFields {
    pub title: String,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    #[serde(default)]
    pub reminders: Vec<DateTime<Utc>>,
}

/// A calendar entry as enumerated from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub calendar_id: CalendarId,
    pub fields: EntryFields,
    /// Last modification time reported by the store
    pub last_modified: Option<DateTime<Utc>>,
}

/// An entry to be saved. `id: None` creates a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub id: Option<EntryId>,
    pub calendar_id: CalendarId,
    pub fields: EntryFields,
}

/// Entry fields in the order they are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Title,
    Description,
    Start,
    End,
    AllDay,
    Reminders,
    /// Ownership URL or notes marker missing or different
    Tag,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Title => "title",
            FieldKind::Description => "description",
            FieldKind::Start => "start",
            FieldKind::End => "end",
            FieldKind::AllDay => "all-day",
            FieldKind::Reminders => "reminders",
            FieldKind::Tag => "tag",
        };
        write!(f, "{name}")
    }
}

impl EntryFields {
    /// The free-text description with the ownership marker removed.
    pub fn description(&self) -> String {
        self.notes
            .as_deref()
            .map(tag::strip_marker)
            .unwrap_or_default()
    }

    /// Compare two sets of fields and return the first one that differs.
    ///
    /// Used both to decide whether an owned entry needs an update and to
    /// categorize conflicts, so both paths agree on what "different" means.
    /// Content fields are checked before the tag channels.
    pub fn first_difference(&self, other: &EntryFields) -> Option<FieldKind> {
        if self.title != other.title {
            return Some(FieldKind::Title);
        }
        if self.description().trim() != other.description().trim() {
            return Some(FieldKind::Description);
        }
        if self.start != other.start {
            return Some(FieldKind::Start);
        }
        if self.end != other.end {
            return Some(FieldKind::End);
        }
        if self.all_day != other.all_day {
            return Some(FieldKind::AllDay);
        }
        if sorted(&self.reminders) != sorted(&other.reminders) {
            return Some(FieldKind::Reminders);
        }
        let marker = |f: &EntryFields| f.notes.as_deref().and_then(OwnershipTag::from_notes);
        if self.url != other.url || marker(self) != marker(other) {
            return Some(FieldKind::Tag);
        }
        None
    }

    pub fn differs_from(&self, other: &EntryFields) -> bool {
        self.first_difference(other).is_some()
    }

    /// Whether the entry overlaps `[from, to]`.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start <= to && self.end >= from
    }
}

fn sorted(times: &[DateTime<Utc>]) -> Vec<DateTime<Utc>> {
    let mut times = times.to_vec();
    times.sort();
    times.dedup();
    times
}

impl Entry {
    /// Draft that rewrites this entry in place with new fields.
    pub fn update_with(&self, fields: EntryFields) -> EntryDraft {
        EntryDraft {
            id: Some(self.id.clone()),
            calendar_id: self.calendar_id.clone(),
            fields,
        }
    }

    /// Draft for a fresh copy of this entry in another calendar.
    pub fn copy_to(&self, calendar_id: &str) -> EntryDraft {
        EntryDraft {
            id: None,
            calendar_id: calendar_id.to_string(),
            fields: self.fields.clone(),
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.fields.title, self.fields.start.format("%Y-%m-%d %H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fields() -> EntryFields {
        let tag = OwnershipTag::new(1, 2);
        EntryFields {
            title: "Write report".to_string(),
            notes: Some(tag.compose_notes("Quarterly numbers")),
            url: Some(tag.url()),
            start: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
            all_day: false,
            reminders: vec![],
        }
    }

    #[test]
    fn identical_fields_do_not_differ() {
        assert_eq!(fields().first_difference(&fields()), None);
    }

    #[test]
    fn title_is_reported_before_later_fields() {
        let mut other = fields();
        other.title = "Other".to_string();
        other.end = other.end + chrono::Duration::hours(1);
        assert_eq!(fields().first_difference(&other), Some(FieldKind::Title));
    }

    #[test]
    fn description_ignores_marker_placement_and_whitespace() {
        let mut other = fields();
        other.notes = Some("KUNA_EVENT: task=1 project=2\nQuarterly numbers\n".to_string());
        assert_eq!(fields().first_difference(&other), None);
    }

    #[test]
    fn lost_url_is_a_tag_difference() {
        let mut other = fields();
        other.url = None;
        assert_eq!(fields().first_difference(&other), Some(FieldKind::Tag));
    }

    #[test]
    fn reminder_order_does_not_matter() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();
        let mut left = fields();
        left.reminders = vec![a, b];
        let mut right = fields();
        right.reminders = vec![b, a];
        assert_eq!(left.first_difference(&right), None);

        right.reminders = vec![a];
        assert_eq!(left.first_difference(&right), Some(FieldKind::Reminders));
    }
}
