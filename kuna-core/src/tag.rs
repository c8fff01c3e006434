//! Ownership tagging for calendar entries.
//!
//! Every entry the engine creates carries its source task in two places: the
//! entry URL and a marker line in the notes. Some calendar providers drop one
//! of the two fields on round-trip, so both are always written and either one
//! is enough to prove ownership.
//!
//! Wire format:
//! - URL: `kuna://task/<taskID>?project=<projectID>`
//! - notes line: `KUNA_EVENT: task=<taskID> project=<projectID>`

use url::Url;

use crate::entry::EntryFields;
use crate::task::{ProjectId, TaskId};

pub const URL_SCHEME: &str = "kuna";
pub const MARKER_PREFIX: &str = "KUNA_EVENT:";

/// Identifies the task an owned entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnershipTag {
    pub task_id: TaskId,
    pub project_id: ProjectId,
}

impl OwnershipTag {
    pub fn new(task_id: TaskId, project_id: ProjectId) -> Self {
        OwnershipTag {
            task_id,
            project_id,
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{URL_SCHEME}://task/{}?project={}",
            self.task_id, self.project_id
        )
    }

    pub fn marker_line(&self) -> String {
        format!(
            "{MARKER_PREFIX} task={} project={}",
            self.task_id, self.project_id
        )
    }

    /// Both channels at once: `(url, notes marker line)`.
    pub fn encode(&self) -> (String, String) {
        (self.url(), self.marker_line())
    }

    /// Notes text for an entry: the task description followed by the marker
    /// on its own line.
    pub fn compose_notes(&self, description: &str) -> String {
        let description = strip_marker(description);
        if description.is_empty() {
            self.marker_line()
        } else {
            format!("{}\n\n{}", description, self.marker_line())
        }
    }

    /// Recover the tag from an entry, trying the URL first and the notes
    /// marker second.
    pub fn decode(fields: &EntryFields) -> Option<Self> {
        fields
            .url
            .as_deref()
            .and_then(Self::from_url)
            .or_else(|| fields.notes.as_deref().and_then(Self::from_notes))
    }

    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        if url.scheme() != URL_SCHEME || url.host_str() != Some("task") {
            return None;
        }

        let task_id = url.path().trim_start_matches('/').parse().ok()?;
        let project_id = url
            .query_pairs()
            .find(|(k, _)| k == "project")
            .and_then(|(_, v)| v.parse().ok())?;

        Some(OwnershipTag::new(task_id, project_id))
    }

    pub fn from_notes(notes: &str) -> Option<Self> {
        notes.lines().find_map(parse_marker_line)
    }
}

fn parse_marker_line(line: &str) -> Option<OwnershipTag> {
    let rest = line.trim().strip_prefix(MARKER_PREFIX)?;

    let mut task_id = None;
    let mut project_id = None;
    for token in rest.split_whitespace() {
        if let Some(v) = token.strip_prefix("task=") {
            task_id = v.parse().ok();
        } else if let Some(v) = token.strip_prefix("project=") {
            project_id = v.parse().ok();
        }
    }

    Some(OwnershipTag::new(task_id?, project_id?))
}

fn is_marker_line(line: &str) -> bool {
    parse_marker_line(line).is_some()
}

/// Whether the entry carries a readable tag in either channel. A line that
/// merely starts with the marker prefix, or a `kuna://` URL that isn't a task
/// link, does not count.
pub fn is_owned(fields: &EntryFields) -> bool {
    OwnershipTag::decode(fields).is_some()
}

/// Notes text without marker lines, trimmed.
pub fn strip_marker(notes: &str) -> String {
    notes
        .lines()
        .filter(|l| !is_marker_line(l))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
