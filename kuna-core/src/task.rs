//! Remote task types.
//!
//! These mirror what the task service hands us. The engine treats them as
//! read-only input, except for the patches it sends back in two-way mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = i64;
pub type ProjectId = i64;

/// A task as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Absolute reminder times
    #[serde(default)]
    pub reminders: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub done: bool,
    /// Last update time on the remote side (drives the sync cursor)
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
}

/// Changed task fields to push back to the remote service.
///
/// `None` means "leave as is"; an empty patch is never sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Vec<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start.is_none()
            && self.due.is_none()
            && self.end.is_none()
            && self.reminders.is_none()
    }

    /// Apply the patch to a local copy of the task.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if self.start.is_some() {
            task.start = self.start;
        }
        if self.due.is_some() {
            task.due = self.due;
        }
        if self.end.is_some() {
            task.end = self.end;
        }
        if let Some(reminders) = &self.reminders {
            task.reminders = reminders.clone();
        }
    }
}
