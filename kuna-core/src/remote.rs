//! Interface to the remote task service.
//!
//! Transport concerns (retries, timeouts) belong to the implementation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::KunaResult;
use crate::task::{Project, ProjectId, Task, TaskId, TaskPatch};

#[allow(async_fn_in_trait)]
pub trait TaskService {
    async fn fetch_projects(&self) -> KunaResult<Vec<Project>>;

    /// Tasks in `projects` (all projects if empty), optionally only those
    /// updated after `updated_since`.
    async fn fetch_tasks(
        &self,
        projects: &BTreeSet<ProjectId>,
        updated_since: Option<DateTime<Utc>>,
    ) -> KunaResult<Vec<Task>>;

    /// Apply `patch` and return the task as stored remotely afterwards.
    async fn patch_task(&self, id: TaskId, patch: &TaskPatch) -> KunaResult<Task>;
}
