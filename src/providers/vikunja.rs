//! Vikunja REST client.
//!
//! Endpoints used:
//! - `GET /api/v1/projects`
//! - `GET /api/v1/tasks/all`, newest update first, paged via the
//!   `x-pagination-total-pages` header
//! - `GET` + `POST /api/v1/tasks/{id}` to patch a task (Vikunja updates take
//!   the whole task, so the current one is fetched and edited)
//!
//! Vikunja reports unset dates as `0001-01-01T00:00:00Z`; those are mapped
//! to `None`.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use kuna_core::remote::TaskService;
use kuna_core::task::{Project, ProjectId, Task, TaskId, TaskPatch};
use kuna_core::{KunaError, KunaResult};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

const PER_PAGE: u32 = 50;
const TOTAL_PAGES_HEADER: &str = "x-pagination-total-pages";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiProject {
    id: ProjectId,
    title: String,
    #[serde(default)]
    is_archived: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReminder {
    reminder: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiTask {
    id: TaskId,
    project_id: ProjectId,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    done: bool,
    due_date: Option<DateTime<Utc>>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    reminders: Option<Vec<ApiReminder>>,
    updated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

fn present(date: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    date.filter(|d| d.year() > 1)
}

impl From<ApiTask> for Task {
    fn from(api: ApiTask) -> Self {
        let mut reminders: Vec<DateTime<Utc>> = api
            .reminders
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| present(r.reminder))
            .collect();
        reminders.sort();

        Task {
            id: api.id,
            project_id: api.project_id,
            title: api.title,
            description: api.description,
            start: present(api.start_date),
            due: present(api.due_date),
            end: present(api.end_date),
            reminders,
            done: api.done,
            updated: api.updated,
        }
    }
}

/// Write the fields set in `patch` into a task as returned by the API.
fn apply_patch(task: &mut Value, patch: &TaskPatch) {
    let Some(object) = task.as_object_mut() else {
        return;
    };

    if let Some(title) = &patch.title {
        object.insert("title".into(), json!(title));
    }
    if let Some(description) = &patch.description {
        object.insert("description".into(), json!(description));
    }
    for (key, date) in [
        ("start_date", patch.start),
        ("due_date", patch.due),
        ("end_date", patch.end),
    ] {
        if let Some(date) = date {
            object.insert(key.into(), json!(date));
        }
    }
    if let Some(reminders) = &patch.reminders {
        let reminders: Vec<Value> = reminders.iter().map(|r| json!({ "reminder": r })).collect();
        object.insert("reminders".into(), Value::Array(reminders));
    }
}

fn total_pages(headers: &HeaderMap) -> u32 {
    headers
        .get(TOTAL_PAGES_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1)
}

/// HTTP client for a Vikunja instance
pub struct VikunjaClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl VikunjaClient {
    pub fn new(api_url: &str, token: &str) -> KunaResult<Self> {
        let mut base_url = Url::parse(api_url)
            .map_err(|e| KunaError::Config(format!("Invalid api_url '{api_url}': {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| KunaError::Remote(e.to_string()))?;

        Ok(VikunjaClient {
            http,
            base_url,
            token: token.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> KunaResult<Url> {
        self.base_url
            .join(&format!("api/v1/{path}"))
            .map_err(|e| KunaError::Config(format!("Invalid endpoint {path}: {e}")))
    }

    async fn check(resp: reqwest::Response) -> KunaResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = match resp.json::<ErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
        };
        Err(KunaError::Remote(format!("{status}: {message}")))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        page: u32,
    ) -> KunaResult<(Vec<T>, u32)> {
        let resp = self
            .http
            .get(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .query(query)
            .query(&[("page", page), ("per_page", PER_PAGE)])
            .send()
            .await
            .map_err(|e| KunaError::Remote(format!("Failed to reach task service: {e}")))?;
        let resp = Self::check(resp).await?;

        let pages = total_pages(resp.headers());
        let items = resp
            .json::<Option<Vec<T>>>()
            .await
            .map_err(|e| KunaError::Remote(format!("Unexpected response from {path}: {e}")))?;
        Ok((items.unwrap_or_default(), pages))
    }

    async fn get_task(&self, id: TaskId) -> KunaResult<Value> {
        let resp = self
            .http
            .get(self.endpoint(&format!("tasks/{id}"))?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| KunaError::Remote(format!("Failed to reach task service: {e}")))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| KunaError::Remote(e.to_string()))
    }
}

impl TaskService for VikunjaClient {
    #[instrument(skip(self))]
    async fn fetch_projects(&self) -> KunaResult<Vec<Project>> {
        let mut projects = Vec::new();
        let mut page = 1;
        loop {
            let (items, pages) = self.get_page::<ApiProject>("projects", &[], page).await?;
            projects.extend(
                items
                    .into_iter()
                    .filter(|p| !p.is_archived)
                    .map(|p| Project {
                        id: p.id,
                        title: p.title,
                    }),
            );
            if page >= pages {
                break;
            }
            page += 1;
        }

        debug!(count = projects.len(), "fetched projects");
        Ok(projects)
    }

    /// Pages run newest update first, so an incremental fetch stops at the
    /// first page reaching back past `updated_since`.
    #[instrument(skip(self))]
    async fn fetch_tasks(
        &self,
        projects: &BTreeSet<ProjectId>,
        updated_since: Option<DateTime<Utc>>,
    ) -> KunaResult<Vec<Task>> {
        let query = [("sort_by", "updated"), ("order_by", "desc")];
        let is_new = |t: &ApiTask| updated_since.is_none_or(|since| t.updated > since);

        let mut tasks = Vec::new();
        let mut page = 1;
        loop {
            let (items, pages) = self.get_page::<ApiTask>("tasks/all", &query, page).await?;
            let reached_cursor = items.iter().any(|t| !is_new(t));
            tasks.extend(
                items
                    .into_iter()
                    .filter(|t| is_new(t))
                    .filter(|t| projects.is_empty() || projects.contains(&t.project_id))
                    .map(Task::from),
            );
            if reached_cursor || page >= pages {
                break;
            }
            page += 1;
        }

        debug!(count = tasks.len(), "fetched tasks");
        Ok(tasks)
    }

    #[instrument(skip(self, patch))]
    async fn patch_task(&self, id: TaskId, patch: &TaskPatch) -> KunaResult<Task> {
        let mut task = self.get_task(id).await?;
        apply_patch(&mut task, patch);

        let resp = self
            .http
            .post(self.endpoint(&format!("tasks/{id}"))?)
            .bearer_auth(&self.token)
            .json(&task)
            .send()
            .await
            .map_err(|e| KunaError::Remote(format!("Failed to reach task service: {e}")))?;

        let updated: ApiTask = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| KunaError::Remote(e.to_string()))?;
        Ok(updated.into())
    }
}
