use super::BoardAdapter;
use crate::{
    config::ProviderKind,
    models::{Priority, Task, TaskSpec, TaskStatus},
    MarcusError, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::warn;

/// REST kanban provider. BoardA and BoardB expose the same capabilities with
/// different paths and field names; one client parameterized by a route map
/// serves both.
pub struct RestBoard {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    routes: Routes,
}

/// Per-provider path and field-name differences, resolved at construction.
struct Routes {
    list: &'static str,
    item: &'static str,
    status_field: &'static str,
    assignee_field: &'static str,
    comment_path: &'static str,
    comment_field: &'static str,
    /// BoardA wraps the task list in an envelope object; BoardB returns a
    /// bare array.
    enveloped_list: bool,
}

impl Routes {
    fn for_provider(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::BoardA => Routes {
                list: "/api/v1/tasks",
                item: "/api/v1/tasks",
                status_field: "status",
                assignee_field: "assignee",
                comment_path: "comments",
                comment_field: "body",
                enveloped_list: true,
            },
            ProviderKind::BoardB => Routes {
                list: "/cards",
                item: "/cards",
                status_field: "state",
                assignee_field: "owner",
                comment_path: "notes",
                comment_field: "text",
                enveloped_list: false,
            },
            ProviderKind::Local => unreachable!("local provider does not use REST"),
        }
    }
}

/// Provider task record before normalization into the closed model.
#[derive(Debug, Serialize, Deserialize)]
struct RawTask {
    id: serde_json::Value,
    #[serde(alias = "title")]
    name: String,
    #[serde(default, alias = "body")]
    description: String,
    #[serde(default, alias = "state")]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, alias = "tags")]
    labels: BTreeSet<String>,
    #[serde(default, alias = "depends_on")]
    dependencies: BTreeSet<String>,
    #[serde(default, alias = "owner")]
    assignee: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    estimated_hours: Option<f64>,
    #[serde(default)]
    actual_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    tasks: Vec<RawTask>,
}

impl RawTask {
    /// Normalizes a provider record into the closed task shape. Unknown
    /// status or priority strings degrade to the safest member of the set.
    fn normalize(self) -> Task {
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        let status = match self.status.as_deref() {
            None => TaskStatus::Todo,
            Some(raw) => parse_status(raw).unwrap_or_else(|| {
                warn!("board returned unknown status {raw:?} for task {id}, treating as todo");
                TaskStatus::Todo
            }),
        };
        let priority = match self.priority.as_deref() {
            None => Priority::Medium,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("board returned unknown priority {raw:?} for task {id}, treating as medium");
                Priority::Medium
            }),
        };
        let now = Utc::now();
        Task {
            id,
            name: self.name,
            description: self.description,
            status,
            priority,
            labels: self.labels,
            dependencies: self.dependencies,
            assignee: self.assignee,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            assigned_at: self.assigned_at,
            completed_at: self.completed_at,
            estimated_hours: self.estimated_hours,
            actual_hours: self.actual_hours,
        }
    }
}

/// Accepts the canonical names plus the synonyms the supported providers use.
fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw.to_lowercase().replace('-', "_").as_str() {
        "todo" | "open" | "backlog" | "ready" => Some(TaskStatus::Todo),
        "in_progress" | "doing" | "active" => Some(TaskStatus::InProgress),
        "blocked" | "on_hold" => Some(TaskStatus::Blocked),
        "done" | "closed" | "complete" | "completed" => Some(TaskStatus::Done),
        "cancelled" | "canceled" | "wont_do" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

impl RestBoard {
    pub fn new(provider: ProviderKind, base_url: String, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            routes: Routes::for_provider(provider),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            // Connection-level failures are worth retrying; the provider may
            // just be restarting.
            MarcusError::TransientProvider {
                message: format!("board request failed: {e}"),
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = format!("board responded {status}");
        if status == StatusCode::NOT_FOUND {
            Err(MarcusError::NotFound(message))
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(MarcusError::TransientProvider { message })
        } else {
            Err(MarcusError::PermanentProvider { message })
        }
    }
}

#[async_trait]
impl BoardAdapter for RestBoard {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let response = self
            .send(self.request(reqwest::Method::GET, self.routes.list))
            .await?;
        let raw: Vec<RawTask> = if self.routes.enveloped_list {
            response
                .json::<ListEnvelope>()
                .await
                .map_err(|e| MarcusError::PermanentProvider {
                    message: format!("malformed task list payload: {e}"),
                })?
                .tasks
        } else {
            response
                .json()
                .await
                .map_err(|e| MarcusError::PermanentProvider {
                    message: format!("malformed task list payload: {e}"),
                })?
        };
        Ok(raw.into_iter().map(RawTask::normalize).collect())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let path = format!("{}/{id}", self.routes.item);
        let body = single_field(self.routes.status_field, json!(status.as_str()));
        self.send(self.request(reqwest::Method::PATCH, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn assign_task(&self, id: &str, agent_id: Option<&str>) -> Result<()> {
        let path = format!("{}/{id}", self.routes.item);
        let body = single_field(self.routes.assignee_field, json!(agent_id));
        self.send(self.request(reqwest::Method::PATCH, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<()> {
        let path = format!("{}/{id}/{}", self.routes.item, self.routes.comment_path);
        let payload = single_field(self.routes.comment_field, json!(body));
        self.send(self.request(reqwest::Method::POST, &path).json(&payload))
            .await?;
        Ok(())
    }

    async fn create_task(&self, spec: &TaskSpec) -> Result<Task> {
        let response = self
            .send(self.request(reqwest::Method::POST, self.routes.item).json(spec))
            .await?;
        let raw: RawTask = response
            .json()
            .await
            .map_err(|e| MarcusError::PermanentProvider {
                message: format!("malformed create response: {e}"),
            })?;
        Ok(raw.normalize())
    }
}

/// The provider mutation payloads are all one-field objects whose key
/// depends on the route map.
fn single_field(field: &str, value: serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), value);
    serde_json::Value::Object(map)
}
