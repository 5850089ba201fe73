use super::BoardAdapter;
use crate::{
    models::{Task, TaskSpec, TaskStatus},
    MarcusError, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// In-process board used by tests and single-machine development.
///
/// State lives in memory; when constructed with a backing file it is loaded
/// at build time and rewritten after every mutation. Not crash-durable; the
/// assignment ledger, not the board, is the recovery source of truth.
pub struct LocalBoard {
    path: Option<PathBuf>,
    state: Mutex<LocalState>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalState {
    next_id: u64,
    tasks: BTreeMap<String, Task>,
    comments: Vec<(String, String)>,
}

impl LocalBoard {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LocalState::default()),
        }
    }

    pub fn with_file(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            LocalState::default()
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Seed a fully-formed task, replacing any existing one with the same id.
    /// Test and project-bootstrap helper; not part of the adapter surface.
    pub fn put_task(&self, task: Task) {
        let mut state = self.state.lock().expect("local board lock poisoned");
        state.tasks.insert(task.id.clone(), task);
        self.flush(&state);
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        let state = self.state.lock().expect("local board lock poisoned");
        state.tasks.get(id).cloned()
    }

    pub fn comments_for(&self, id: &str) -> Vec<String> {
        let state = self.state.lock().expect("local board lock poisoned");
        state
            .comments
            .iter()
            .filter(|(task_id, _)| task_id == id)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn flush(&self, state: &LocalState) {
        if let Some(path) = &self.path {
            match serde_json::to_string_pretty(state) {
                Ok(raw) => {
                    if let Err(e) = std::fs::write(path, raw) {
                        tracing::warn!("failed to persist local board to {:?}: {e}", path);
                    }
                }
                Err(e) => tracing::warn!("failed to serialize local board: {e}"),
            }
        }
    }
}

#[async_trait]
impl BoardAdapter for LocalBoard {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let state = self.state.lock().expect("local board lock poisoned");
        Ok(state.tasks.values().cloned().collect())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut state = self.state.lock().expect("local board lock poisoned");
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| MarcusError::NotFound(format!("task {id}")))?;
        if task.status != status {
            debug!("local board: {id} {} -> {}", task.status, status);
            task.status = status;
            task.updated_at = Utc::now();
            if status == TaskStatus::Done {
                task.completed_at = Some(Utc::now());
            }
        }
        self.flush(&state);
        Ok(())
    }

    async fn assign_task(&self, id: &str, agent_id: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().expect("local board lock poisoned");
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| MarcusError::NotFound(format!("task {id}")))?;
        let new = agent_id.map(|a| a.to_string());
        if task.assignee != new {
            task.assigned_at = new.is_some().then(Utc::now);
            task.assignee = new;
            task.updated_at = Utc::now();
        }
        self.flush(&state);
        Ok(())
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<()> {
        let mut state = self.state.lock().expect("local board lock poisoned");
        if !state.tasks.contains_key(id) {
            return Err(MarcusError::NotFound(format!("task {id}")));
        }
        state.comments.push((id.to_string(), body.to_string()));
        self.flush(&state);
        Ok(())
    }

    async fn create_task(&self, spec: &TaskSpec) -> Result<Task> {
        let mut state = self.state.lock().expect("local board lock poisoned");
        state.next_id += 1;
        let now = Utc::now();
        let task = Task {
            id: format!("task-{}", state.next_id),
            name: spec.name.clone(),
            description: spec.description.clone(),
            status: TaskStatus::Todo,
            priority: spec.priority,
            labels: spec.labels.clone(),
            dependencies: spec.dependencies.clone(),
            assignee: None,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            completed_at: None,
            estimated_hours: None,
            actual_hours: None,
        };
        state.tasks.insert(task.id.clone(), task.clone());
        self.flush(&state);
        Ok(task)
    }
}

impl Default for LocalBoard {
    fn default() -> Self {
        Self::in_memory()
    }
}
