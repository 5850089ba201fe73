use crate::context::TaskContext;
use crate::journal::JournalEntry;
use crate::models::{AgentProfile, Lease, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of `request_next_task`. `NoWork` and `AlreadyAssigned` are
/// expected outcomes, not failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Assigned { task: Task, context: TaskContext },
    AlreadyAssigned { task: Task, context: TaskContext },
    NoWork,
}

/// Acknowledgement for progress and completion reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum ReportAck {
    Progress { task_id: String, percent: u8 },
    Completed { task_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockerOutcome {
    pub task_id: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBrief {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
}

impl From<&Task> for TaskBrief {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            status: task.status,
            assignee: task.assignee.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub project_id: String,
    pub snapshot_version: u64,
    pub counts: BTreeMap<String, usize>,
    pub blocked: Vec<TaskBrief>,
    pub active_leases: Vec<Lease>,
    pub recent: Vec<JournalEntry>,
    pub graph_warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent: AgentProfile,
    pub lease: Option<Lease>,
    pub recent_completions: Vec<String>,
}

/// What one reconciliation pass changed; returned for logging and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Leases released because the task vanished or the heartbeat went
    /// stale.
    pub expired: Vec<String>,
    /// Leases closed because the board already showed the task finished.
    pub closed: Vec<String>,
    /// Fresh leases whose board status was resynchronized to in_progress.
    pub resynced: Vec<String>,
    /// Orphaned in_progress tasks recovered under a known agent's lease.
    pub recovered: Vec<String>,
    /// Orphaned in_progress tasks reverted to todo.
    pub reverted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.expired.is_empty()
            && self.closed.is_empty()
            && self.resynced.is_empty()
            && self.recovered.is_empty()
            && self.reverted.is_empty()
    }
}
