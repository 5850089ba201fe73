use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Label prefix naming a skill a task calls for, e.g. `skill:python`.
pub const LABEL_SKILL: &str = "skill:";
/// Label prefix naming the component a task belongs to, e.g. `component:api`.
pub const LABEL_COMPONENT: &str = "component:";
/// Label prefix naming the lifecycle phase, e.g. `phase:implementation`.
pub const LABEL_PHASE: &str = "phase:";
/// Label prefix naming a parent task; the child gains an implicit edge to it.
pub const LABEL_PARENT: &str = "parent:";
/// Label marking a task as waiting on input outside the system.
pub const LABEL_BLOCKED_EXTERNAL: &str = "blocked:external";

/// A unit of work on the board.
///
/// Tasks are owned by the external board; Marcus normalizes provider records
/// into this shape and is the source of truth only for assignments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub labels: BTreeSet<String>,
    /// Declared predecessor task ids. Must form a DAG across live tasks.
    pub dependencies: BTreeSet<String>,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
}

/// Current status of a task on the board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Cancelled,
}

/// Task priority levels, ordered lowest to highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Coarse lifecycle phases used for ordering work within a component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Design,
    Implementation,
    Testing,
    Documentation,
    Deployment,
}

impl Task {
    pub fn phase(&self) -> Option<Phase> {
        self.labels
            .iter()
            .find_map(|l| l.strip_prefix(LABEL_PHASE))
            .and_then(|p| p.parse().ok())
    }

    /// Component names from `component:*` labels.
    pub fn components(&self) -> BTreeSet<&str> {
        self.labels
            .iter()
            .filter_map(|l| l.strip_prefix(LABEL_COMPONENT))
            .collect()
    }

    /// The declared skill set: `skill:*` and `component:*` label values.
    pub fn declared_skills(&self) -> BTreeSet<&str> {
        self.labels
            .iter()
            .filter_map(|l| {
                l.strip_prefix(LABEL_SKILL)
                    .or_else(|| l.strip_prefix(LABEL_COMPONENT))
            })
            .collect()
    }

    /// Parent task id from a `parent:<id>` label, if present.
    pub fn parent_id(&self) -> Option<&str> {
        self.labels.iter().find_map(|l| l.strip_prefix(LABEL_PARENT))
    }

    pub fn is_externally_blocked(&self) -> bool {
        self.labels.contains(LABEL_BLOCKED_EXTERNAL)
    }

    pub fn shares_component_with(&self, other: &Task) -> bool {
        let mine = self.components();
        other.components().iter().any(|c| mine.contains(c))
    }
}

impl TaskStatus {
    /// Terminal states never transition again through coordinator operations.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("unknown task status: {s}")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Priority {
    /// Scheduler weight; spacing biases urgent work without drowning the
    /// other score terms.
    pub fn weight(&self) -> f64 {
        match self {
            Priority::Low => 0.25,
            Priority::Medium => 0.5,
            Priority::High => 0.75,
            Priority::Urgent => 1.0,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(format!("unknown priority: {s}")),
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "design" => Ok(Phase::Design),
            "implementation" => Ok(Phase::Implementation),
            "testing" => Ok(Phase::Testing),
            "documentation" => Ok(Phase::Documentation),
            "deployment" => Ok(Phase::Deployment),
            _ => Err(format!("unknown phase: {s}")),
        }
    }
}

/// A registered worker agent. Created on first `register_agent`, kept in
/// memory; only the id reaches the persisted ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    pub capabilities: BTreeSet<String>,
    pub registered_at: DateTime<Utc>,
    /// Most recent completed task ids, newest last.
    pub recent_completions: Vec<String>,
    pub completed_count: u64,
}

impl AgentProfile {
    pub fn new(name: String, role: String, capabilities: BTreeSet<String>) -> Self {
        Self {
            id: format!("agent-{}", Uuid::new_v4()),
            name,
            role,
            capabilities,
            registered_at: Utc::now(),
            recent_completions: Vec::new(),
            completed_count: 0,
        }
    }

    pub fn record_completion(&mut self, task_id: String, keep: usize) {
        self.recent_completions.push(task_id);
        if self.recent_completions.len() > keep {
            let drop = self.recent_completions.len() - keep;
            self.recent_completions.drain(..drop);
        }
        self.completed_count += 1;
    }
}

/// An exclusive, time-bounded claim by an agent on a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub agent_id: String,
    pub task_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(agent_id: String, task_id: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            task_id,
            acquired_at: now,
            expires_at: now + ttl,
            heartbeat_at: now,
        }
    }

    /// A lease is stale once its heartbeat is older than the TTL.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.heartbeat_at > ttl
    }
}

/// How a lease ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeaseOutcome {
    Completed,
    Abandoned,
    Expired,
}

/// An architectural decision logged by an agent. Immutable once written;
/// superseding decisions are new records citing the prior one in `what`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    /// Position in the project's logical clock; orders entries without
    /// trusting wall clocks.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub what: String,
    pub why: String,
    pub affects: String,
}

/// Metadata for a produced artifact worth showing to downstream tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub task_id: String,
    pub kind: ArtifactKind,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub uri: Option<String>,
    pub body: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Api,
    Schema,
    Doc,
    DecisionRef,
    Other,
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(ArtifactKind::Api),
            "schema" => Ok(ArtifactKind::Schema),
            "doc" => Ok(ArtifactKind::Doc),
            "decision-ref" => Ok(ArtifactKind::DecisionRef),
            "other" => Ok(ArtifactKind::Other),
            _ => Err(format!("unknown artifact kind: {s}")),
        }
    }
}

/// A point-in-time read of the board. Immutable while held; the version is
/// the cache key for dependency inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub fetched_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

impl Snapshot {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }
}

/// Fields for creating a task through the adapter surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

#[cfg(test)]
pub(crate) fn task_fixture(id: &str, status: TaskStatus) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        name: format!("Task {id}"),
        description: String::new(),
        status,
        priority: Priority::Medium,
        labels: BTreeSet::new(),
        dependencies: BTreeSet::new(),
        assignee: None,
        created_at: now,
        updated_at: now,
        assigned_at: None,
        completed_at: None,
        estimated_hours: None,
        actual_hours: None,
    }
}
