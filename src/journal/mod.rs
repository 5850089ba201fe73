//! Decision/artifact store: two append-only logs keyed by task id.
//!
//! Records are immutable once written; "I changed my mind" is a new decision
//! citing the prior one. Entries are ordered by a per-project monotonic
//! logical clock so downstream consumers never depend on wall-clock
//! comparisons between records.

use crate::{
    models::{Artifact, ArtifactKind, Decision},
    MarcusError, Result,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// A journal entry of either log, merged views are ordered by `seq`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    Decision(Decision),
    Artifact(Artifact),
}

impl JournalEntry {
    pub fn seq(&self) -> u64 {
        match self {
            JournalEntry::Decision(d) => d.seq,
            JournalEntry::Artifact(a) => a.seq,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            JournalEntry::Decision(d) => &d.task_id,
            JournalEntry::Artifact(a) => &a.task_id,
        }
    }
}

#[derive(Default)]
struct TaskIndex {
    decisions: Vec<usize>,
    artifacts: Vec<usize>,
}

struct Inner {
    decisions_file: File,
    artifacts_file: File,
    next_seq: u64,
    decisions: Vec<Decision>,
    artifacts: Vec<Artifact>,
    by_task: HashMap<String, TaskIndex>,
    decisions_by_agent: HashMap<String, Vec<usize>>,
}

pub struct Journal {
    decisions_path: PathBuf,
    artifacts_path: PathBuf,
    inner: tokio::sync::Mutex<Inner>,
}

impl Journal {
    /// Opens both logs under `dir`, rebuilding every index from disk.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let decisions_path = dir.join(crate::constants::DECISIONS_FILE);
        let artifacts_path = dir.join(crate::constants::ARTIFACTS_FILE);

        let decisions: Vec<Decision> = read_log(&decisions_path).await?;
        let artifacts: Vec<Artifact> = read_log(&artifacts_path).await?;

        let mut inner = Inner {
            decisions_file: open_append(&decisions_path).await?,
            artifacts_file: open_append(&artifacts_path).await?,
            next_seq: 0,
            decisions: Vec::new(),
            artifacts: Vec::new(),
            by_task: HashMap::new(),
            decisions_by_agent: HashMap::new(),
        };

        for decision in decisions {
            inner.next_seq = inner.next_seq.max(decision.seq + 1);
            index_decision(&mut inner, decision);
        }
        for artifact in artifacts {
            inner.next_seq = inner.next_seq.max(artifact.seq + 1);
            index_artifact(&mut inner, artifact);
        }

        if inner.next_seq > 0 {
            debug!(
                "journal replay: {} decision(s), {} artifact(s), clock at {}",
                inner.decisions.len(),
                inner.artifacts.len(),
                inner.next_seq
            );
        }

        Ok(Self {
            decisions_path,
            artifacts_path,
            inner: tokio::sync::Mutex::new(inner),
        })
    }

    pub fn decisions_path(&self) -> &Path {
        &self.decisions_path
    }

    pub fn artifacts_path(&self) -> &Path {
        &self.artifacts_path
    }

    /// Appends a decision. Returns only after the record is on disk.
    pub async fn record_decision(
        &self,
        task_id: &str,
        agent_id: &str,
        what: String,
        why: String,
        affects: String,
    ) -> Result<Decision> {
        let mut inner = self.inner.lock().await;
        let decision = Decision {
            id: format!("dec-{}", Uuid::new_v4()),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            seq: inner.next_seq,
            ts: Utc::now(),
            what,
            why,
            affects,
        };
        let line = to_line(&decision)?;
        write_line(&mut inner.decisions_file, &line).await?;
        inner.next_seq += 1;
        index_decision(&mut inner, decision.clone());
        Ok(decision)
    }

    /// Appends an artifact. Returns only after the record is on disk.
    pub async fn record_artifact(
        &self,
        task_id: &str,
        kind: ArtifactKind,
        uri: Option<String>,
        body: Option<String>,
        summary: String,
    ) -> Result<Artifact> {
        let mut inner = self.inner.lock().await;
        let artifact = Artifact {
            id: format!("art-{}", Uuid::new_v4()),
            task_id: task_id.to_string(),
            kind,
            seq: inner.next_seq,
            ts: Utc::now(),
            uri,
            body,
            summary,
        };
        let line = to_line(&artifact)?;
        write_line(&mut inner.artifacts_file, &line).await?;
        inner.next_seq += 1;
        index_artifact(&mut inner, artifact.clone());
        Ok(artifact)
    }

    /// All decisions and artifacts logged against a task, in append order.
    pub async fn by_task(&self, task_id: &str) -> (Vec<Decision>, Vec<Artifact>) {
        let inner = self.inner.lock().await;
        match inner.by_task.get(task_id) {
            Some(index) => (
                index
                    .decisions
                    .iter()
                    .map(|&i| inner.decisions[i].clone())
                    .collect(),
                index
                    .artifacts
                    .iter()
                    .map(|&i| inner.artifacts[i].clone())
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Decisions logged by an agent, in append order.
    pub async fn decisions_by_agent(&self, agent_id: &str) -> Vec<Decision> {
        let inner = self.inner.lock().await;
        inner
            .decisions_by_agent
            .get(agent_id)
            .map(|indices| indices.iter().map(|&i| inner.decisions[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Newest entries across both logs, merged by logical clock.
    pub async fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<JournalEntry> = inner
            .decisions
            .iter()
            .cloned()
            .map(JournalEntry::Decision)
            .chain(inner.artifacts.iter().cloned().map(JournalEntry::Artifact))
            .collect();
        entries.sort_by(|a, b| b.seq().cmp(&a.seq()));
        entries.truncate(limit);
        entries
    }
}

fn index_decision(inner: &mut Inner, decision: Decision) {
    let index = inner.decisions.len();
    inner
        .by_task
        .entry(decision.task_id.clone())
        .or_default()
        .decisions
        .push(index);
    inner
        .decisions_by_agent
        .entry(decision.agent_id.clone())
        .or_default()
        .push(index);
    inner.decisions.push(decision);
}

fn index_artifact(inner: &mut Inner, artifact: Artifact) {
    let index = inner.artifacts.len();
    inner
        .by_task
        .entry(artifact.task_id.clone())
        .or_default()
        .artifacts
        .push(index);
    inner.artifacts.push(artifact);
}

async fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

fn to_line<T: Serialize>(record: &T) -> Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

async fn write_line(file: &mut File, line: &str) -> Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.sync_data().await?;
    Ok(())
}

async fn read_log<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut records = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            // Same torn-tail rule as the ledger: the final line may have been
            // cut short by a crash before the write was acknowledged.
            Err(e) if index == lines.len() - 1 => {
                warn!("discarding torn trailing journal record in {:?}: {e}", path);
            }
            Err(e) => {
                return Err(MarcusError::Ledger {
                    message: format!(
                        "corrupt journal record in {:?} at line {}: {e}",
                        path,
                        index + 1
                    ),
                })
            }
        }
    }
    Ok(records)
}
