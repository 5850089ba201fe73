//! Assignment ledger: the durable record of who holds what.
//!
//! Every acquire and release is appended to an on-disk log and fsynced before
//! the call returns; the in-memory index is rebuilt from that log on open.
//! On restart the ledger, not the board, is the source of truth for
//! outstanding leases.

use crate::{
    models::{Lease, LeaseOutcome},
    MarcusError, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum LedgerOp {
    Acquire,
    Heartbeat,
    Release,
}

/// One line of `ledger.log`.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerRecord {
    op: LedgerOp,
    agent_id: String,
    task_id: String,
    ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<LeaseOutcome>,
}

struct Inner {
    file: File,
    by_task: HashMap<String, Lease>,
    by_agent: HashMap<String, String>,
}

pub struct AssignmentLedger {
    path: PathBuf,
    // One async mutex over index + file handle: appends and index commits
    // happen atomically with respect to each other.
    inner: tokio::sync::Mutex<Inner>,
}

impl AssignmentLedger {
    /// Opens the ledger at `path`, replaying any existing records.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (by_task, by_agent) = replay(&path).await?;
        if !by_task.is_empty() {
            debug!("ledger replay recovered {} active lease(s)", by_task.len());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(Inner {
                file,
                by_task,
                by_agent,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires a lease for `agent_id` on `task_id`. Fails with `Conflict`
    /// if either side already holds a live lease. Returns only after the
    /// record is on disk.
    pub async fn acquire(&self, agent_id: &str, task_id: &str, ttl: Duration) -> Result<Lease> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.by_task.get(task_id) {
            return Err(MarcusError::Conflict {
                message: format!(
                    "task {task_id} is already leased by {}",
                    existing.agent_id
                ),
            });
        }
        if let Some(held) = inner.by_agent.get(agent_id) {
            return Err(MarcusError::Conflict {
                message: format!("agent {agent_id} already holds a lease on {held}"),
            });
        }

        let lease = Lease::new(agent_id.to_string(), task_id.to_string(), ttl);
        let record = LedgerRecord {
            op: LedgerOp::Acquire,
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            ts: lease.acquired_at,
            expires_at: Some(lease.expires_at),
            outcome: None,
        };
        append(&mut inner.file, &record).await?;

        inner
            .by_task
            .insert(task_id.to_string(), lease.clone());
        inner
            .by_agent
            .insert(agent_id.to_string(), task_id.to_string());
        Ok(lease)
    }

    /// Refreshes the heartbeat on an existing lease.
    pub async fn heartbeat(&self, agent_id: &str, task_id: &str, ttl: Duration) -> Result<Lease> {
        let mut inner = self.inner.lock().await;

        let lease = match inner.by_task.get(task_id) {
            Some(lease) if lease.agent_id == agent_id => lease.clone(),
            Some(_) | None => {
                return Err(MarcusError::LeaseExpired {
                    task_id: task_id.to_string(),
                })
            }
        };

        let now = Utc::now();
        let record = LedgerRecord {
            op: LedgerOp::Heartbeat,
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            ts: now,
            expires_at: Some(now + ttl),
            outcome: None,
        };
        append(&mut inner.file, &record).await?;

        let updated = Lease {
            heartbeat_at: now,
            expires_at: now + ttl,
            ..lease
        };
        inner.by_task.insert(task_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Releases a lease with the given outcome. Returns only after the
    /// record is on disk.
    pub async fn release(
        &self,
        agent_id: &str,
        task_id: &str,
        outcome: LeaseOutcome,
    ) -> Result<Lease> {
        let mut inner = self.inner.lock().await;

        let lease = match inner.by_task.get(task_id) {
            Some(lease) if lease.agent_id == agent_id => lease.clone(),
            Some(_) | None => {
                return Err(MarcusError::LeaseExpired {
                    task_id: task_id.to_string(),
                })
            }
        };

        let record = LedgerRecord {
            op: LedgerOp::Release,
            agent_id: agent_id.to_string(),
            task_id: task_id.to_string(),
            ts: Utc::now(),
            expires_at: None,
            outcome: Some(outcome),
        };
        append(&mut inner.file, &record).await?;

        inner.by_task.remove(task_id);
        inner.by_agent.remove(agent_id);
        Ok(lease)
    }

    pub async fn list_active(&self) -> Vec<Lease> {
        let inner = self.inner.lock().await;
        inner.by_task.values().cloned().collect()
    }

    pub async fn lease_for_task(&self, task_id: &str) -> Option<Lease> {
        let inner = self.inner.lock().await;
        inner.by_task.get(task_id).cloned()
    }

    pub async fn lease_for_agent(&self, agent_id: &str) -> Option<Lease> {
        let inner = self.inner.lock().await;
        let task_id = inner.by_agent.get(agent_id)?;
        inner.by_task.get(task_id).cloned()
    }
}

async fn append(file: &mut File, record: &LedgerRecord) -> Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .await
        .map_err(io_to_ledger)?;
    // Durability contract: the caller is only acknowledged once the record
    // has reached disk.
    file.sync_data().await.map_err(io_to_ledger)?;
    Ok(())
}

fn io_to_ledger(e: std::io::Error) -> MarcusError {
    MarcusError::Ledger {
        message: format!("ledger append failed: {e}"),
    }
}

type Indexes = (HashMap<String, Lease>, HashMap<String, String>);

async fn replay(path: &Path) -> Result<Indexes> {
    let mut by_task: HashMap<String, Lease> = HashMap::new();
    let mut by_agent: HashMap<String, String> = HashMap::new();

    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((by_task, by_agent)),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    for (index, line) in lines.iter().enumerate() {
        let record: LedgerRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            // A crash can tear the final line mid-write; that record was
            // never acknowledged, so dropping it is correct. A torn line
            // anywhere else means real corruption.
            Err(e) if index == lines.len() - 1 => {
                warn!("discarding torn trailing ledger record: {e}");
                continue;
            }
            Err(e) => {
                return Err(MarcusError::Ledger {
                    message: format!("corrupt ledger record at line {}: {e}", index + 1),
                })
            }
        };

        match record.op {
            LedgerOp::Acquire => {
                let lease = Lease {
                    agent_id: record.agent_id.clone(),
                    task_id: record.task_id.clone(),
                    acquired_at: record.ts,
                    expires_at: record.expires_at.unwrap_or(record.ts),
                    heartbeat_at: record.ts,
                };
                by_task.insert(record.task_id.clone(), lease);
                by_agent.insert(record.agent_id, record.task_id);
            }
            LedgerOp::Heartbeat => {
                if let Some(lease) = by_task.get_mut(&record.task_id) {
                    if lease.agent_id == record.agent_id {
                        lease.heartbeat_at = record.ts;
                        if let Some(expires) = record.expires_at {
                            lease.expires_at = expires;
                        }
                    }
                }
            }
            LedgerOp::Release => {
                by_task.remove(&record.task_id);
                by_agent.remove(&record.agent_id);
            }
        }
    }

    Ok((by_task, by_agent))
}
