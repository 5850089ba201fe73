//! The coordinator: single writer per project.
//!
//! Every mutating operation serializes through the project mutex; the only
//! awaits under the lock are board-adapter calls and ledger fsyncs, both
//! bounded by the per-operation deadline. Advisor consultation is network
//! I/O too, so it happens strictly outside the lock (before it, or after
//! the lease has been committed and the lock released) and degrades to
//! silence on timeout. Read-only operations run against the most recent
//! snapshot without the writer lock and never observe a partially-applied
//! lease acquisition.

mod decision;
mod types;

pub use decision::{parse as parse_decision, ParsedDecision};
pub use types::{
    AgentStatus, BlockerOutcome, ProjectStatus, ReconcileReport, ReportAck, RequestOutcome,
    TaskBrief,
};

use crate::{
    advisor::{Advisor, PairQuery},
    board::BoardAdapter,
    config::Config,
    constants::{AGENT_MEMORY_LIMIT, RECENT_JOURNAL_LIMIT, SNAPSHOTS_DIR},
    context::ContextAssembler,
    inference::{DepGraph, InferenceEngine, SuggestedEdge},
    journal::Journal,
    ledger::AssignmentLedger,
    models::{
        AgentProfile, ArtifactKind, Lease, LeaseOutcome, Snapshot, Task, TaskStatus,
    },
    scheduler::{eligible_tasks, Ranker},
    MarcusError, Result,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

struct ProjectState {
    agents_by_id: HashMap<String, AgentProfile>,
    agent_id_by_key: HashMap<(String, String), String>,
    /// Last reported percent per task, for out-of-order detection.
    progress: HashMap<String, u8>,
}

pub struct Coordinator {
    config: Config,
    board: Arc<dyn BoardAdapter>,
    ledger: Arc<AssignmentLedger>,
    journal: Arc<Journal>,
    advisor: Arc<dyn Advisor>,
    inference: InferenceEngine,
    ranker: Ranker,
    assembler: ContextAssembler,
    /// The per-project writer lock. Held for the duration of each mutating
    /// operation.
    state: Mutex<ProjectState>,
    snapshot_version: AtomicU64,
    latest_snapshot: RwLock<Option<Arc<Snapshot>>>,
    graph_cache: Mutex<Option<(u64, Arc<DepGraph>)>>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        board: Arc<dyn BoardAdapter>,
        ledger: Arc<AssignmentLedger>,
        journal: Arc<Journal>,
        advisor: Arc<dyn Advisor>,
    ) -> Self {
        let inference = InferenceEngine::new(config.inference.clone());
        let ranker = Ranker::new(config.ranker.clone());
        let assembler = ContextAssembler::new(config.context.clone());
        Self {
            config,
            board,
            ledger,
            journal,
            advisor,
            inference,
            ranker,
            assembler,
            state: Mutex::new(ProjectState {
                agents_by_id: HashMap::new(),
                agent_id_by_key: HashMap::new(),
                progress: HashMap::new(),
            }),
            snapshot_version: AtomicU64::new(0),
            latest_snapshot: RwLock::new(None),
            graph_cache: Mutex::new(None),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    /// Registers an agent, or returns the existing registration for the same
    /// `(name, role)` pair. The capability set is replaced on re-register.
    pub async fn register_agent(
        &self,
        name: &str,
        role: &str,
        skills: BTreeSet<String>,
    ) -> Result<AgentProfile> {
        if name.trim().is_empty() || role.trim().is_empty() {
            return Err(MarcusError::MalformedInput(
                "agent name and role must be non-empty".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let key = (name.to_string(), role.to_string());
        if let Some(existing_id) = state.agent_id_by_key.get(&key) {
            let existing_id = existing_id.clone();
            let agent = state
                .agents_by_id
                .get_mut(&existing_id)
                .expect("agent index out of sync");
            agent.capabilities = skills;
            debug!("re-registered agent {} ({name}/{role})", agent.id);
            return Ok(agent.clone());
        }

        let agent = AgentProfile::new(name.to_string(), role.to_string(), skills);
        info!("registered agent {} ({name}/{role})", agent.id);
        state.agent_id_by_key.insert(key, agent.id.clone());
        state
            .agents_by_id
            .insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    /// The dominant operation: find, lease, and hand out the next task for
    /// `agent_id`, bundled with the context it needs to integrate.
    pub async fn request_next_task(&self, agent_id: &str) -> Result<RequestOutcome> {
        // Advisor edge advice is gathered before the writer lock; it is
        // advisory input to graph construction and tolerates a slightly
        // stale snapshot.
        let advice = self.gather_advice().await;

        let mut state = self.state.lock().await;
        let agent = lookup_agent(&state, agent_id)?.clone();

        let snapshot = self.refresh_snapshot().await?;
        let graph = self.graph_for(&snapshot, &advice).await?;

        // Holding a live lease already answers the question.
        if let Some(lease) = self.ledger.lease_for_agent(agent_id).await {
            let task = snapshot.task(&lease.task_id).cloned().ok_or_else(|| {
                MarcusError::NotFound(format!(
                    "leased task {} missing from board",
                    lease.task_id
                ))
            })?;
            // Context assembly is read-only; no need to keep other
            // requests waiting for it.
            drop(state);
            let context = self
                .assembler
                .assemble(&task, &snapshot, &graph, &self.journal, Some(&agent), None)
                .await?;
            return Ok(RequestOutcome::AlreadyAssigned { task, context });
        }

        let leased: HashSet<String> = self
            .ledger
            .list_active()
            .await
            .into_iter()
            .map(|l| l.task_id)
            .collect();

        let mut excluded: HashSet<String> = HashSet::new();
        for _attempt in 0..=self.config.lease.retry_k {
            let eligible: Vec<&Task> = eligible_tasks(&snapshot, &graph, &leased)
                .into_iter()
                .filter(|t| !excluded.contains(&t.id))
                .collect();

            let Some(task) =
                self.ranker
                    .rank(&agent, &eligible, &snapshot, &graph, Utc::now())
            else {
                return Ok(RequestOutcome::NoWork);
            };
            let task = task.clone();

            let lease = match self
                .ledger
                .acquire(agent_id, &task.id, self.config.lease_ttl())
                .await
            {
                Ok(lease) => lease,
                Err(MarcusError::Conflict { message }) => {
                    // Lost a race for this task; rank again without it.
                    debug!("lease conflict on {}: {message}", task.id);
                    excluded.insert(task.id.clone());
                    continue;
                }
                Err(other) => return Err(other),
            };

            match self.mark_assigned(&task.id, agent_id).await {
                Ok(()) => {}
                Err(e) => {
                    // The lease must not outlive a failed board update.
                    if let Err(release_err) = self
                        .ledger
                        .release(agent_id, &task.id, LeaseOutcome::Abandoned)
                        .await
                    {
                        warn!(
                            "failed to roll back lease on {} after board error: {release_err}",
                            task.id
                        );
                    }
                    return Err(e);
                }
            }

            state.progress.remove(&task.id);
            info!(
                "assigned task {} to agent {} (lease expires {})",
                task.id, agent_id, lease.expires_at
            );
            // The lease and board update are committed; everything left is
            // read-only or advisory, so release the writer lock before the
            // advisor call and context assembly.
            drop(state);

            let advisory = match self
                .with_deadline(
                    "advisor integration hints",
                    self.advisor
                        .integration_hints(&task, &context_digest(&task, &graph)),
                )
                .await
            {
                Ok(hint) => hint,
                Err(e) => {
                    warn!("advisor integration hints unavailable: {e}");
                    None
                }
            };
            let context = self
                .assembler
                .assemble(&task, &snapshot, &graph, &self.journal, Some(&agent), advisory)
                .await?;

            let mut task = task;
            task.status = TaskStatus::InProgress;
            task.assignee = Some(agent_id.to_string());
            return Ok(RequestOutcome::Assigned { task, context });
        }

        // Every ranked candidate was stolen K+1 times in a row.
        Ok(RequestOutcome::NoWork)
    }

    /// Heartbeats the lease and appends a progress comment. 100 percent is
    /// completion.
    pub async fn report_progress(
        &self,
        agent_id: &str,
        task_id: &str,
        percent: u8,
        message: &str,
    ) -> Result<ReportAck> {
        if percent > 100 {
            return Err(MarcusError::MalformedInput(
                "percent must be between 0 and 100".to_string(),
            ));
        }
        if percent == 100 {
            return self.report_completion(agent_id, task_id, message).await;
        }

        let mut state = self.state.lock().await;
        lookup_agent(&state, agent_id)?;
        self.owned_lease(agent_id, task_id).await?;

        self.ledger
            .heartbeat(agent_id, task_id, self.config.lease_ttl())
            .await?;

        if let Some(&last) = state.progress.get(task_id) {
            if percent < last {
                warn!(
                    "out-of-order progress on {task_id}: {percent}% after {last}% (accepted)"
                );
            }
        }
        state.progress.insert(task_id.to_string(), percent);

        // A blocked task resumes on its agent's next progress report.
        let snapshot = self.refresh_snapshot().await?;
        if let Some(task) = snapshot.task(task_id) {
            if task.status == TaskStatus::Blocked {
                self.with_deadline(
                    "unblock status update",
                    self.board
                        .update_task_status(task_id, TaskStatus::InProgress),
                )
                .await?;
            }
        }

        self.with_deadline(
            "progress comment",
            self.board
                .add_comment(task_id, &format!("[progress {percent}%] {message}")),
        )
        .await?;

        Ok(ReportAck::Progress {
            task_id: task_id.to_string(),
            percent,
        })
    }

    /// Marks the task blocked. The agent keeps the lease; the blocker
    /// comment carries an advisor suggestion when one is available.
    pub async fn report_blocker(
        &self,
        agent_id: &str,
        task_id: &str,
        description: &str,
    ) -> Result<BlockerOutcome> {
        {
            let state = self.state.lock().await;
            lookup_agent(&state, agent_id)?;
        }
        self.owned_lease(agent_id, task_id).await?;

        // Advisor consultation runs before the writer section; a slightly
        // stale view of the task is fine for an advisory suggestion.
        let suggestion = {
            let snapshot = self.current_snapshot().await?;
            match snapshot.task(task_id) {
                Some(task) => match self
                    .with_deadline(
                        "advisor blocker suggestion",
                        self.advisor.blocker_suggestion(task, description),
                    )
                    .await
                {
                    Ok(hint) => hint,
                    Err(e) => {
                        warn!("advisor blocker suggestion unavailable: {e}");
                        None
                    }
                },
                None => None,
            }
        };

        let _guard = self.state.lock().await;
        // The heartbeat revalidates lease ownership under the writer lock.
        self.ledger
            .heartbeat(agent_id, task_id, self.config.lease_ttl())
            .await?;

        let snapshot = self.refresh_snapshot().await?;
        if !snapshot.contains(task_id) {
            return Err(MarcusError::NotFound(format!("task {task_id}")));
        }

        self.with_deadline(
            "blocker status update",
            self.board.update_task_status(task_id, TaskStatus::Blocked),
        )
        .await?;

        let mut comment = format!("[blocker] {description}");
        if let Some(hint) = &suggestion {
            comment.push_str(&format!("\n[advisor suggestion] {hint}"));
        }
        self.with_deadline("blocker comment", self.board.add_comment(task_id, &comment))
            .await?;

        warn!("task {task_id} blocked by agent {agent_id}: {description}");
        Ok(BlockerOutcome {
            task_id: task_id.to_string(),
            suggestion,
        })
    }

    /// Completes the task: board status, lease release, and a summary
    /// artifact for downstream context. A completion report for a task that
    /// is already done is acknowledged without any state change.
    pub async fn report_completion(
        &self,
        agent_id: &str,
        task_id: &str,
        summary: &str,
    ) -> Result<ReportAck> {
        let mut state = self.state.lock().await;
        lookup_agent(&state, agent_id)?;

        let snapshot = self.refresh_snapshot().await?;
        let task = snapshot
            .task(task_id)
            .ok_or_else(|| MarcusError::NotFound(format!("task {task_id}")))?;

        if task.status == TaskStatus::Done && self.ledger.lease_for_task(task_id).await.is_none()
        {
            debug!("completion report for already-done task {task_id}, acknowledging");
            return Ok(ReportAck::Completed {
                task_id: task_id.to_string(),
            });
        }

        self.owned_lease(agent_id, task_id).await?;

        self.with_deadline(
            "completion status update",
            self.board.update_task_status(task_id, TaskStatus::Done),
        )
        .await?;

        self.ledger
            .release(agent_id, task_id, LeaseOutcome::Completed)
            .await?;

        if !summary.trim().is_empty() {
            self.journal
                .record_artifact(
                    task_id,
                    ArtifactKind::Doc,
                    None,
                    None,
                    summary.trim().to_string(),
                )
                .await?;
        }

        if let Some(agent) = state.agents_by_id.get_mut(agent_id) {
            agent.record_completion(task_id.to_string(), AGENT_MEMORY_LIMIT);
        }
        state.progress.remove(task_id);

        info!("task {task_id} completed by agent {agent_id}");
        Ok(ReportAck::Completed {
            task_id: task_id.to_string(),
        })
    }

    /// Parses and records an architectural decision against a task.
    pub async fn log_decision(
        &self,
        agent_id: &str,
        task_id: &str,
        text: &str,
    ) -> Result<crate::models::Decision> {
        let state = self.state.lock().await;
        lookup_agent(&state, agent_id)?;

        let parsed = decision::parse(text)?;

        let snapshot = self.current_snapshot().await?;
        if !snapshot.contains(task_id) {
            return Err(MarcusError::NotFound(format!("task {task_id}")));
        }

        self.journal
            .record_decision(task_id, agent_id, parsed.what, parsed.why, parsed.affects)
            .await
    }

    /// Read-only context assembly for any task; no lease required.
    pub async fn get_task_context(&self, task_id: &str) -> Result<crate::context::TaskContext> {
        let advice = self.gather_advice().await;
        let snapshot = self.current_snapshot().await?;
        let task = snapshot
            .task(task_id)
            .ok_or_else(|| MarcusError::NotFound(format!("task {task_id}")))?;
        let graph = self.graph_for(&snapshot, &advice).await?;
        self.assembler
            .assemble(task, &snapshot, &graph, &self.journal, None, None)
            .await
    }

    pub async fn get_project_status(&self) -> Result<ProjectStatus> {
        let advice = self.gather_advice().await;
        let snapshot = self.current_snapshot().await?;
        let graph = self.graph_for(&snapshot, &advice).await?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for task in &snapshot.tasks {
            *counts.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        }

        let blocked = snapshot
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked || t.is_externally_blocked())
            .map(TaskBrief::from)
            .collect();

        Ok(ProjectStatus {
            project_id: self.config.project_id.clone(),
            snapshot_version: snapshot.version,
            counts,
            blocked,
            active_leases: self.ledger.list_active().await,
            recent: self.journal.recent(RECENT_JOURNAL_LIMIT).await,
            graph_warnings: graph.warnings.clone(),
        })
    }

    pub async fn get_agent_status(&self, agent_id: &str) -> Result<AgentStatus> {
        let state = self.state.lock().await;
        let agent = lookup_agent(&state, agent_id)?.clone();
        drop(state);

        Ok(AgentStatus {
            lease: self.ledger.lease_for_agent(agent_id).await,
            recent_completions: agent.recent_completions.clone(),
            agent,
        })
    }

    /// One reconciliation pass: replayed state against a fresh snapshot.
    /// Runs at startup before requests are served, then on a timer.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let state = self.state.lock().await;
        let snapshot = self.refresh_snapshot().await?;
        let mut report = ReconcileReport::default();
        let now = Utc::now();
        let ttl = self.config.lease_ttl();

        for lease in self.ledger.list_active().await {
            let Some(task) = snapshot.task(&lease.task_id) else {
                // The board no longer knows this task; nothing to hand back.
                self.ledger
                    .release(&lease.agent_id, &lease.task_id, LeaseOutcome::Expired)
                    .await?;
                warn!("lease on vanished task {} expired", lease.task_id);
                report.expired.push(lease.task_id.clone());
                continue;
            };

            match task.status {
                TaskStatus::Done => {
                    self.ledger
                        .release(&lease.agent_id, &lease.task_id, LeaseOutcome::Completed)
                        .await?;
                    report.closed.push(lease.task_id.clone());
                }
                TaskStatus::Cancelled => {
                    self.ledger
                        .release(&lease.agent_id, &lease.task_id, LeaseOutcome::Abandoned)
                        .await?;
                    report.closed.push(lease.task_id.clone());
                }
                _ if lease.is_stale(now, ttl) => {
                    self.ledger
                        .release(&lease.agent_id, &lease.task_id, LeaseOutcome::Expired)
                        .await?;
                    // Best effort: hand the task back to the pool.
                    if let Err(e) = self
                        .board
                        .update_task_status(&lease.task_id, TaskStatus::Todo)
                        .await
                    {
                        warn!("failed to revert {} to todo: {e}", lease.task_id);
                    }
                    if let Err(e) = self.board.assign_task(&lease.task_id, None).await {
                        warn!("failed to clear assignee on {}: {e}", lease.task_id);
                    }
                    warn!(
                        "stale lease on {} (agent {}) expired and task reverted",
                        lease.task_id, lease.agent_id
                    );
                    report.expired.push(lease.task_id.clone());
                }
                _ => {
                    // Fresh lease; if a crash lost the board update, finish
                    // the assignment now.
                    if task.status != TaskStatus::InProgress
                        || task.assignee.as_deref() != Some(lease.agent_id.as_str())
                    {
                        self.mark_assigned(&lease.task_id, &lease.agent_id).await?;
                        info!(
                            "resynchronized board for leased task {} (agent {})",
                            lease.task_id, lease.agent_id
                        );
                        report.resynced.push(lease.task_id.clone());
                    }
                }
            }
        }

        // Orphans: in_progress on the board with no live lease.
        for task in &snapshot.tasks {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            if self.ledger.lease_for_task(&task.id).await.is_some() {
                continue;
            }
            let known_free_agent = match &task.assignee {
                Some(assignee) => {
                    state.agents_by_id.contains_key(assignee)
                        && self.ledger.lease_for_agent(assignee).await.is_none()
                }
                None => false,
            };
            if known_free_agent {
                let assignee = task.assignee.clone().expect("checked above");
                self.ledger
                    .acquire(&assignee, &task.id, ttl)
                    .await?;
                info!("recovered lease for orphaned task {} under {assignee}", task.id);
                report.recovered.push(task.id.clone());
            } else if self.config.reconciler.revert_orphans {
                warn!("orphaned in_progress task {} reverted to todo", task.id);
                if let Err(e) = self.board.update_task_status(&task.id, TaskStatus::Todo).await
                {
                    warn!("failed to revert orphan {}: {e}", task.id);
                }
                if let Err(e) = self.board.assign_task(&task.id, None).await {
                    warn!("failed to clear assignee on orphan {}: {e}", task.id);
                }
                report.reverted.push(task.id.clone());
            } else {
                warn!(
                    "orphaned in_progress task {} left untouched (revert_orphans off)",
                    task.id
                );
            }
        }

        drop(state);
        self.write_snapshot_cache(&snapshot).await;

        if !report.is_noop() {
            info!(
                "reconcile: {} expired, {} closed, {} resynced, {} recovered, {} reverted",
                report.expired.len(),
                report.closed.len(),
                report.resynced.len(),
                report.recovered.len(),
                report.reverted.len()
            );
        }
        Ok(report)
    }

    /// Sets board status and assignee for a fresh assignment, under the
    /// operation deadline.
    async fn mark_assigned(&self, task_id: &str, agent_id: &str) -> Result<()> {
        self.with_deadline(
            "assignment status update",
            self.board
                .update_task_status(task_id, TaskStatus::InProgress),
        )
        .await?;
        self.with_deadline(
            "assignment assignee update",
            self.board.assign_task(task_id, Some(agent_id)),
        )
        .await
    }

    async fn owned_lease(&self, agent_id: &str, task_id: &str) -> Result<Lease> {
        match self.ledger.lease_for_task(task_id).await {
            Some(lease) if lease.agent_id == agent_id => Ok(lease),
            _ => Err(MarcusError::LeaseExpired {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Fetches a fresh snapshot from the board and publishes it as the
    /// latest.
    async fn refresh_snapshot(&self) -> Result<Arc<Snapshot>> {
        let tasks = self
            .with_deadline("board snapshot", self.board.list_tasks())
            .await?;
        let snapshot = Arc::new(Snapshot {
            version: self.snapshot_version.fetch_add(1, Ordering::SeqCst) + 1,
            fetched_at: Utc::now(),
            tasks,
        });
        *self.latest_snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// The most recent snapshot, fetching one if none has been taken yet.
    async fn current_snapshot(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.latest_snapshot.read().await.clone() {
            return Ok(snapshot);
        }
        self.refresh_snapshot().await
    }

    /// Dependency graph for a snapshot plus a fixed advice set, cached by
    /// snapshot version. Pure computation; never performs I/O, so it is
    /// safe to call under the writer lock. The cache ages out so
    /// long-lived snapshots pick up fresh advisor input on the next build.
    async fn graph_for(
        &self,
        snapshot: &Snapshot,
        advice: &[SuggestedEdge],
    ) -> Result<Arc<DepGraph>> {
        let mut cache = self.graph_cache.lock().await;
        if let Some((version, graph)) = cache.as_ref() {
            let fresh = (Utc::now() - snapshot.fetched_at).num_seconds()
                < self.config.inference.cache_ttl_secs as i64;
            if *version == snapshot.version && fresh {
                return Ok(graph.clone());
            }
        }

        let graph = Arc::new(self.inference.build(snapshot, advice)?);
        *cache = Some((snapshot.version, graph.clone()));
        Ok(graph)
    }

    /// Advisor edge suggestions for the current snapshot. Network I/O:
    /// callers must not hold the writer lock. Bounded by the operation
    /// deadline and empty whenever AI inference is disabled or the advisor
    /// is unavailable.
    async fn gather_advice(&self) -> Vec<SuggestedEdge> {
        if !self.config.inference.enable_ai {
            return Vec::new();
        }
        let snapshot = match self.current_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("snapshot unavailable for advisor advice: {e}");
                return Vec::new();
            }
        };
        let pairs: Vec<PairQuery> = self
            .inference
            .candidate_pairs(&snapshot)
            .into_iter()
            .filter_map(|(first, second)| {
                let a = snapshot.task(&first)?;
                let b = snapshot.task(&second)?;
                Some(PairQuery {
                    first_id: a.id.clone(),
                    first_name: a.name.clone(),
                    second_id: b.id.clone(),
                    second_name: b.name.clone(),
                })
            })
            .collect();
        if pairs.is_empty() {
            return Vec::new();
        }
        match self
            .with_deadline("advisor edge advice", self.advisor.suggest_edges(&pairs))
            .await
        {
            Ok(edges) => edges,
            Err(e) => {
                warn!("advisor edge suggestions failed, building without them: {e}");
                Vec::new()
            }
        }
    }

    /// Warm-start cache; authoritative state is always rebuilt from the
    /// logs plus a fresh fetch, so failures here only cost startup latency.
    async fn write_snapshot_cache(&self, snapshot: &Snapshot) {
        let dir = self.config.data_dir.join(SNAPSHOTS_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            debug!("snapshot cache directory unavailable: {e}");
            return;
        }
        let path = dir.join(format!("{}.json", self.config.project_id));
        match serde_json::to_vec_pretty(snapshot) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    debug!("snapshot cache write failed: {e}");
                }
            }
            Err(e) => debug!("snapshot cache serialization failed: {e}"),
        }
    }

    async fn with_deadline<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.op_deadline(), fut).await {
            Ok(result) => result,
            Err(_) => Err(MarcusError::Timeout {
                message: format!(
                    "{what} exceeded the {}s operation deadline",
                    self.config.op_deadline_secs
                ),
            }),
        }
    }
}

fn lookup_agent<'a>(state: &'a ProjectState, agent_id: &str) -> Result<&'a AgentProfile> {
    state
        .agents_by_id
        .get(agent_id)
        .ok_or_else(|| MarcusError::NotFound(format!("agent {agent_id}")))
}

/// A terse digest of what the context will contain, sent to the advisor in
/// place of the full bundle.
fn context_digest(task: &Task, graph: &DepGraph) -> String {
    let predecessors: Vec<&str> = graph.predecessors(&task.id).collect();
    format!(
        "task {} depends on [{}]; labels [{}]",
        task.id,
        predecessors.join(", "),
        task.labels.iter().cloned().collect::<Vec<_>>().join(", ")
    )
}
