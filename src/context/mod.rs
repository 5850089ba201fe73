//! Context assembly: the upstream knowledge handed to an agent with a task.
//!
//! The bundle is bounded in size. When the raw content exceeds the ceiling,
//! lower-priority items are summarized first, then dropped. Direct
//! predecessor artifacts are never silently omitted: if they must go, the
//! omission is flagged on the response.

use crate::{
    config::ContextConfig,
    constants::SUMMARY_PREVIEW_LENGTH,
    inference::DepGraph,
    journal::Journal,
    models::{AgentProfile, Artifact, Decision, Snapshot, Task, TaskStatus},
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: String,
    /// Artifacts and latest-per-topic decisions of each `done` direct
    /// predecessor.
    pub predecessors: Vec<PredecessorContext>,
    /// Summary-level decisions from finished siblings in the same component.
    pub pattern_hints: Vec<PatternHint>,
    /// The requesting agent's own recent history, so it follows its own
    /// established patterns.
    pub agent_memory: Option<AgentMemory>,
    /// Advisor-generated integration hints; advisory text, never ground
    /// truth.
    pub advisory: Option<String>,
    /// Explicit record of direct-predecessor content dropped for size.
    pub omitted: Vec<String>,
    pub byte_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredecessorContext {
    pub task_id: String,
    pub task_name: String,
    pub artifacts: Vec<Artifact>,
    /// Most recent decision per distinct `affects` topic.
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternHint {
    pub task_id: String,
    pub task_name: String,
    pub summaries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemory {
    pub recent_completions: Vec<String>,
    pub own_decisions: Vec<Decision>,
}

pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub async fn assemble(
        &self,
        task: &Task,
        snapshot: &Snapshot,
        graph: &DepGraph,
        journal: &Journal,
        agent: Option<&AgentProfile>,
        advisory: Option<String>,
    ) -> Result<TaskContext> {
        let mut predecessors = Vec::new();
        for pred_id in graph.predecessors(&task.id) {
            let Some(pred) = snapshot.task(pred_id) else {
                continue;
            };
            if pred.status != TaskStatus::Done {
                continue;
            }
            let (decisions, artifacts) = journal.by_task(pred_id).await;
            predecessors.push(PredecessorContext {
                task_id: pred.id.clone(),
                task_name: pred.name.clone(),
                artifacts,
                decisions: latest_per_topic(decisions),
            });
        }

        let mut pattern_hints = Vec::new();
        if self.config.include_pattern_hints {
            for sibling in &snapshot.tasks {
                if sibling.id == task.id
                    || sibling.status != TaskStatus::Done
                    || !sibling.shares_component_with(task)
                    || predecessors.iter().any(|p| p.task_id == sibling.id)
                {
                    continue;
                }
                let (decisions, _) = journal.by_task(&sibling.id).await;
                if decisions.is_empty() {
                    continue;
                }
                pattern_hints.push(PatternHint {
                    task_id: sibling.id.clone(),
                    task_name: sibling.name.clone(),
                    summaries: decisions
                        .iter()
                        .map(|d| format!("{} (affects {})", d.what, d.affects))
                        .collect(),
                });
            }
        }

        let agent_memory = match agent {
            Some(agent) => Some(AgentMemory {
                recent_completions: agent.recent_completions.clone(),
                own_decisions: journal.decisions_by_agent(&agent.id).await,
            }),
            None => None,
        };

        let mut context = TaskContext {
            task_id: task.id.clone(),
            predecessors,
            pattern_hints,
            agent_memory,
            advisory,
            omitted: Vec::new(),
            byte_size: 0,
        };
        self.bound_size(&mut context)?;
        Ok(context)
    }

    /// Shrinks the bundle to the configured ceiling: summarize pattern
    /// hints, drop pattern hints, summarize predecessor artifacts, drop
    /// predecessor artifacts, in that order, stopping as soon as it fits.
    fn bound_size(&self, context: &mut TaskContext) -> Result<()> {
        let max = self.config.max_bytes;

        if self.measure(context)? <= max {
            return Ok(());
        }

        for hint in &mut context.pattern_hints {
            for summary in &mut hint.summaries {
                truncate_in_place(summary, SUMMARY_PREVIEW_LENGTH);
            }
        }
        if self.measure(context)? <= max {
            return Ok(());
        }

        context.pattern_hints.clear();
        if self.measure(context)? <= max {
            return Ok(());
        }

        for pred in &mut context.predecessors {
            for artifact in &mut pred.artifacts {
                if let Some(body) = &mut artifact.body {
                    truncate_in_place(body, SUMMARY_PREVIEW_LENGTH);
                }
            }
        }
        if self.measure(context)? <= max {
            return Ok(());
        }

        // Last resort: drop predecessor artifacts oldest-first, flagging
        // every omission by id.
        let mut all: Vec<(usize, u64)> = Vec::new();
        for (index, pred) in context.predecessors.iter().enumerate() {
            for artifact in &pred.artifacts {
                all.push((index, artifact.seq));
            }
        }
        all.sort_by_key(|&(_, seq)| seq);
        for (pred_index, seq) in all {
            let pred = &mut context.predecessors[pred_index];
            if let Some(pos) = pred.artifacts.iter().position(|a| a.seq == seq) {
                let dropped = pred.artifacts.remove(pos);
                context.omitted.push(format!(
                    "artifact {} of predecessor {} omitted for size",
                    dropped.id, pred.task_id
                ));
            }
            if self.measure(context)? <= max {
                return Ok(());
            }
        }

        Ok(())
    }

    fn measure(&self, context: &mut TaskContext) -> Result<usize> {
        context.byte_size = serde_json::to_vec(context)?.len();
        Ok(context.byte_size)
    }
}

/// Keeps only the most recent decision per distinct `affects` topic.
fn latest_per_topic(decisions: Vec<Decision>) -> Vec<Decision> {
    let mut latest: HashMap<String, Decision> = HashMap::new();
    for decision in decisions {
        match latest.get(&decision.affects) {
            Some(existing) if existing.seq >= decision.seq => {}
            _ => {
                latest.insert(decision.affects.clone(), decision);
            }
        }
    }
    let mut result: Vec<Decision> = latest.into_values().collect();
    result.sort_by_key(|d| d.seq);
    result
}

fn truncate_in_place(text: &mut String, max_chars: usize) {
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        *text = format!("{truncated}…");
    }
}
