//! Task scheduling: which tasks may be assigned now, and which one a given
//! agent should get.

use crate::{
    config::RankerWeights,
    inference::DepGraph,
    models::{AgentProfile, Snapshot, Task, TaskStatus},
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Age at which a waiting task's age term saturates.
const AGE_SATURATION_HOURS: f64 = 168.0;

/// Neutral skill-overlap value for tasks that declare no skills, so they
/// compete on the other terms instead of starving.
const NEUTRAL_SKILL_OVERLAP: f64 = 0.5;

/// A task `t` is eligible for assignment iff it is `todo`, unleased, not
/// waiting on external input, and every predecessor in the graph is `done`.
/// A predecessor that is merely `in_progress` does not satisfy the
/// dependency; that is what prevents premature downstream work.
pub fn eligible_tasks<'a>(
    snapshot: &'a Snapshot,
    graph: &DepGraph,
    leased: &HashSet<String>,
) -> Vec<&'a Task> {
    snapshot
        .tasks
        .iter()
        .filter(|task| {
            task.status == TaskStatus::Todo
                && !leased.contains(&task.id)
                && !task.is_externally_blocked()
                && predecessors_done(&task.id, snapshot, graph)
        })
        .collect()
}

fn predecessors_done(task_id: &str, snapshot: &Snapshot, graph: &DepGraph) -> bool {
    graph.predecessors(task_id).all(|pred| {
        snapshot
            .task(pred)
            .map(|p| p.status == TaskStatus::Done)
            // A predecessor missing from the snapshot cannot be verified
            // done; hold the successor back.
            .unwrap_or(false)
    })
}

/// Scored ranking of eligible tasks for one agent.
pub struct Ranker {
    weights: RankerWeights,
}

#[derive(Debug, Clone)]
pub struct ScoredTask<'a> {
    pub task: &'a Task,
    pub score: f64,
}

impl Ranker {
    pub fn new(weights: RankerWeights) -> Self {
        Self { weights }
    }

    /// Returns the single best task for `agent`, or `None` when nothing is
    /// eligible. Ties break by priority, then age, then task id, so the
    /// winner is deterministic for a fixed snapshot.
    pub fn rank<'a>(
        &self,
        agent: &AgentProfile,
        eligible: &[&'a Task],
        snapshot: &Snapshot,
        graph: &DepGraph,
        now: DateTime<Utc>,
    ) -> Option<&'a Task> {
        self.scored(agent, eligible, snapshot, graph, now)
            .into_iter()
            .next()
            .map(|scored| scored.task)
    }

    /// Full scored listing, best first. Used by the coordinator for
    /// assignment and by status queries for diagnostics.
    pub fn scored<'a>(
        &self,
        agent: &AgentProfile,
        eligible: &[&'a Task],
        snapshot: &Snapshot,
        graph: &DepGraph,
        now: DateTime<Utc>,
    ) -> Vec<ScoredTask<'a>> {
        let mut scored: Vec<ScoredTask<'a>> = eligible
            .iter()
            .map(|task| ScoredTask {
                task,
                score: self.score(agent, task, snapshot, graph, now),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.task.priority.cmp(&a.task.priority))
                .then_with(|| a.task.created_at.cmp(&b.task.created_at))
                .then_with(|| a.task.id.cmp(&b.task.id))
        });
        scored
    }

    fn score(
        &self,
        agent: &AgentProfile,
        task: &Task,
        snapshot: &Snapshot,
        graph: &DepGraph,
        now: DateTime<Utc>,
    ) -> f64 {
        let declared = task.declared_skills();
        let (overlap, mismatch) = if declared.is_empty() {
            (NEUTRAL_SKILL_OVERLAP, 0.0)
        } else {
            let covered = declared
                .iter()
                .filter(|skill| agent.capabilities.contains(**skill))
                .count() as f64;
            let fraction = covered / declared.len() as f64;
            (fraction, 1.0 - fraction)
        };

        let age_hours = (now - task.created_at).num_minutes() as f64 / 60.0;
        let age = (age_hours / AGE_SATURATION_HOURS).clamp(0.0, 1.0);

        let unblocked = successors_unblocked_if_done(task, snapshot, graph) as f64;

        self.weights.skill * overlap
            + self.weights.prio * task.priority.weight()
            + self.weights.age * age
            + self.weights.unblk * unblocked
            - self.weights.misf * mismatch
    }
}

/// How many successors would become eligible if `task` completed: `todo`
/// successors whose every other predecessor is already done. Biases the
/// scheduler toward the critical path.
fn successors_unblocked_if_done(task: &Task, snapshot: &Snapshot, graph: &DepGraph) -> usize {
    graph
        .successors(&task.id)
        .filter(|succ_id| {
            let Some(succ) = snapshot.task(succ_id) else {
                return false;
            };
            succ.status == TaskStatus::Todo
                && graph.predecessors(succ_id).all(|pred| {
                    pred == task.id
                        || snapshot
                            .task(pred)
                            .map(|p| p.status == TaskStatus::Done)
                            .unwrap_or(false)
                })
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;
    use crate::inference::InferenceEngine;
    use crate::models::{task_fixture, Priority};
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn weights() -> RankerWeights {
        RankerWeights {
            skill: 3.0,
            prio: 2.0,
            age: 1.0,
            unblk: 1.5,
            misf: 2.0,
        }
    }

    fn agent(skills: &[&str]) -> AgentProfile {
        AgentProfile::new(
            "kai".to_string(),
            "backend".to_string(),
            skills.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn build_graph(snapshot: &Snapshot) -> DepGraph {
        InferenceEngine::new(InferenceConfig {
            pattern_confidence: 0.8,
            ai_confidence: 0.7,
            max_ai_pairs_per_batch: 20,
            cache_ttl_secs: 300,
            enable_ai: false,
        })
        .build(snapshot, &[])
        .unwrap()
    }

    fn snapshot(tasks: Vec<Task>) -> Snapshot {
        Snapshot {
            version: 1,
            fetched_at: Utc::now(),
            tasks,
        }
    }

    #[test]
    fn in_progress_predecessor_blocks_successor() {
        let mut a = task_fixture("a", TaskStatus::InProgress);
        a.assignee = Some("someone".to_string());
        let mut b = task_fixture("b", TaskStatus::Todo);
        b.dependencies.insert("a".to_string());

        let snap = snapshot(vec![a, b]);
        let graph = build_graph(&snap);
        let eligible = eligible_tasks(&snap, &graph, &HashSet::new());
        assert!(eligible.is_empty());
    }

    #[test]
    fn done_predecessor_unblocks_successor() {
        let a = task_fixture("a", TaskStatus::Done);
        let mut b = task_fixture("b", TaskStatus::Todo);
        b.dependencies.insert("a".to_string());

        let snap = snapshot(vec![a, b]);
        let graph = build_graph(&snap);
        let eligible = eligible_tasks(&snap, &graph, &HashSet::new());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "b");
    }

    #[test]
    fn leased_tasks_are_not_eligible() {
        let snap = snapshot(vec![task_fixture("a", TaskStatus::Todo)]);
        let graph = build_graph(&snap);
        let leased: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert!(eligible_tasks(&snap, &graph, &leased).is_empty());
    }

    #[test]
    fn externally_blocked_label_excludes_task() {
        let mut a = task_fixture("a", TaskStatus::Todo);
        a.labels.insert("blocked:external".to_string());
        let snap = snapshot(vec![a]);
        let graph = build_graph(&snap);
        assert!(eligible_tasks(&snap, &graph, &HashSet::new()).is_empty());
    }

    #[test]
    fn skill_overlap_beats_unrelated_task() {
        let mut matching = task_fixture("match", TaskStatus::Todo);
        matching.labels.insert("skill:python".to_string());
        let mut other = task_fixture("other", TaskStatus::Todo);
        other.labels.insert("skill:frontend".to_string());

        let snap = snapshot(vec![matching, other]);
        let graph = build_graph(&snap);
        let eligible = eligible_tasks(&snap, &graph, &HashSet::new());

        let winner = Ranker::new(weights())
            .rank(&agent(&["python"]), &eligible, &snap, &graph, Utc::now())
            .unwrap();
        assert_eq!(winner.id, "match");
    }

    #[test]
    fn skill_less_task_is_not_starved() {
        let plain = task_fixture("plain", TaskStatus::Todo);
        let snap = snapshot(vec![plain]);
        let graph = build_graph(&snap);
        let eligible = eligible_tasks(&snap, &graph, &HashSet::new());

        let winner = Ranker::new(weights()).rank(
            &agent(&["python"]),
            &eligible,
            &snap,
            &graph,
            Utc::now(),
        );
        assert!(winner.is_some());
    }

    #[test]
    fn critical_path_task_outranks_leaf() {
        // "root" unblocks two successors; "leaf" unblocks none. Identical
        // otherwise, so the unblocking term decides.
        let root = task_fixture("root", TaskStatus::Todo);
        let leaf = task_fixture("leaf", TaskStatus::Todo);
        let mut s1 = task_fixture("s1", TaskStatus::Todo);
        s1.dependencies.insert("root".to_string());
        let mut s2 = task_fixture("s2", TaskStatus::Todo);
        s2.dependencies.insert("root".to_string());

        let snap = snapshot(vec![root, leaf, s1, s2]);
        let graph = build_graph(&snap);
        let eligible = vec![snap.task("root").unwrap(), snap.task("leaf").unwrap()];

        let winner = Ranker::new(weights())
            .rank(&agent(&[]), &eligible, &snap, &graph, Utc::now())
            .unwrap();
        assert_eq!(winner.id, "root");
    }

    #[test]
    fn ties_break_by_priority_then_age_then_id() {
        let mut urgent = task_fixture("b-urgent", TaskStatus::Todo);
        urgent.priority = Priority::Urgent;
        let mut low = task_fixture("a-low", TaskStatus::Todo);
        low.priority = Priority::Low;

        let snap = snapshot(vec![urgent, low]);
        let graph = build_graph(&snap);
        let eligible = eligible_tasks(&snap, &graph, &HashSet::new());
        let winner = Ranker::new(weights())
            .rank(&agent(&[]), &eligible, &snap, &graph, Utc::now())
            .unwrap();
        assert_eq!(winner.id, "b-urgent");

        // With equal scores the earlier-created task wins.
        let mut old = task_fixture("old", TaskStatus::Todo);
        old.created_at = Utc::now() - Duration::seconds(5);
        old.labels = BTreeSet::new();
        let young = task_fixture("young", TaskStatus::Todo);
        let zero = RankerWeights {
            skill: 0.0,
            prio: 0.0,
            age: 0.0,
            unblk: 0.0,
            misf: 0.0,
        };
        let snap = snapshot(vec![young, old]);
        let graph = build_graph(&snap);
        let eligible = eligible_tasks(&snap, &graph, &HashSet::new());
        let winner = Ranker::new(zero)
            .rank(&agent(&[]), &eligible, &snap, &graph, Utc::now())
            .unwrap();
        assert_eq!(winner.id, "old");
    }
}
