//! Dependency inference: builds the DAG the scheduler orders work by.
//!
//! Edges come from four sources in decreasing confidence: declared
//! dependencies, phase ordering within a component, keyword heuristics over
//! names and descriptions, and (optionally) advisor suggestions. The result
//! is deterministic and pure over a snapshot plus a fixed advice set, and is
//! cached per snapshot version by the coordinator.

mod cycle;

use crate::{
    config::InferenceConfig,
    models::{Snapshot, Task},
    MarcusError, Result,
};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Where an inferred edge came from; orders the drop preference during
/// cycle pruning (declared edges are never dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeOrigin {
    Advisor,
    Keyword,
    Phase,
    Parent,
    Declared,
}

#[derive(Debug, Clone)]
struct Edge {
    /// Predecessor: must be done before `to` may start.
    from: String,
    to: String,
    confidence: f64,
    origin: EdgeOrigin,
}

/// An edge suggested by the AI advisor for a candidate pair.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SuggestedEdge {
    pub from: String,
    pub to: String,
    pub confidence: f64,
}

/// The dependency DAG over a snapshot. Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    successors: BTreeMap<String, BTreeSet<String>>,
    predecessors: BTreeMap<String, BTreeSet<String>>,
    /// One warning per suspect edge omitted during cycle pruning.
    pub warnings: Vec<String>,
}

impl DepGraph {
    pub fn predecessors<'a>(&'a self, task_id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.predecessors
            .get(task_id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn successors<'a>(&'a self, task_id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.successors
            .get(task_id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.successors
            .get(from)
            .is_some_and(|next| next.contains(to))
    }

    pub fn edge_count(&self) -> usize {
        self.successors.values().map(BTreeSet::len).sum()
    }
}

/// A keyword rule: when a task's text matches `pattern`, capture group 1
/// names the predecessor task.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub pattern: Regex,
}

fn default_rules() -> Vec<KeywordRule> {
    // A policy table rather than hard-coded matching logic; group 1 is the
    // name of the task being depended on.
    const PATTERNS: &[&str] = &[
        r"(?i)\bextends?\s+(?:the\s+)?(.+?)(?:\.|,|$)",
        r"(?i)\bintegrat(?:e|es|ing)\s+with\s+(?:the\s+)?(.+?)(?:\.|,|$)",
        r"(?i)\badd\s+tests?\s+for\s+(?:the\s+)?(.+?)(?:\.|,|$)",
        r"(?i)\bdocument\s+(?:the\s+)?(.+?)(?:\.|,|$)",
        r"(?i)\bdeploy\s+(?:the\s+)?(.+?)(?:\.|,|$)",
    ];
    PATTERNS
        .iter()
        .map(|p| KeywordRule {
            pattern: Regex::new(p).expect("built-in keyword rule must compile"),
        })
        .collect()
}

pub struct InferenceEngine {
    config: InferenceConfig,
    rules: Vec<KeywordRule>,
}

impl InferenceEngine {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            config,
            rules: default_rules(),
        }
    }

    pub fn with_rules(config: InferenceConfig, rules: Vec<KeywordRule>) -> Self {
        Self { config, rules }
    }

    /// Candidate pairs worth asking the advisor about: same component, no
    /// edge inferred from stronger sources, capped per batch.
    pub fn candidate_pairs(&self, snapshot: &Snapshot) -> Vec<(String, String)> {
        if !self.config.enable_ai {
            return Vec::new();
        }
        let graph = match self.build(snapshot, &[]) {
            Ok(graph) => graph,
            Err(_) => return Vec::new(),
        };
        let mut pairs = Vec::new();
        for (i, a) in snapshot.tasks.iter().enumerate() {
            for b in snapshot.tasks.iter().skip(i + 1) {
                if !a.shares_component_with(b) {
                    continue;
                }
                if graph.has_edge(&a.id, &b.id) || graph.has_edge(&b.id, &a.id) {
                    continue;
                }
                pairs.push((a.id.clone(), b.id.clone()));
                if pairs.len() >= self.config.max_ai_pairs_per_batch {
                    return pairs;
                }
            }
        }
        pairs
    }

    /// Builds the DAG from the snapshot plus any advisor suggestions.
    pub fn build(&self, snapshot: &Snapshot, advice: &[SuggestedEdge]) -> Result<DepGraph> {
        let ids: BTreeSet<String> = snapshot.tasks.iter().map(|t| t.id.clone()).collect();
        let mut edges: Vec<Edge> = Vec::new();

        // 1. Declared dependencies seed the graph.
        for task in &snapshot.tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep) {
                    warn!(
                        "task {} declares dependency on unknown task {dep}, ignoring",
                        task.id
                    );
                    continue;
                }
                edges.push(Edge {
                    from: dep.clone(),
                    to: task.id.clone(),
                    confidence: 1.0,
                    origin: EdgeOrigin::Declared,
                });
            }
            // A `parent:<id>` label is an implicit predecessor edge.
            if let Some(parent) = task.parent_id() {
                if ids.contains(parent) && parent != task.id {
                    edges.push(Edge {
                        from: parent.to_string(),
                        to: task.id.clone(),
                        confidence: 0.95,
                        origin: EdgeOrigin::Parent,
                    });
                }
            }
        }

        // 2. Phase ordering within a shared component: earlier-phase work
        // precedes later-phase work. This is what keeps tests from being
        // assigned before the implementation they test.
        for (i, a) in snapshot.tasks.iter().enumerate() {
            for b in snapshot.tasks.iter().skip(i + 1) {
                if !a.shares_component_with(b) {
                    continue;
                }
                let (Some(phase_a), Some(phase_b)) = (a.phase(), b.phase()) else {
                    continue;
                };
                if phase_a == phase_b {
                    continue;
                }
                let (earlier, later) = if phase_a < phase_b { (a, b) } else { (b, a) };
                edges.push(Edge {
                    from: earlier.id.clone(),
                    to: later.id.clone(),
                    confidence: 0.9,
                    origin: EdgeOrigin::Phase,
                });
            }
        }

        // 3. Keyword heuristics: a template match naming exactly one other
        // task adds an edge from the named predecessor.
        for task in &snapshot.tasks {
            let text = format!("{}. {}", task.name, task.description);
            for rule in &self.rules {
                let Some(captures) = rule.pattern.captures(&text) else {
                    continue;
                };
                let Some(needle) = captures.get(1).map(|m| m.as_str().trim()) else {
                    continue;
                };
                if needle.is_empty() {
                    continue;
                }
                if let Some(predecessor) = unique_match(snapshot, task, needle) {
                    edges.push(Edge {
                        from: predecessor.to_string(),
                        to: task.id.clone(),
                        confidence: self.config.pattern_confidence,
                        origin: EdgeOrigin::Keyword,
                    });
                }
            }
        }

        // 4. Advisor suggestions, gated by the confidence threshold.
        for suggestion in advice {
            if suggestion.confidence < self.config.ai_confidence {
                debug!(
                    "dropping advisor edge {} -> {} below confidence threshold ({:.2})",
                    suggestion.from, suggestion.to, suggestion.confidence
                );
                continue;
            }
            if !ids.contains(&suggestion.from) || !ids.contains(&suggestion.to) {
                continue;
            }
            edges.push(Edge {
                from: suggestion.from.clone(),
                to: suggestion.to.clone(),
                confidence: suggestion.confidence,
                origin: EdgeOrigin::Advisor,
            });
        }

        // 5. Cycle pruning: drop the weakest suspect edge on each cycle
        // until none remain. A cycle of declared edges alone is a board
        // configuration error, not something to silently repair.
        let mut warnings = Vec::new();
        loop {
            let successors = collect_successors(&edges);
            let Some(cycle) = cycle::find_cycle(&ids, &successors) else {
                break;
            };
            let droppable = edges
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    e.origin != EdgeOrigin::Declared
                        && cycle.iter().any(|(f, t)| *f == e.from && *t == e.to)
                })
                .min_by(|(_, a), (_, b)| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.origin.cmp(&b.origin))
                        .then((&a.from, &a.to).cmp(&(&b.from, &b.to)))
                });
            match droppable {
                Some((index, _)) => {
                    let dropped = edges.remove(index);
                    let warning = format!(
                        "suspect edge {} -> {} ({:?}, {:.2}) omitted to break a dependency cycle",
                        dropped.from, dropped.to, dropped.origin, dropped.confidence
                    );
                    warn!("{warning}");
                    warnings.push(warning);
                }
                None => {
                    let description = cycle
                        .iter()
                        .map(|(f, t)| format!("{f} -> {t}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(MarcusError::DependencyCycle(description));
                }
            }
        }

        let mut graph = DepGraph {
            warnings,
            ..DepGraph::default()
        };
        for edge in edges {
            graph
                .successors
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
            graph
                .predecessors
                .entry(edge.to)
                .or_default()
                .insert(edge.from);
        }
        Ok(graph)
    }
}

/// Finds the single task (other than `task`) whose name contains `needle`,
/// case-insensitively. More than one match means the reference is ambiguous
/// and no edge is added.
fn unique_match<'a>(snapshot: &'a Snapshot, task: &Task, needle: &str) -> Option<&'a str> {
    let needle = needle.to_lowercase();
    let mut found: Option<&str> = None;
    for candidate in &snapshot.tasks {
        if candidate.id == task.id {
            continue;
        }
        if candidate.name.to_lowercase().contains(&needle) {
            if found.is_some() {
                return None;
            }
            found = Some(&candidate.id);
        }
    }
    found
}

fn collect_successors(edges: &[Edge]) -> BTreeMap<String, BTreeSet<String>> {
    let mut successors: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for edge in edges {
        successors
            .entry(edge.from.clone())
            .or_default()
            .insert(edge.to.clone());
    }
    successors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{task_fixture, TaskStatus};
    use chrono::Utc;

    fn engine() -> InferenceEngine {
        InferenceEngine::new(InferenceConfig {
            pattern_confidence: 0.8,
            ai_confidence: 0.7,
            max_ai_pairs_per_batch: 20,
            cache_ttl_secs: 300,
            enable_ai: false,
        })
    }

    fn snapshot(tasks: Vec<crate::models::Task>) -> Snapshot {
        Snapshot {
            version: 1,
            fetched_at: Utc::now(),
            tasks,
        }
    }

    #[test]
    fn declared_dependencies_become_edges() {
        let mut b = task_fixture("b", TaskStatus::Todo);
        b.dependencies.insert("a".to_string());
        let snap = snapshot(vec![task_fixture("a", TaskStatus::Todo), b]);

        let graph = engine().build(&snap, &[]).unwrap();
        assert!(graph.has_edge("a", "b"));
        assert_eq!(graph.predecessors("b").collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn phase_ordering_links_component_siblings() {
        let mut implementation = task_fixture("impl-api", TaskStatus::Todo);
        implementation.labels.insert("component:api".to_string());
        implementation
            .labels
            .insert("phase:implementation".to_string());

        let mut testing = task_fixture("test-api", TaskStatus::Todo);
        testing.labels.insert("component:api".to_string());
        testing.labels.insert("phase:testing".to_string());

        let snap = snapshot(vec![testing, implementation]);
        let graph = engine().build(&snap, &[]).unwrap();
        assert!(graph.has_edge("impl-api", "test-api"));
        assert!(!graph.has_edge("test-api", "impl-api"));
    }

    #[test]
    fn keyword_rule_adds_edge_on_unique_match() {
        let user_api = {
            let mut t = task_fixture("t1", TaskStatus::Todo);
            t.name = "User API".to_string();
            t
        };
        let order_api = {
            let mut t = task_fixture("t2", TaskStatus::Todo);
            t.name = "Order service".to_string();
            t.description = "Integrate with the User API".to_string();
            t
        };

        let snap = snapshot(vec![user_api, order_api]);
        let graph = engine().build(&snap, &[]).unwrap();
        assert!(graph.has_edge("t1", "t2"));
    }

    #[test]
    fn ambiguous_keyword_reference_adds_nothing() {
        let a = {
            let mut t = task_fixture("t1", TaskStatus::Todo);
            t.name = "User API v1".to_string();
            t
        };
        let b = {
            let mut t = task_fixture("t2", TaskStatus::Todo);
            t.name = "User API v2".to_string();
            t
        };
        let c = {
            let mut t = task_fixture("t3", TaskStatus::Todo);
            t.description = "Integrate with the User API".to_string();
            t
        };

        let snap = snapshot(vec![a, b, c]);
        let graph = engine().build(&snap, &[]).unwrap();
        assert!(graph.predecessors("t3").next().is_none());
    }

    #[test]
    fn configured_rules_replace_the_builtin_table() {
        let config = InferenceConfig {
            pattern_confidence: 0.8,
            ai_confidence: 0.7,
            max_ai_pairs_per_batch: 20,
            cache_ttl_secs: 300,
            enable_ai: false,
        };
        let rules = vec![KeywordRule {
            pattern: Regex::new(r"(?i)\bafter\s+(.+?)(?:\.|,|$)").unwrap(),
        }];
        let engine = InferenceEngine::with_rules(config, rules);

        let first = {
            let mut t = task_fixture("t1", TaskStatus::Todo);
            t.name = "Billing export".to_string();
            t
        };
        let second = {
            let mut t = task_fixture("t2", TaskStatus::Todo);
            t.description = "Run after Billing export.".to_string();
            t
        };
        let snap = snapshot(vec![first, second]);
        let graph = engine.build(&snap, &[]).unwrap();
        assert!(graph.has_edge("t1", "t2"));

        // The built-in "integrate with" rule is gone under the custom table.
        let third = {
            let mut t = task_fixture("t3", TaskStatus::Todo);
            t.description = "Integrate with the Billing export".to_string();
            t
        };
        let snap = snapshot(vec![snap.tasks[0].clone(), third]);
        let graph = engine.build(&snap, &[]).unwrap();
        assert!(graph.predecessors("t3").next().is_none());
    }

    #[test]
    fn advisor_edges_below_threshold_are_dropped() {
        let snap = snapshot(vec![
            task_fixture("a", TaskStatus::Todo),
            task_fixture("b", TaskStatus::Todo),
        ]);
        let advice = vec![
            SuggestedEdge {
                from: "a".to_string(),
                to: "b".to_string(),
                confidence: 0.5,
            },
        ];
        let graph = engine().build(&snap, &advice).unwrap();
        assert!(!graph.has_edge("a", "b"));

        let confident = vec![SuggestedEdge {
            from: "a".to_string(),
            to: "b".to_string(),
            confidence: 0.9,
        }];
        let graph = engine().build(&snap, &confident).unwrap();
        assert!(graph.has_edge("a", "b"));
    }

    #[test]
    fn heuristic_cycle_is_pruned_with_warning() {
        // Declared a -> b plus an advisor edge b -> a closes a cycle; the
        // weaker advisor edge must be the one dropped.
        let mut b = task_fixture("b", TaskStatus::Todo);
        b.dependencies.insert("a".to_string());
        let snap = snapshot(vec![task_fixture("a", TaskStatus::Todo), b]);

        let advice = vec![SuggestedEdge {
            from: "b".to_string(),
            to: "a".to_string(),
            confidence: 0.99,
        }];
        let graph = engine().build(&snap, &advice).unwrap();
        assert!(graph.has_edge("a", "b"));
        assert!(!graph.has_edge("b", "a"));
        assert_eq!(graph.warnings.len(), 1);
    }

    #[test]
    fn declared_cycle_is_a_hard_error() {
        let mut a = task_fixture("a", TaskStatus::Todo);
        a.dependencies.insert("b".to_string());
        let mut b = task_fixture("b", TaskStatus::Todo);
        b.dependencies.insert("a".to_string());

        let snap = snapshot(vec![a, b]);
        let err = engine().build(&snap, &[]).unwrap_err();
        assert!(matches!(err, MarcusError::DependencyCycle(_)));
    }

    #[test]
    fn output_is_always_acyclic() {
        let mut tasks = Vec::new();
        for (id, component, phase) in [
            ("design-api", "api", "design"),
            ("impl-api", "api", "implementation"),
            ("test-api", "api", "testing"),
            ("doc-api", "api", "documentation"),
        ] {
            let mut t = task_fixture(id, TaskStatus::Todo);
            t.labels.insert(format!("component:{component}"));
            t.labels.insert(format!("phase:{phase}"));
            tasks.push(t);
        }
        let snap = snapshot(tasks);
        let graph = engine().build(&snap, &[]).unwrap();

        // Dense phase edges, still a DAG.
        assert!(graph.edge_count() >= 6);
        assert!(graph.warnings.is_empty());
    }
}
