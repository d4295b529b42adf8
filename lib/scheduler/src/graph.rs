//! Dependency-trigger wiring: tracks which tasks fire when their parents
//! complete (§4.7).
//!
//! Grounded structurally on `workflow/src/graph.rs`'s petgraph-backed DAG
//! (`petgraph::algo::is_cyclic_directed`) for acyclicity, and on
//! `olaals-cli-tools/watchdag/src/dag/scheduler.rs`'s per-dependent
//! completed-parent tracking and join-predicate shape for the run-time
//! bookkeeping — but explicitly not on that file's `mark_dependents_failed`
//! cascade: a failed parent here never propagates to its dependents.

use crate::duration::parse_duration;
use crate::error::ValidationError;
use crate::execution::{Execution, ExecutionStatus, TriggerContext};
use crate::model::JoinMode;
use chrono::{DateTime, Duration, Utc};
use claudecron_core::TaskId;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

struct DependentState {
    parent_ids: Vec<TaskId>,
    join: JoinMode,
    debounce: Option<Duration>,
    completed_parents: HashSet<TaskId>,
    last_fired_at: Option<DateTime<Utc>>,
}

/// The DAG of dependency-trigger wiring, plus per-dependent run-time state.
#[derive(Default)]
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    index_of: HashMap<TaskId, NodeIndex>,
    dependents: HashMap<TaskId, DependentState>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn node_index(&mut self, task_id: TaskId) -> NodeIndex {
        *self
            .index_of
            .entry(task_id)
            .or_insert_with(|| self.graph.add_node(task_id))
    }

    /// Wires `dependent_id` to fire once `parent_ids` satisfy `join`,
    /// subject to `debounce`. Rejects the change if it would introduce a
    /// cycle, leaving the graph unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DependencyCycle`] if adding these edges
    /// would make the dependency graph cyclic, or
    /// [`ValidationError::InvalidDuration`] if `debounce` doesn't parse.
    pub fn add_dependency(
        &mut self,
        dependent_id: TaskId,
        parent_ids: Vec<TaskId>,
        join: JoinMode,
        debounce: Option<&str>,
    ) -> Result<(), ValidationError> {
        let debounce = debounce.map(parse_duration).transpose()?;

        let dependent_idx = self.node_index(dependent_id);
        let mut added_edges = Vec::new();
        for &parent_id in &parent_ids {
            let parent_idx = self.node_index(parent_id);
            added_edges.push(self.graph.add_edge(parent_idx, dependent_idx, ()));
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            for edge in added_edges {
                self.graph.remove_edge(edge);
            }
            return Err(ValidationError::DependencyCycle {
                task_id: dependent_id.to_string(),
            });
        }

        self.dependents.insert(
            dependent_id,
            DependentState {
                parent_ids,
                join,
                debounce,
                completed_parents: HashSet::new(),
                last_fired_at: None,
            },
        );
        Ok(())
    }

    /// Drops `task_id` from the graph entirely: as a dependent (clears its
    /// wiring) and as a parent (removes it from others' `parent_ids`).
    pub fn remove_task(&mut self, task_id: TaskId) {
        self.dependents.remove(&task_id);
        if let Some(&idx) = self.index_of.get(&task_id) {
            self.graph.remove_node(idx);
            self.index_of.remove(&task_id);
        }
        for state in self.dependents.values_mut() {
            state.parent_ids.retain(|&id| id != task_id);
            state.completed_parents.remove(&task_id);
        }
    }

    /// Notifies the graph that `parent_id` completed with `status`.
    ///
    /// Failed completions are recorded nowhere and never satisfy a join —
    /// they simply do not advance `completed_parents`, and they never
    /// cascade a failure onto dependents (§9).
    ///
    /// Returns the dependents that are now ready to fire, along with the
    /// trigger context to dispatch them with. Each returned dependent has
    /// already had its `completed_parents` cleared and `last_fired_at`
    /// updated.
    pub fn notify_completed(
        &mut self,
        parent_id: TaskId,
        completion: &Execution,
    ) -> Vec<(TaskId, TriggerContext)> {
        if completion.status != ExecutionStatus::Success {
            return Vec::new();
        }

        let mut fired = Vec::new();
        let dependent_ids: Vec<TaskId> = self
            .dependents
            .iter()
            .filter(|(_, state)| state.parent_ids.contains(&parent_id))
            .map(|(id, _)| *id)
            .collect();

        for dependent_id in dependent_ids {
            let now = Utc::now();
            let state = self.dependents.get_mut(&dependent_id).expect("looked up above");
            state.completed_parents.insert(parent_id);

            let satisfied = match state.join {
                JoinMode::RequireAll => state
                    .parent_ids
                    .iter()
                    .all(|id| state.completed_parents.contains(id)),
                JoinMode::RequireAny => !state.completed_parents.is_empty(),
            };
            if !satisfied {
                continue;
            }

            if let (Some(debounce), Some(last)) = (state.debounce, state.last_fired_at) {
                if now - last < debounce {
                    // Debounce window still active: suppress this fire
                    // entirely, leave state untouched for the next check.
                    continue;
                }
            }

            let mut context = TriggerContext::new();
            context.insert(
                "triggered_by".to_string(),
                serde_json::Value::String(parent_id.to_string()),
            );
            context.insert(
                "execution_id".to_string(),
                serde_json::Value::String(completion.id.to_string()),
            );
            fired.push((dependent_id, context));

            state.completed_parents.clear();
            state.last_fired_at = Some(now);
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claudecron_core::{ExecutionId, TaskId};

    fn success(task_id: TaskId) -> Execution {
        Execution {
            id: ExecutionId::new(),
            task_id,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            duration_ms: Some(1),
            trigger_type: "manual".into(),
            trigger_context: None,
            status: ExecutionStatus::Success,
            exit_code: Some(0),
            error: None,
            output: None,
            output_truncated: false,
            thinking_output: None,
            tool_calls: vec![],
            sdk_usage: None,
            cost_usd: None,
        }
    }

    #[test]
    fn require_all_waits_for_every_parent() {
        let mut graph = DependencyGraph::new();
        let (a, b, dependent) = (TaskId::new(), TaskId::new(), TaskId::new());
        graph
            .add_dependency(dependent, vec![a, b], JoinMode::RequireAll, None)
            .unwrap();

        assert!(graph.notify_completed(a, &success(a)).is_empty());
        let fired = graph.notify_completed(b, &success(b));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, dependent);
    }

    #[test]
    fn require_any_fires_on_first_parent() {
        let mut graph = DependencyGraph::new();
        let (a, b, dependent) = (TaskId::new(), TaskId::new(), TaskId::new());
        graph
            .add_dependency(dependent, vec![a, b], JoinMode::RequireAny, None)
            .unwrap();

        let fired = graph.notify_completed(a, &success(a));
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn failed_parent_never_fires_and_never_cascades() {
        let mut graph = DependencyGraph::new();
        let (a, dependent) = (TaskId::new(), TaskId::new());
        graph
            .add_dependency(dependent, vec![a], JoinMode::RequireAll, None)
            .unwrap();

        let mut failure = success(a);
        failure.status = ExecutionStatus::Failure;
        assert!(graph.notify_completed(a, &failure).is_empty());
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = DependencyGraph::new();
        let (a, b) = (TaskId::new(), TaskId::new());
        graph.add_dependency(b, vec![a], JoinMode::RequireAll, None).unwrap();
        let err = graph.add_dependency(a, vec![b], JoinMode::RequireAll, None);
        assert!(matches!(err, Err(ValidationError::DependencyCycle { .. })));
    }

    #[test]
    fn debounce_suppresses_rapid_refire() {
        let mut graph = DependencyGraph::new();
        let (a, dependent) = (TaskId::new(), TaskId::new());
        graph
            .add_dependency(dependent, vec![a], JoinMode::RequireAny, Some("1h"))
            .unwrap();

        assert_eq!(graph.notify_completed(a, &success(a)).len(), 1);
        // Immediate re-completion within the debounce window is suppressed.
        assert!(graph.notify_completed(a, &success(a)).is_empty());
    }
}
