//! Live DAG scheduling: readiness and forced-skip computation against a
//! per-iteration task-status tracker, layered on top of the structural
//! `domain::models::dag::TaskDag`.
//!
//! Follows a "compute ready set, launch, recompute" scheduling-loop shape;
//! the skip-propagation and deadlock rules below follow this project's
//! conditional-edge dependency-graph contract.

use std::collections::HashMap;

use crate::domain::models::dag::{DagError, TaskDag};
use crate::domain::models::task::TaskStatus;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DagEngineError {
    #[error("scheduling deadlock: {0:?} are pending with no ready task among them")]
    Deadlock(Vec<String>),
}

/// Per-iteration task status tracker. Created fresh per DAG iteration and
/// discarded at iteration end.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    statuses: HashMap<String, TaskStatus>,
}

impl StatusTracker {
    /// All named tasks start `pending`.
    pub fn new(task_names: impl IntoIterator<Item = String>) -> Self {
        Self { statuses: task_names.into_iter().map(|name| (name, TaskStatus::Pending)).collect() }
    }

    pub fn get(&self, name: &str) -> TaskStatus {
        self.statuses.get(name).copied().unwrap_or(TaskStatus::Pending)
    }

    pub fn set(&mut self, name: &str, status: TaskStatus) {
        self.statuses.insert(name.to_string(), status);
    }

    pub fn all_terminal(&self) -> bool {
        self.statuses.values().all(|status| status.is_terminal())
    }

    pub fn snapshot(&self) -> HashMap<String, TaskStatus> {
        self.statuses.clone()
    }

    pub fn pending_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.statuses.iter().filter(|(_, status)| !status.is_terminal()).map(|(name, _)| name.clone()).collect();
        names.sort();
        names
    }
}

/// Live scheduler over a structurally-validated `TaskDag`.
#[derive(Debug, Clone)]
pub struct DagEngine {
    dag: TaskDag,
}

impl DagEngine {
    pub fn new(dag: TaskDag) -> Result<Self, DagError> {
        dag.validate()?;
        Ok(Self { dag })
    }

    pub fn dag(&self) -> &TaskDag {
        &self.dag
    }

    /// A fresh tracker with every task in the graph set to `pending`.
    pub fn new_tracker(&self) -> StatusTracker {
        StatusTracker::new(self.dag.nodes.keys().cloned())
    }

    /// Mark every pending task whose dependency is terminal-and-unsatisfied
    /// as skipped, repeating until a pass flips nothing further so skips
    /// cascade to dependents. Returns the names newly skipped this call, in
    /// deterministic (sorted) discovery order.
    ///
    /// Once a source task reaches a terminal status it never changes again
    /// within this iteration, so "terminal and unsatisfied" already means
    /// "permanently unsatisfiable" — no separate reachability analysis is
    /// needed.
    pub fn apply_forced_skips(&self, tracker: &mut StatusTracker) -> Vec<String> {
        let mut newly_skipped = Vec::new();
        loop {
            let mut changed_this_pass = Vec::new();
            let mut names: Vec<&String> = self.dag.nodes.keys().collect();
            names.sort();
            for name in names {
                if tracker.get(name) != TaskStatus::Pending {
                    continue;
                }
                let node = &self.dag.nodes[name];
                let must_skip = node.dependencies.iter().any(|dep| {
                    let source_status = tracker.get(&dep.source);
                    source_status.is_terminal() && !dep.condition.is_satisfied_by(source_status)
                });
                if must_skip {
                    changed_this_pass.push(name.clone());
                }
            }
            if changed_this_pass.is_empty() {
                break;
            }
            for name in &changed_this_pass {
                tracker.set(name, TaskStatus::Skipped);
            }
            newly_skipped.extend(changed_this_pass);
        }
        newly_skipped
    }

    /// Pending tasks whose every dependency edge is satisfied right now
    /// (vacuously true for tasks with no dependencies).
    pub fn ready_tasks(&self, tracker: &StatusTracker) -> Vec<String> {
        let mut ready: Vec<String> = self
            .dag
            .nodes
            .values()
            .filter(|node| {
                tracker.get(&node.name) == TaskStatus::Pending
                    && node.dependencies.iter().all(|dep| {
                        let source_status = tracker.get(&dep.source);
                        source_status.is_terminal() && dep.condition.is_satisfied_by(source_status)
                    })
            })
            .map(|node| node.name.clone())
            .collect();
        ready.sort();
        ready
    }

    /// One full scheduling step: apply forced skips, then compute the ready
    /// set. Fails with `Deadlock` if nothing is ready and the tracker isn't
    /// fully terminal — every other state means either "done" (ready empty,
    /// all terminal) or "launch the ready set and loop again".
    pub fn step(&self, tracker: &mut StatusTracker) -> Result<DagStep, DagEngineError> {
        let skipped = self.apply_forced_skips(tracker);
        let ready = self.ready_tasks(tracker);
        if ready.is_empty() {
            if tracker.all_terminal() {
                return Ok(DagStep { skipped, ready, done: true });
            }
            return Err(DagEngineError::Deadlock(tracker.pending_names()));
        }
        Ok(DagStep { skipped, ready, done: false })
    }
}

/// Result of one `DagEngine::step` call.
#[derive(Debug, Clone)]
pub struct DagStep {
    pub skipped: Vec<String>,
    pub ready: Vec<String>,
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::{Dependency, EdgeCondition};

    fn dep(source: &str, condition: EdgeCondition) -> Dependency {
        Dependency { source: source.to_string(), condition }
    }

    fn linear_engine() -> DagEngine {
        let dag = TaskDag::from_edges(vec![
            ("a".into(), vec![]),
            ("b".into(), vec![dep("a", EdgeCondition::Success)]),
        ])
        .unwrap();
        DagEngine::new(dag).unwrap()
    }

    #[test]
    fn root_tasks_are_ready_immediately() {
        let engine = linear_engine();
        let tracker = engine.new_tracker();
        assert_eq!(engine.ready_tasks(&tracker), vec!["a".to_string()]);
    }

    #[test]
    fn dependent_becomes_ready_after_source_succeeds() {
        let engine = linear_engine();
        let mut tracker = engine.new_tracker();
        tracker.set("a", TaskStatus::Succeeded);
        assert_eq!(engine.ready_tasks(&tracker), vec!["b".to_string()]);
    }

    #[test]
    fn failure_edge_skips_success_dependent_and_routes_failure_dependent() {
        let dag = TaskDag::from_edges(vec![
            ("a".into(), vec![]),
            ("b".into(), vec![dep("a", EdgeCondition::Failure)]),
            ("c".into(), vec![dep("a", EdgeCondition::Success)]),
        ])
        .unwrap();
        let engine = DagEngine::new(dag).unwrap();
        let mut tracker = engine.new_tracker();
        tracker.set("a", TaskStatus::Failed);

        let skipped = engine.apply_forced_skips(&mut tracker);
        assert_eq!(skipped, vec!["c".to_string()]);
        assert_eq!(tracker.get("c"), TaskStatus::Skipped);
        assert_eq!(engine.ready_tasks(&tracker), vec!["b".to_string()]);
    }

    #[test]
    fn skip_cascades_through_non_always_dependents() {
        let dag = TaskDag::from_edges(vec![
            ("a".into(), vec![]),
            ("b".into(), vec![dep("a", EdgeCondition::Failure)]),
            ("c".into(), vec![dep("b", EdgeCondition::Success)]),
        ])
        .unwrap();
        let engine = DagEngine::new(dag).unwrap();
        let mut tracker = engine.new_tracker();
        tracker.set("a", TaskStatus::Succeeded);

        let skipped = engine.apply_forced_skips(&mut tracker);
        assert_eq!(skipped, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn always_edge_is_satisfied_by_a_skipped_dependency() {
        let dag = TaskDag::from_edges(vec![
            ("a".into(), vec![]),
            ("b".into(), vec![dep("a", EdgeCondition::Failure)]),
            ("c".into(), vec![dep("b", EdgeCondition::Always)]),
        ])
        .unwrap();
        let engine = DagEngine::new(dag).unwrap();
        let mut tracker = engine.new_tracker();
        tracker.set("a", TaskStatus::Succeeded);
        engine.apply_forced_skips(&mut tracker);

        assert_eq!(tracker.get("b"), TaskStatus::Skipped);
        assert_eq!(engine.ready_tasks(&tracker), vec!["c".to_string()]);
    }

    #[test]
    fn step_reports_done_once_everything_is_terminal() {
        let engine = linear_engine();
        let mut tracker = engine.new_tracker();
        tracker.set("a", TaskStatus::Succeeded);
        tracker.set("b", TaskStatus::Succeeded);
        let step = engine.step(&mut tracker).unwrap();
        assert!(step.done);
        assert!(step.ready.is_empty());
    }

    #[test]
    fn step_reports_deadlock_when_nothing_ready_and_not_terminal() {
        let engine = linear_engine();
        let mut tracker = engine.new_tracker();
        tracker.set("a", TaskStatus::Running);
        let err = engine.step(&mut tracker).unwrap_err();
        assert!(matches!(err, DagEngineError::Deadlock(pending) if pending == vec!["b".to_string()]));
    }
}
