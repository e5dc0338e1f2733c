//! Task dependency graph: structural validation, topological order, and
//! wave grouping. Readiness/skip computation against live per-iteration
//! task statuses lives in `application::dag_engine`, which is built on top
//! of this structure.

use std::collections::{HashMap, HashSet, VecDeque};

use super::task::Dependency;

/// A node in the DAG: one task name plus its incoming and outgoing edges.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
    pub dependencies: Vec<Dependency>,
    pub dependents: Vec<String>,
}

impl TaskNode {
    fn new(name: String, dependencies: Vec<Dependency>) -> Self {
        Self { name, dependencies, dependents: vec![] }
    }
}

/// A validated (or validatable) task dependency graph, keyed by task name.
#[derive(Debug, Clone)]
pub struct TaskDag {
    pub nodes: HashMap<String, TaskNode>,
    pub roots: Vec<String>,
    pub leaves: Vec<String>,
}

/// DAG validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    #[error("cycle detected in task dependencies: {0:?}")]
    CycleDetected(Vec<String>),
    #[error("task '{task}' depends on unknown task '{missing}'")]
    MissingDependency { task: String, missing: String },
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),
}

impl TaskDag {
    /// Build a DAG from `(name, dependencies)` pairs without validating it.
    /// Call `validate` before using it for scheduling.
    pub fn from_edges(tasks: Vec<(String, Vec<Dependency>)>) -> Result<Self, DagError> {
        let mut nodes: HashMap<String, TaskNode> = HashMap::new();
        let mut has_dependents: HashSet<String> = HashSet::new();

        for (name, deps) in &tasks {
            if nodes.contains_key(name) {
                return Err(DagError::DuplicateTask(name.clone()));
            }
            nodes.insert(name.clone(), TaskNode::new(name.clone(), deps.clone()));
        }

        let names: Vec<String> = tasks.iter().map(|(name, _)| name.clone()).collect();
        for name in &names {
            let deps = nodes[name].dependencies.clone();
            for dep in &deps {
                if let Some(dep_node) = nodes.get_mut(&dep.source) {
                    dep_node.dependents.push(name.clone());
                    has_dependents.insert(dep.source.clone());
                }
            }
        }

        let roots: Vec<String> = nodes
            .values()
            .filter(|node| node.dependencies.is_empty())
            .map(|node| node.name.clone())
            .collect();
        let leaves: Vec<String> = nodes
            .keys()
            .filter(|name| !has_dependents.contains(*name))
            .cloned()
            .collect();

        Ok(Self { nodes, roots, leaves })
    }

    /// Check every edge names a task present in the graph.
    pub fn check_missing_dependencies(&self) -> Result<(), DagError> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(&dep.source) {
                    return Err(DagError::MissingDependency {
                        task: node.name.clone(),
                        missing: dep.source.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Full structural validation: missing-dependency check, then cycle
    /// detection via Kahn's algorithm. Any nodes left undrained by the
    /// in-degree sort are exactly the cyclic residue.
    pub fn validate(&self) -> Result<(), DagError> {
        self.check_missing_dependencies()?;
        self.topological_sort().map(|_| ())
    }

    /// Kahn's algorithm: repeatedly drain nodes whose in-degree has reached
    /// zero. If nodes remain once the queue empties, they form a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>, DagError> {
        let mut in_degree: HashMap<String, usize> = HashMap::new();
        for (name, node) in &self.nodes {
            in_degree.insert(name.clone(), node.dependencies.len());
        }

        let mut queue: VecDeque<String> =
            in_degree.iter().filter(|(_, &d)| d == 0).map(|(name, _)| name.clone()).collect();
        queue.make_contiguous().sort();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(name) = queue.pop_front() {
            result.push(name.clone());
            if let Some(node) = self.nodes.get(&name) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let drained: HashSet<&String> = result.iter().collect();
            let residue: Vec<String> =
                self.nodes.keys().filter(|name| !drained.contains(name)).cloned().collect();
            return Err(DagError::CycleDetected(residue));
        }

        Ok(result)
    }

    /// Structural waves ignoring edge conditions: a wave is the set of nodes
    /// whose dependencies are all in earlier waves. Used for static
    /// parallelism estimation (`stats`); the live scheduler in
    /// `application::dag_engine` recomputes readiness against real statuses.
    pub fn execution_waves(&self) -> Result<Vec<Vec<String>>, DagError> {
        self.validate()?;

        let mut waves = Vec::new();
        let mut remaining: HashSet<String> = self.nodes.keys().cloned().collect();
        let mut completed: HashSet<String> = HashSet::new();

        while !remaining.is_empty() {
            let mut wave: Vec<String> = remaining
                .iter()
                .filter(|name| {
                    self.nodes[*name].dependencies.iter().all(|d| completed.contains(&d.source))
                })
                .cloned()
                .collect();
            wave.sort();

            if wave.is_empty() {
                return Err(DagError::CycleDetected(remaining.into_iter().collect()));
            }

            for name in &wave {
                remaining.remove(name);
                completed.insert(name.clone());
            }
            waves.push(wave);
        }

        Ok(waves)
    }

    /// All tasks that transitively depend on `task`.
    pub fn get_all_dependents(&self, task: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = self.nodes.get(task) {
            queue.extend(node.dependents.iter().cloned());
        }
        while let Some(name) = queue.pop_front() {
            if result.insert(name.clone()) {
                if let Some(node) = self.nodes.get(&name) {
                    queue.extend(node.dependents.iter().cloned());
                }
            }
        }
        result
    }

    /// All tasks `task` transitively depends on.
    pub fn get_all_dependencies(&self, task: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = self.nodes.get(task) {
            queue.extend(node.dependencies.iter().map(|d| d.source.clone()));
        }
        while let Some(name) = queue.pop_front() {
            if result.insert(name.clone()) {
                if let Some(node) = self.nodes.get(&name) {
                    queue.extend(node.dependencies.iter().map(|d| d.source.clone()));
                }
            }
        }
        result
    }

    pub fn stats(&self) -> DagStats {
        let waves = self.execution_waves().unwrap_or_default();
        DagStats {
            total_nodes: self.nodes.len(),
            root_count: self.roots.len(),
            leaf_count: self.leaves.len(),
            wave_count: waves.len(),
            max_parallelism: waves.iter().map(Vec::len).max().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagStats {
    pub total_nodes: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub wave_count: usize,
    pub max_parallelism: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::EdgeCondition;

    fn dep(source: &str) -> Dependency {
        Dependency { source: source.to_string(), condition: EdgeCondition::Success }
    }

    fn edges(pairs: Vec<(&str, Vec<&str>)>) -> Vec<(String, Vec<Dependency>)> {
        pairs
            .into_iter()
            .map(|(name, deps)| (name.to_string(), deps.into_iter().map(dep).collect()))
            .collect()
    }

    #[test]
    fn simple_linear_dag() {
        let dag = TaskDag::from_edges(edges(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])])).unwrap();
        assert_eq!(dag.nodes.len(), 3);
        assert_eq!(dag.roots, vec!["a".to_string()]);
        assert_eq!(dag.leaves, vec!["c".to_string()]);
        assert!(dag.validate().is_ok());
    }

    #[test]
    fn topological_sort_respects_order() {
        let dag = TaskDag::from_edges(edges(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["a"])])).unwrap();
        let sorted = dag.topological_sort().unwrap();
        let pos = |n: &str| sorted.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
    }

    #[test]
    fn execution_waves_groups_parallel_tasks() {
        let dag = TaskDag::from_edges(edges(vec![
            ("a", vec![]),
            ("b", vec![]),
            ("c", vec!["a", "b"]),
            ("d", vec!["c"]),
        ]))
        .unwrap();
        let waves = dag.execution_waves().unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0].len(), 2);
        assert_eq!(waves[1], vec!["c".to_string()]);
        assert_eq!(waves[2], vec!["d".to_string()]);
    }

    #[test]
    fn cycle_is_detected_with_residue() {
        let dag = TaskDag::from_edges(edges(vec![("a", vec!["c"]), ("b", vec!["a"]), ("c", vec!["b"])])).unwrap();
        let err = dag.validate().unwrap_err();
        match err {
            DagError::CycleDetected(mut residue) => {
                residue.sort();
                assert_eq!(residue, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_is_named() {
        let dag = TaskDag::from_edges(edges(vec![("a", vec!["ghost"])])).unwrap();
        let err = dag.validate().unwrap_err();
        assert_eq!(err, DagError::MissingDependency { task: "a".into(), missing: "ghost".into() });
    }

    #[test]
    fn transitive_dependents_and_dependencies() {
        let dag = TaskDag::from_edges(edges(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])])).unwrap();
        let deps_of_c = dag.get_all_dependencies("c");
        assert!(deps_of_c.contains("a") && deps_of_c.contains("b"));
        let dependents_of_a = dag.get_all_dependents("a");
        assert!(dependents_of_a.contains("b") && dependents_of_a.contains("c"));
    }

    #[test]
    fn stats_reports_parallelism() {
        let dag = TaskDag::from_edges(edges(vec![("a", vec![]), ("b", vec![]), ("c", vec!["a", "b"])])).unwrap();
        let stats = dag.stats();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.wave_count, 2);
        assert_eq!(stats.max_parallelism, 2);
    }
}
