//! Property tests for `TaskDag`'s topological sort: for randomly generated
//! acyclic task graphs, the resolved order must respect every dependency
//! edge and account for every task exactly once.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use swarmctl::domain::models::dag::TaskDag;
use swarmctl::domain::models::task::{Dependency, EdgeCondition};

fn success_dep(source: &str) -> Dependency {
    Dependency { source: source.to_string(), condition: EdgeCondition::Success }
}

/// Builds a DAG over `size` tasks named `t0..tN`, each depending on a
/// strict subset of the tasks before it, so the graph is acyclic by
/// construction.
fn acyclic_dag(size: usize, seed: u64) -> TaskDag {
    let names: Vec<String> = (0..size).map(|i| format!("t{i}")).collect();
    let mut state = seed.max(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let edges: Vec<(String, Vec<Dependency>)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let deps = names[..i]
                .iter()
                .filter(|_| i > 0 && next() % 3 == 0)
                .map(|source| success_dep(source))
                .collect();
            (name.clone(), deps)
        })
        .collect();

    TaskDag::from_edges(edges).expect("unique names never collide")
}

proptest! {
    /// Every dependency precedes its dependent in the sorted order.
    #[test]
    fn topological_sort_respects_every_edge(size in 1usize..30, seed in any::<u64>()) {
        let dag = acyclic_dag(size, seed);
        let sorted = dag.topological_sort().map_err(|e| TestCaseError::fail(e.to_string()))?;

        let position: HashMap<&str, usize> =
            sorted.iter().enumerate().map(|(i, name)| (name.as_str(), i)).collect();

        for node in dag.nodes.values() {
            for dep in &node.dependencies {
                let dep_pos = position[dep.source.as_str()];
                let node_pos = position[node.name.as_str()];
                prop_assert!(
                    dep_pos < node_pos,
                    "dependency '{}' at {} should precede '{}' at {}",
                    dep.source, dep_pos, node.name, node_pos
                );
            }
        }
    }

    /// The sort neither drops nor duplicates a task.
    #[test]
    fn topological_sort_preserves_the_task_set(size in 1usize..30, seed in any::<u64>()) {
        let dag = acyclic_dag(size, seed);
        let sorted = dag.topological_sort().map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(sorted.len(), dag.nodes.len());
        let input: HashSet<&str> = dag.nodes.keys().map(String::as_str).collect();
        let output: HashSet<&str> = sorted.iter().map(String::as_str).collect();
        prop_assert_eq!(input, output);
    }

    /// A graph built by this generator is always cycle-free: `validate`
    /// must agree regardless of how the random dependency subsets land.
    #[test]
    fn acyclic_generator_always_validates(size in 1usize..30, seed in any::<u64>()) {
        let dag = acyclic_dag(size, seed);
        prop_assert!(dag.validate().is_ok());
    }
}
