//! Pipeline descriptor: an iteration count plus the set of tasks it runs.

use serde::{Deserialize, Serialize};

/// Static descriptor for a pipeline, as read from the pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSpec {
    pub name: String,
    /// 0 means unbounded.
    #[serde(default)]
    pub iterations: u32,
    pub tasks: Vec<String>,
    /// Advisory batch size hint for the scheduler; the DAG engine's wave size
    /// already bounds true parallelism, this only limits how many ready tasks
    /// are launched per scheduling turn.
    pub parallelism: Option<usize>,
}

impl PipelineSpec {
    pub const fn is_unbounded(&self) -> bool {
        self.iterations == 0
    }
}
