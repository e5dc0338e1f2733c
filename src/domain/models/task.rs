//! Task and dependency-edge domain models.
//!
//! A task names one node in a pipeline's DAG: a prompt source, an optional
//! model override, and the edges that must be satisfied before it becomes
//! ready. `TaskStatus` tracks one task through one DAG iteration; it is
//! discarded and recreated for the next iteration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Status of a task within a single DAG iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// A status is terminal once no further transition happens within the iteration.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub const fn is_active(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// The outcome condition an edge requires of its source task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Source task must have succeeded.
    Success,
    /// Source task must have failed.
    Failure,
    /// Source task must have reached any terminal outcome except `skipped`.
    Any,
    /// Source task must have reached any terminal outcome, including `skipped`.
    Always,
}

impl EdgeCondition {
    /// Whether `source_status` (a terminal status) satisfies this condition.
    pub const fn is_satisfied_by(self, source_status: TaskStatus) -> bool {
        match self {
            Self::Success => matches!(source_status, TaskStatus::Succeeded),
            Self::Failure => matches!(source_status, TaskStatus::Failed),
            Self::Any => matches!(source_status, TaskStatus::Succeeded | TaskStatus::Failed),
            Self::Always => source_status.is_terminal(),
        }
    }
}

impl Default for EdgeCondition {
    fn default() -> Self {
        Self::Success
    }
}

/// One dependency edge: this task depends on `source` under `condition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub source: String,
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// A dependency as written in a task descriptor: either a bare task name
/// (defaulting to a `success` edge) or an explicit `{task, condition}` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DependencySpec {
    Name(String),
    Explicit {
        task: String,
        #[serde(default)]
        condition: EdgeCondition,
    },
}

impl DependencySpec {
    pub fn into_dependency(self) -> Dependency {
        match self {
            Self::Name(source) => Dependency { source, condition: EdgeCondition::default() },
            Self::Explicit { task, condition } => Dependency { source: task, condition },
        }
    }
}

/// Where a task's prompt text comes from. Exactly one of the three fields
/// on `TaskSpec` this is resolved from is set; `TaskSpec::prompt_source`
/// enforces that at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Inline(String),
    File(PathBuf),
}

/// Error constructing a `TaskSpec`: its prompt fields didn't name exactly one source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PromptSourceError {
    #[error("task '{0}' must set exactly one of prompt, prompt_file, prompt_string")]
    NoneOrMultipleSources(String),
}

/// Static descriptor for one task, as read from the pipeline configuration.
/// `prompt`/`prompt_string` are equivalent inline sources; `prompt_file` reads
/// from disk. Exactly one must be present.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    #[serde(default)]
    pub prompt_string: Option<String>,
    pub model: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<DependencySpec>,
    pub concurrency: Option<usize>,
}

impl TaskSpec {
    /// Dependencies resolved from the descriptor's `depends_on` entries.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.depends_on.iter().cloned().map(DependencySpec::into_dependency).collect()
    }

    /// Resolve and validate the prompt source, failing if zero or more than
    /// one of `prompt`/`prompt_file`/`prompt_string` was set.
    pub fn prompt_source(&self) -> Result<PromptSource, PromptSourceError> {
        let sources_set = usize::from(self.prompt.is_some())
            + usize::from(self.prompt_string.is_some())
            + usize::from(self.prompt_file.is_some());
        if sources_set != 1 {
            return Err(PromptSourceError::NoneOrMultipleSources(self.name.clone()));
        }
        if let Some(text) = self.prompt.as_ref().or(self.prompt_string.as_ref()) {
            return Ok(PromptSource::Inline(text.clone()));
        }
        Ok(PromptSource::File(self.prompt_file.clone().expect("exactly one source set")))
    }
}
