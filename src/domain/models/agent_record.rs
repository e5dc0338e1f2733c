//! `AgentRecord`: the state-store's primary entity.
//!
//! One record per supervised agent. The supervisor process owns the
//! terminal/outcome fields; external actors (another process, a GUI) may
//! only write `iterations`, `model`, `paused`, and `terminate_mode`. See
//! `apply_external_fields` below and `infrastructure::store::StateStore::merge_update`
//! for the ownership-respecting merge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::usage::UsageStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Completed,
    Killed,
    Signal,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateMode {
    AfterIteration,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutReason {
    Total,
    Iteration,
}

/// The persistent representation of one supervised agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,

    pub pid: u32,
    pub prompt: String,
    pub model: String,
    pub command: String,

    pub started_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,

    /// 0 means unbounded.
    pub iterations: u32,
    pub current_iteration: u32,

    pub status: AgentStatus,

    pub paused: bool,
    pub paused_at: Option<DateTime<Utc>>,

    pub terminate_mode: Option<TerminateMode>,
    pub exit_reason: Option<ExitReason>,

    pub successful_iterations: u32,
    pub failed_iterations: u32,
    pub last_error: Option<String>,

    /// Carries, among other fields, the free-form "what am I doing" hint
    /// surfaced by some CLIs (`usage.current_task`). Flattened so the
    /// on-disk record exposes one set of usage/hint keys, not two.
    #[serde(flatten)]
    pub usage: UsageStats,

    pub log_file: String,
    pub working_dir: String,

    pub timeout_reason: Option<TimeoutReason>,
}

impl AgentRecord {
    /// Construct a fresh, running record with zeroed counters. `iterations
    /// == 0` means unbounded.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        pid: u32,
        prompt: impl Into<String>,
        model: impl Into<String>,
        command: impl Into<String>,
        iterations: u32,
        log_file: impl Into<String>,
        working_dir: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            labels: HashMap::new(),
            pid,
            prompt: prompt.into(),
            model: model.into(),
            command: command.into(),
            started_at: now,
            terminated_at: None,
            iterations,
            current_iteration: 0,
            status: AgentStatus::Running,
            paused: false,
            paused_at: None,
            terminate_mode: None,
            exit_reason: None,
            successful_iterations: 0,
            failed_iterations: 0,
            last_error: None,
            usage: UsageStats::default(),
            log_file: log_file.into(),
            working_dir: working_dir.into(),
            timeout_reason: None,
        }
    }

    pub const fn is_unbounded(&self) -> bool {
        self.iterations == 0
    }

    pub const fn is_terminated(&self) -> bool {
        matches!(self.status, AgentStatus::Terminated)
    }

    /// Mark the record terminated. Idempotent: calling it again on an
    /// already-terminated record is a no-op (first terminal write wins).
    pub fn terminate(&mut self, reason: ExitReason, now: DateTime<Utc>) {
        if self.is_terminated() {
            return;
        }
        self.status = AgentStatus::Terminated;
        self.terminated_at = Some(now);
        self.exit_reason = Some(reason);
    }

    /// Fields external actors (another process, a GUI) are allowed to write.
    /// Copies them from `incoming` into `self`, leaving every supervisor-owned
    /// field untouched.
    pub fn apply_external_fields(&mut self, incoming: &Self) {
        self.iterations = incoming.iterations;
        self.model.clone_from(&incoming.model);
        self.paused = incoming.paused;
        self.terminate_mode = incoming.terminate_mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> AgentRecord {
        AgentRecord::new("a1", "demo", 1234, "hi", "sonnet", "claude", 5, "a1.log", "/tmp", now)
    }

    #[test]
    fn new_record_is_running_and_unbounded_when_zero() {
        let now = Utc::now();
        let mut record = sample(now);
        assert_eq!(record.status, AgentStatus::Running);
        assert!(!record.is_unbounded());
        record.iterations = 0;
        assert!(record.is_unbounded());
    }

    #[test]
    fn terminate_is_idempotent() {
        let now = Utc::now();
        let mut record = sample(now);
        record.terminate(ExitReason::Completed, now);
        let first_terminated_at = record.terminated_at;
        record.terminate(ExitReason::Error, now + chrono::Duration::seconds(5));
        assert_eq!(record.exit_reason, Some(ExitReason::Completed));
        assert_eq!(record.terminated_at, first_terminated_at);
    }

    #[test]
    fn apply_external_fields_preserves_owned_fields() {
        let now = Utc::now();
        let mut record = sample(now);
        record.successful_iterations = 3;
        record.current_iteration = 3;

        let mut incoming = record.clone();
        incoming.iterations = 10;
        incoming.paused = true;
        incoming.successful_iterations = 0;
        incoming.current_iteration = 0;

        record.apply_external_fields(&incoming);
        assert_eq!(record.iterations, 10);
        assert!(record.paused);
        assert_eq!(record.successful_iterations, 3, "owned field must survive");
        assert_eq!(record.current_iteration, 3, "owned field must survive");
    }
}
