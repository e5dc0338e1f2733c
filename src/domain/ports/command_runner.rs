//! `CommandRunner` port: the seam between the agent runner and whatever
//! actually executes a coding-agent CLI invocation. Production code runs a
//! real child process; tests substitute a `CommandRunner` that returns
//! canned output without touching the filesystem or a subprocess.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::models::usage::UsageStats;

/// Invoked whenever the runner parses a fresh `UsageStats` update from the
/// child's live output. May fire at high frequency; must be cheap.
pub type UsageCallback = Arc<dyn Fn(UsageStats) + Send + Sync>;

/// Invoked once per complete line of the child's stdout, in arrival order,
/// so a caller can route live output through a prefixed writer.
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One fully-specified invocation of a wrapped coding-agent CLI.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub prompt: String,
}

/// The result of running one iteration to completion (or to a terminal
/// failure the runner itself observed, as opposed to a timeout or
/// cancellation the caller enforces around it).
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub usage: UsageStats,
}

/// Errors a `CommandRunner` can surface before or during a spawn. Timeouts
/// and external termination are enforced by the caller and are not part of
/// this port's error surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandRunnerError {
    #[error("command '{0}' not found on PATH")]
    ProgramNotFound(String),
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),
    #[error("failed to write prompt to child stdin: {0}")]
    StdinWriteFailed(String),
    #[error("failed waiting on child process: {0}")]
    WaitFailed(String),
}

/// Abstracts "run one coding-agent iteration and report what happened".
/// The real implementation (`application::agent_runner::ProcessCommandRunner`)
/// spawns a `tokio::process::Command`; a test double can return fixed
/// `CommandOutcome`s to drive the iteration loop and pipeline executor
/// without a real subprocess.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn `spec`, write its prompt to stdin, and run it to completion,
    /// returning the child's pid alongside a handle the caller can use to
    /// await the outcome or request termination.
    async fn spawn(&self, spec: CommandSpec) -> Result<Box<dyn RunningCommand>, CommandRunnerError>;
}

/// A live (or already-finished) invocation returned by `CommandRunner::spawn`.
#[async_trait]
pub trait RunningCommand: Send + Sync {
    /// OS process id of the running command, if one exists (a test double
    /// may have none).
    fn pid(&self) -> Option<u32>;

    /// Block until the command finishes, or return early once `signal_term`
    /// has been called and the grace period (enforced by the caller) has
    /// observed no exit.
    async fn wait(&mut self) -> Result<CommandOutcome, CommandRunnerError>;

    /// Ask the command to stop gracefully (SIGTERM to the process group for
    /// a real process; a no-op flag flip for a test double).
    async fn signal_term(&mut self);

    /// Force-terminate immediately (SIGKILL to the process group / process
    /// tree for a real process).
    async fn kill(&mut self);

    /// Register a callback invoked on every fresh `UsageStats` parsed from
    /// the child's live output stream. Default no-op: test doubles that
    /// return a canned `CommandOutcome` need not stream usage.
    fn set_usage_callback(&mut self, _callback: UsageCallback) {}

    /// Register a callback invoked once per complete line of live stdout,
    /// so a caller can mirror output through a prefixed writer as it
    /// arrives rather than only after the process exits.
    fn set_output_callback(&mut self, _callback: OutputCallback) {}
}
