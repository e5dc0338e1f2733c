//! Application layer: use-case orchestration over the domain models and
//! infrastructure adapters.
//!
//! - `agent_runner` — `CommandRunner` adapter that spawns the wrapped coding
//!   agent CLI as a real child process in its own process group.
//! - `dag_engine` — live per-iteration scheduling (readiness, forced skips,
//!   deadlock detection) over a structurally-validated `TaskDag`.
//! - `iteration_loop` — drives a single-agent (non-pipeline) supervised run
//!   through its configured iteration count.
//! - `pipeline_executor` — drives a multi-task DAG pipeline through its
//!   configured iteration count, one scheduling wave at a time.
//! - `pricing` — fallback cost recompute from token counts when a runner
//!   reports zero cost.
//! - `prompt_composer` — resolves a task's prompt text, include directives,
//!   output substitution, and prefix/suffix wrapping.
//! - `writer_group` — multiplexes concurrent tasks' output onto one shared,
//!   colored, prefixed terminal stream.

pub mod agent_runner;
pub mod dag_engine;
pub mod iteration_loop;
pub mod pipeline_executor;
pub mod pricing;
pub mod prompt_composer;
pub mod writer_group;
