//! swarmctl — an execution substrate for long-running, multi-step
//! generative-AI coding agent sessions.
//!
//! Supervises one agent through a bounded or unbounded count of
//! iterations against a wrapped coding-agent CLI (`application::iteration_loop`),
//! or a whole task DAG run repeatedly across iterations
//! (`application::pipeline_executor`), persisting progress into a
//! cross-process, file-backed state store (`infrastructure::store`) so
//! external actors can observe, pause, resume, or terminate a run without
//! talking to the supervisor process directly.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::agent_record::{AgentRecord, AgentStatus, ExitReason, TerminateMode, TimeoutReason};
pub use domain::models::config::AppConfig;
