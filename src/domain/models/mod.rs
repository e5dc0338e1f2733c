//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent_record;
pub mod config;
pub mod dag;
pub mod pipeline;
pub mod task;
pub mod usage;

pub use agent_record::{AgentRecord, AgentStatus, ExitReason, TerminateMode, TimeoutReason};
pub use config::{AppConfig, ExecutorConfig, LoggingConfig, ModelPrice, PricingConfig, SemaphoreConfig, StoreConfig};
pub use dag::{DagError, DagStats, TaskDag, TaskNode};
pub use pipeline::PipelineSpec;
pub use task::{Dependency, DependencySpec, EdgeCondition, PromptSource, PromptSourceError, TaskSpec, TaskStatus};
pub use usage::UsageStats;
