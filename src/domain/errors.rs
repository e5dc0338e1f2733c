//! Unified domain error taxonomy.
//!
//! Each layer (store, semaphore, runner, dag, loop, executor, prompt
//! composition) owns a focused `thiserror` enum close to its own code;
//! `DomainError` composes them with `#[from]` for call sites that need one
//! type to report a fatal condition up to `anyhow` at the binary boundary.
//! Local per-task failures are captured as strings into
//! `AgentRecord::last_error` and never reach this enum; only configuration
//! errors, store failures, deadlocks, and hard timeouts unwind through it.

use thiserror::Error;

use crate::application::dag_engine::DagEngineError;
use crate::application::prompt_composer::PromptError;
use crate::domain::models::dag::DagError;
use crate::infrastructure::semaphore::file_semaphore::SemaphoreError;
use crate::infrastructure::store::file_store::StoreError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    DagEngine(#[from] DagEngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Semaphore(#[from] SemaphoreError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("agent record '{0}' not found")]
    AgentNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type DomainResult<T> = Result<T, DomainError>;
