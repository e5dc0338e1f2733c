//! State store: the locked single-file persistence layer for `AgentRecord`s.

pub mod file_store;

pub use file_store::{StateStore, StoreError};
