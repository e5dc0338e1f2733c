//! Infrastructure layer: adapters for everything outside the process
//! boundary — configuration loading, structured logging, the locked
//! state-store file, and the cross-process semaphore.

pub mod config;
pub mod logging;
pub mod semaphore;
pub mod store;
