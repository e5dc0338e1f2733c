//! Cross-process slot-based semaphore used to bound per-task concurrency.

pub mod file_semaphore;

pub use file_semaphore::{FileSemaphore, SemaphoreError, SemaphorePermit};
