//! Cross-process semaphore: bounds how many iterations of a given task can
//! run concurrently across independent `swarmctl` invocations, using one
//! lock file per slot rather than an in-process `tokio::sync::Semaphore`
//! (which can't coordinate across processes).
//!
//! Follows a "hold a resource, release it deterministically on drop" shape
//! over a pool of `(task, slot)` lock files using `fs4`'s OS advisory locks.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::FileExt;

#[derive(Debug, thiserror::Error)]
pub enum SemaphoreError {
    #[error("failed to prepare lock directory: {0}")]
    LockDirFailed(std::io::Error),
    #[error("failed to open slot lock file: {0}")]
    OpenFailed(std::io::Error),
    #[error("background task panicked: {0}")]
    TaskJoinFailed(#[from] tokio::task::JoinError),
}

/// A held slot. Releases automatically when dropped; also exposes an
/// explicit `release` for callers that want the release to happen at a
/// precise point rather than whenever the value happens to go out of scope.
pub struct SemaphorePermit {
    file: Option<File>,
    path: PathBuf,
}

impl SemaphorePermit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Cross-process semaphore keyed by task name. `concurrency == 0` means
/// unbounded: `acquire` returns immediately without taking a real slot.
#[derive(Debug, Clone)]
pub struct FileSemaphore {
    lock_dir: PathBuf,
    retry_interval: Duration,
}

impl FileSemaphore {
    pub fn new(lock_dir: impl Into<PathBuf>, retry_interval_ms: u64) -> Self {
        Self { lock_dir: lock_dir.into(), retry_interval: Duration::from_millis(retry_interval_ms) }
    }

    /// Remove any slot lock files left over from a previous run that nobody
    /// currently holds. A lock file that's still held by a live process is
    /// left untouched; this only tidies up files whose OS lock was already
    /// released because their owner exited.
    pub async fn cleanup_orphans(&self) -> Result<usize, SemaphoreError> {
        let lock_dir = self.lock_dir.clone();
        tokio::task::spawn_blocking(move || {
            if !lock_dir.exists() {
                return Ok(0);
            }
            let mut removed = 0usize;
            for entry in std::fs::read_dir(&lock_dir).map_err(SemaphoreError::LockDirFailed)? {
                let entry = entry.map_err(SemaphoreError::LockDirFailed)?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                    continue;
                }
                if let Ok(file) = File::open(&path) {
                    if file.try_lock_exclusive().is_ok() {
                        let _ = file.unlock();
                        let _ = std::fs::remove_file(&path);
                        removed += 1;
                    }
                }
            }
            Ok(removed)
        })
        .await?
    }

    /// Acquire one slot for `task_name` out of `concurrency` total slots,
    /// retrying from slot 0 every `retry_interval` while every slot is held
    /// elsewhere. `concurrency == 0` returns an unbounded permit at once.
    pub async fn acquire(&self, task_name: &str, concurrency: usize) -> Result<SemaphorePermit, SemaphoreError> {
        if concurrency == 0 {
            return Ok(SemaphorePermit { file: None, path: PathBuf::new() });
        }

        let lock_dir = self.lock_dir.clone();
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(&lock_dir)).await?.map_err(SemaphoreError::LockDirFailed)?;

        loop {
            let this = self.clone();
            let task_name = task_name.to_string();
            if let Some(permit) = tokio::task::spawn_blocking(move || this.try_acquire_one_pass(&task_name, concurrency)).await?? {
                return Ok(permit);
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn try_acquire_one_pass(&self, task_name: &str, concurrency: usize) -> Result<Option<SemaphorePermit>, SemaphoreError> {
        for slot in 0..concurrency {
            let path = self.lock_dir.join(format!("{task_name}.{slot}.lock"));
            let file = File::create(&path).map_err(SemaphoreError::OpenFailed)?;
            if file.try_lock_exclusive().is_ok() {
                return Ok(Some(SemaphorePermit { file: Some(file), path }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn acquire_respects_concurrency_cap() {
        let dir = tempdir().unwrap();
        let sem = FileSemaphore::new(dir.path(), 10);

        let p1 = sem.acquire("build", 1).await.unwrap();
        let p2_path = dir.path().join("build.0.lock");
        assert_eq!(p1.path(), p2_path);

        drop(p1);
        let p2 = sem.acquire("build", 1).await.unwrap();
        assert_eq!(p2.path(), p2_path);
    }

    #[tokio::test]
    async fn unbounded_concurrency_returns_immediately() {
        let dir = tempdir().unwrap();
        let sem = FileSemaphore::new(dir.path(), 10);
        let permit = sem.acquire("anything", 0).await.unwrap();
        assert_eq!(permit.path(), Path::new(""));
    }

    #[tokio::test]
    async fn distinct_slots_can_be_held_concurrently() {
        let dir = tempdir().unwrap();
        let sem = FileSemaphore::new(dir.path(), 10);
        let p1 = sem.acquire("build", 2).await.unwrap();
        let p2 = sem.acquire("build", 2).await.unwrap();
        assert_ne!(p1.path(), p2.path());
    }

    #[tokio::test]
    async fn cleanup_orphans_removes_unheld_lock_files() {
        let dir = tempdir().unwrap();
        let sem = FileSemaphore::new(dir.path(), 10);
        let stale = dir.path().join("ghost.0.lock");
        std::fs::write(&stale, b"").unwrap();
        let removed = sem.cleanup_orphans().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }
}
