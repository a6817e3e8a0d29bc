//! Advisory per-path locks
//!
//! Two calls that mutate the same workspace path never run concurrently, even
//! across tasks. Paths are acquired in sorted order so overlapping sets cannot
//! deadlock, and every acquisition races the caller's cancellation token.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_foundation::{Error, Result};

type LockTable = Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>;

#[derive(Default)]
pub struct PathLocks {
    table: LockTable,
}

/// Held locks; released on drop
pub struct PathGuard {
    guards: Vec<OwnedMutexGuard<()>>,
    paths: Vec<PathBuf>,
    table: LockTable,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every path, or fail with `Cancelled` as soon as `cancel` fires
    pub async fn acquire(&self, mut paths: Vec<PathBuf>, cancel: &CancellationToken) -> Result<PathGuard> {
        paths.sort();
        paths.dedup();

        let mut guard = PathGuard {
            guards: Vec::with_capacity(paths.len()),
            paths: Vec::with_capacity(paths.len()),
            table: self.table.clone(),
        };

        for path in paths {
            let mutex = self.table.lock().entry(path.clone()).or_default().clone();
            // Registered before awaiting so a cancelled wait still prunes the entry
            guard.paths.push(path.clone());

            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                g = mutex.lock_owned() => Some(g),
            };
            match acquired {
                Some(g) => guard.guards.push(g),
                None => {
                    debug!(path = %path.display(), "Path lock wait cancelled");
                    return Err(Error::Cancelled);
                }
            }
        }

        Ok(guard)
    }

    /// Whether some caller currently holds `path`
    pub fn is_locked(&self, path: &std::path::Path) -> bool {
        let mutex = self.table.lock().get(path).cloned();
        mutex.map(|m| m.try_lock().is_err()).unwrap_or(false)
    }

    /// Number of tracked paths (held or awaited)
    pub fn tracked(&self) -> usize {
        self.table.lock().len()
    }
}

impl PathGuard {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut table = self.table.lock();
        for path in &self.paths {
            // Only the table's own reference left: nobody holds or waits on it
            if table.get(path).is_some_and(|m| Arc::strong_count(m) == 1) {
                table.remove(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_writer_waits() {
        let locks = Arc::new(PathLocks::new());
        let cancel = CancellationToken::new();
        let path = PathBuf::from("/ws/a.txt");

        let first = locks.acquire(vec![path.clone()], &cancel).await.unwrap();
        assert!(locks.is_locked(&path));

        let waiter = {
            let locks = locks.clone();
            let path = path.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { locks.acquire(vec![path], &cancel).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let locks = Arc::new(PathLocks::new());
        let path = PathBuf::from("/ws/b.txt");
        let _held = locks
            .acquire(vec![path.clone()], &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let locks = locks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { locks.acquire(vec![path], &cancel).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled wait must return promptly")
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_duplicate_paths_do_not_self_deadlock() {
        let locks = PathLocks::new();
        let p = PathBuf::from("/ws/c.txt");
        let guard = locks
            .acquire(vec![p.clone(), p.clone()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(guard.paths().len(), 1);
    }
}
