//! Cross-process mutual exclusion for the remote-API setup phase.
//!
//! The guard is an exclusive advisory lock on a lock file. It is released
//! when the [`SetupGuard`] is dropped, which covers error returns and
//! cancellation as well as the normal path.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Delay between attempts while another process holds the lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Errors acquiring the guard.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("failed to open lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled while waiting for lock {0}")]
    Cancelled(PathBuf),
}

/// An acquired exclusive lock.
#[derive(Debug)]
pub struct SetupGuard {
    file: File,
    path: PathBuf,
}

impl SetupGuard {
    /// Waits until the lock at `path` is free and takes it.
    pub async fn acquire(path: &Path, cancel: &CancellationToken) -> Result<Self, GuardError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| GuardError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| GuardError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(GuardError::Cancelled(path.to_path_buf()));
            }
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || is_contended(&e) => {
                    attempts += 1;
                    trace!(path = %path.display(), attempts, "Setup lock busy");
                }
                Err(source) => {
                    return Err(GuardError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(GuardError::Cancelled(path.to_path_buf())),
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
        }

        debug!(path = %path.display(), attempts, "Setup lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SetupGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "Setup lock released");
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opt.lock");
        let cancel = CancellationToken::new();

        let first = SetupGuard::acquire(&path, &cancel).await.unwrap();

        let waiter_path = path.clone();
        let waiter_cancel = cancel.clone();
        let waiter = tokio::spawn(async move {
            SetupGuard::acquire(&waiter_path, &waiter_cancel).await.map(|_| ())
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opt.lock");
        let cancel = CancellationToken::new();

        let _held = SetupGuard::acquire(&path, &cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        let trigger = waiter_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = SetupGuard::acquire(&path, &waiter_cancel).await;
        assert!(matches!(result, Err(GuardError::Cancelled(_))));
    }

    #[tokio::test]
    async fn creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks").join("opt.lock");
        let guard = SetupGuard::acquire(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(guard.path(), path);
        assert!(path.exists());
    }
}
