//! Process-singleton guard
//!
//! At most one handler process per node may mutate the host. An exclusive
//! file lock at a well-known path enforces it: during rolling upgrades the
//! new pod blocks here until the old one releases. The webhook, by
//! contrast, is leader-elected through the store and tolerates overlap.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tracing::{info, warn};

use crate::{Error, Result};

/// How long to wait between lock attempts
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// The held handler lock. Released when dropped, i.e. at process exit.
pub struct HandlerLock {
    file: File,
    path: PathBuf,
}

impl HandlerLock {
    /// The lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HandlerLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed releasing handler lock");
        }
    }
}

/// Attempt the exclusive lock once. `Ok(None)` means another process holds
/// it; errors mean the file itself cannot be created or opened.
pub fn try_acquire(path: &str) -> Result<Option<HandlerLock>> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| Error::lock(format!("failed to create lock file {path}: {e}")))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(HandlerLock {
            file,
            path: PathBuf::from(path),
        })),
        Err(_) => Ok(None),
    }
}

/// Acquire the exclusive handler lock, retrying forever.
///
/// Blocking here is correct: a handler that cannot get the lock must not
/// touch anything, and the previous holder releases it on exit.
pub async fn acquire(path: &str) -> Result<HandlerLock> {
    info!(path = %path, "taking exclusive handler lock");
    loop {
        match try_acquire(path)? {
            Some(lock) => {
                info!(path = %path, "successfully took exclusive handler lock");
                return Ok(lock);
            }
            None => {
                warn!(path = %path, "handler lock held elsewhere, retrying");
                tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
            }
        }
    }
}
