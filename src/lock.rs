//! Process Mutex: exclusive named file-locks gating the "monitor" and
//! "rotate" ticks (and the bot's own update-processing loop).
//!
//! A non-blocking exclusive lock means a stacked-up external timer firing
//! while the previous tick is still executing does not queue — it simply
//! observes the lock held, logs a warning, and returns without running.

use std::fs::OpenOptions;
use std::future::Future;
use std::path::PathBuf;

use fs2::FileExt;

use crate::error::{LbError, Result};

pub struct ProcessMutex {
    lock_dir: PathBuf,
}

impl ProcessMutex {
    pub fn new(lock_dir: PathBuf) -> Self {
        Self { lock_dir }
    }

    /// Run `action` while holding the named exclusive lock. Returns
    /// `Ok(None)` without invoking `action` if the lock is already held by
    /// another process. The lock is released on every exit path, including
    /// when `action` returns an error.
    pub async fn with_lock<F, Fut, T>(&self, name: &str, action: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        std::fs::create_dir_all(&self.lock_dir).map_err(|source| LbError::Io {
            path: self.lock_dir.clone(),
            source,
        })?;
        let lock_path = self.lock_dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|source| LbError::Io {
                path: lock_path.clone(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            tracing::warn!(tick = name, "lock already held, skipping this tick");
            return Ok(None);
        }

        let result = action().await;
        let _ = FileExt::unlock(&file);
        result.map(Some)
    }
}
