use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{CacheError, Result};

/// Content-addressed cache of installed dependency sets.
///
/// Two-phase protocol: install into a private temporary directory, then
/// publish with an atomic rename into the shared slot. Concurrent
/// installers for the same key race harmlessly: the first rename wins and
/// the loser discards its temp copy without surfacing an error. The
/// published state is idempotent (same key means same content by
/// construction), so no cross-process lock is needed; the per-key mutex
/// below only stops one worker process from spawning duplicate installer
/// subprocesses.
pub struct PackageCache {
    root: PathBuf,
    install_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PackageCache {
    pub fn new(root: PathBuf, install_timeout: Duration) -> Self {
        Self {
            root,
            install_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Installation timeout. Independent of, and expected to be larger
    /// than, any script-execution timeout.
    pub fn install_timeout(&self) -> Duration {
        self.install_timeout
    }

    /// Committed location for a cache key.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Return the committed entry for `key`, running `install` first if it
    /// is absent. A cache hit costs zero installer calls.
    ///
    /// `install` receives the private temporary directory to populate; it
    /// runs under the cache's install timeout.
    pub async fn ensure_with<F, Fut>(&self, key: &str, install: F) -> Result<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let target = self.entry_path(key);
        if tokio::fs::try_exists(&target).await? {
            debug!(key = %key, "package cache hit");
            return Ok(target);
        }

        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        // Another in-process caller may have published while we waited.
        if tokio::fs::try_exists(&target).await? {
            debug!(key = %key, "package cache hit after wait");
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = self
            .root
            .join(format!("{key}.tmp.{}.{}", std::process::id(), uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&tmp).await?;

        let timeout_secs = self.install_timeout.as_secs();
        let installed = match tokio::time::timeout(self.install_timeout, install(tmp.clone())).await
        {
            Ok(result) => result,
            Err(_) => Err(CacheError::InstallTimeout { timeout_secs }),
        };
        if let Err(e) = installed {
            let _ = tokio::fs::remove_dir_all(&tmp).await;
            return Err(e);
        }

        publish(&tmp, &target).await?;
        self.release_lock(key, &lock).await;
        info!(key = %key, path = %target.display(), "package cache entry published");
        Ok(target)
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drop the per-key lock entry once no other caller holds it, so a
    /// long-lived service does not accumulate one entry per key ever seen.
    async fn release_lock(&self, key: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // Two strong refs remain: ours and the map's.
        if Arc::strong_count(lock) <= 2 {
            locks.remove(key);
        }
    }
}

/// Atomically publish `tmp` as `target`. Losing a same-key rename race is
/// success: the winner's content is equivalent by construction, so the
/// loser's copy is discarded silently.
pub(crate) async fn publish(tmp: &Path, target: &Path) -> Result<()> {
    match tokio::fs::rename(tmp, target).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_dir_all(tmp).await;
            if tokio::fs::try_exists(target).await.unwrap_or(false) {
                debug!(target = %target.display(), "cache entry published by another installer");
                Ok(())
            } else {
                Err(e.into())
            }
        }
    }
}
