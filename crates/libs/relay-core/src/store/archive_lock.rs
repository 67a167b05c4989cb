//! Advisory archive lock with stale-holder healing.
//!
//! Each archive root carries a lockfile plus a `.owner.json` sidecar
//! recording the holder's process identity and a heartbeat timestamp.
//! Acquisition blocks with a timeout; a lock whose owner is dead or
//! whose heartbeat is older than the max age is healed, and the
//! recovery is journaled so crash cleanups stay auditable.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lock owner metadata for stale detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub agent: Option<String>,
    pub hostname: String,
}

impl LockOwner {
    /// Create lock owner for current process
    pub fn current(agent: Option<String>) -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now(),
            agent,
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".into()),
        }
    }

    /// Check if lock is stale (owner dead or too old)
    pub fn is_stale(&self, max_age: Duration) -> bool {
        if Utc::now() - self.timestamp > max_age {
            return true;
        }
        if !is_process_alive(self.pid) {
            return true;
        }
        false
    }
}

/// Check if process with given PID is alive
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new(&format!("/proc/{}", pid)).exists()
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(true)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        true
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

/// Advisory file lock guarding the archive working tree.
///
/// One writer at a time per archive, across processes. In-process
/// serialization rides on the inner mutex.
pub struct ArchiveLock {
    lock_path: PathBuf,
    owner_path: PathBuf,
    recovery_log_path: PathBuf,
    inner: Mutex<()>,
}

impl ArchiveLock {
    /// Create new archive lock for given path
    pub fn new(archive_path: &Path) -> Self {
        Self {
            lock_path: archive_path.join(".archive.lock"),
            owner_path: archive_path.join(".archive.lock.owner.json"),
            recovery_log_path: archive_path.join(".archive.lock.recovery.log"),
            inner: Mutex::new(()),
        }
    }

    /// Acquire lock with timeout and stale cleanup.
    ///
    /// The returned guard releases the lock when dropped.
    pub async fn acquire(
        &self,
        agent: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<LockGuard<'_>> {
        let deadline = std::time::Instant::now() + timeout;
        let max_age = Duration::hours(1);

        loop {
            let _inner = self.inner.lock().await;

            if self.lock_path.exists() {
                if let Some(owner) = self.read_owner().await {
                    if owner.is_stale(max_age) {
                        info!(
                            pid = owner.pid,
                            heartbeat = %owner.timestamp,
                            "healing stale archive lock"
                        );
                        self.journal_recovery(&owner).await;
                        self.force_cleanup().await?;
                    } else {
                        if std::time::Instant::now() > deadline {
                            return Err(Error::LockTimeout {
                                path: self.lock_path.display().to_string(),
                                owner_pid: owner.pid,
                            });
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        continue;
                    }
                } else {
                    warn!("lock file exists without owner sidecar, forcing cleanup");
                    self.force_cleanup().await?;
                }
            }

            fs::write(&self.lock_path, "").await?;

            let owner = LockOwner::current(agent);
            let owner_json = serde_json::to_string_pretty(&owner)?;
            fs::write(&self.owner_path, owner_json).await?;

            debug!(pid = owner.pid, "archive lock acquired");

            return Ok(LockGuard { lock: self });
        }
    }

    async fn read_owner(&self) -> Option<LockOwner> {
        let content = fs::read_to_string(&self.owner_path).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Append a recovery record so healed crashes remain auditable.
    async fn journal_recovery(&self, stale_owner: &LockOwner) {
        let line = format!(
            "{} healed lock held by pid {} (host {}, agent {:?}, heartbeat {})\n",
            Utc::now().to_rfc3339(),
            stale_owner.pid,
            stale_owner.hostname,
            stale_owner.agent,
            stale_owner.timestamp.to_rfc3339(),
        );
        let existing = fs::read_to_string(&self.recovery_log_path)
            .await
            .unwrap_or_default();
        let _ = fs::write(&self.recovery_log_path, existing + &line).await;
    }

    async fn force_cleanup(&self) -> Result<()> {
        let _ = fs::remove_file(&self.lock_path).await;
        let _ = fs::remove_file(&self.owner_path).await;
        Ok(())
    }

    /// Release the lock
    pub async fn release(&self) -> Result<()> {
        fs::remove_file(&self.lock_path).await?;
        let _ = fs::remove_file(&self.owner_path).await;
        debug!("archive lock released");
        Ok(())
    }

    /// Paths used by tests.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn owner_path(&self) -> &Path {
        &self.owner_path
    }

    pub fn recovery_log_path(&self) -> &Path {
        &self.recovery_log_path
    }
}

/// RAII guard for automatic lock release
pub struct LockGuard<'a> {
    lock: &'a ArchiveLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Cannot await in drop; spawn the file removals.
        let lock_path = self.lock.lock_path.clone();
        let owner_path = self.lock.owner_path.clone();

        tokio::spawn(async move {
            let _ = fs::remove_file(&lock_path).await;
            let _ = fs::remove_file(&owner_path).await;
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let dir = TempDir::new().expect("create temp dir");
        let lock = ArchiveLock::new(dir.path());

        let guard = lock
            .acquire(Some("test-agent".into()), std::time::Duration::from_secs(5))
            .await
            .expect("acquire lock");

        assert!(lock.lock_path.exists());
        assert!(lock.owner_path.exists());

        let owner = lock.read_owner().await.expect("read owner");
        assert_eq!(owner.pid, std::process::id());
        assert_eq!(owner.agent, Some("test-agent".into()));

        drop(guard);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_stale_lock_heal_and_journal() {
        let dir = TempDir::new().expect("create temp dir");
        let lock = ArchiveLock::new(dir.path());

        let fake_owner = LockOwner {
            pid: 999999999, // unlikely to exist
            timestamp: Utc::now() - Duration::hours(2),
            agent: Some("crashed-agent".into()),
            hostname: "crashed-host".into(),
        };

        fs::write(&lock.lock_path, "").await.expect("write lock");
        fs::write(
            &lock.owner_path,
            serde_json::to_string(&fake_owner).expect("serialize"),
        )
        .await
        .expect("write owner");

        let _guard = lock
            .acquire(Some("new-agent".into()), std::time::Duration::from_secs(1))
            .await
            .expect("acquire after stale heal");

        let journal = fs::read_to_string(&lock.recovery_log_path)
            .await
            .expect("recovery journal written");
        assert!(journal.contains("999999999"));
        assert!(journal.contains("crashed-host"));
    }

    #[tokio::test]
    async fn test_is_stale_dead_process() {
        let owner = LockOwner {
            pid: 999999999,
            timestamp: Utc::now(),
            agent: None,
            hostname: "test".into(),
        };
        assert!(owner.is_stale(Duration::hours(24)));
    }

    #[tokio::test]
    async fn test_is_stale_old_heartbeat() {
        let owner = LockOwner {
            pid: std::process::id(),
            timestamp: Utc::now() - Duration::hours(2),
            agent: None,
            hostname: "test".into(),
        };
        assert!(owner.is_stale(Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_live_lock_times_out() {
        let dir = TempDir::new().expect("create temp dir");
        let lock = ArchiveLock::new(dir.path());

        // Live owner: current pid, fresh heartbeat.
        let live_owner = LockOwner::current(Some("other-window".into()));
        fs::write(&lock.lock_path, "").await.expect("write lock");
        fs::write(
            &lock.owner_path,
            serde_json::to_string(&live_owner).expect("serialize"),
        )
        .await
        .expect("write owner");

        let result = lock
            .acquire(Some("waiter".into()), std::time::Duration::from_millis(250))
            .await;

        match result {
            Err(Error::LockTimeout { owner_pid, .. }) => {
                assert_eq!(owner_pid, std::process::id());
            }
            other => panic!("expected LockTimeout, got {:?}", other.err()),
        }
    }
}
